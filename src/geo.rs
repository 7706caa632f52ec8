//! Geo/name matching: normalized fire-name equality plus great-circle
//! distance under a threshold. Pure functions, no side effects.

use crate::types::{CanonicalIncident, Incident, Location};

const EARTH_RADIUS_MILES: f64 = 3958.7613;

/// Great-circle distance in miles between two WGS84 points.
pub fn distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
  let phi1 = lat1.to_radians();
  let phi2 = lat2.to_radians();
  let dphi = (lat2 - lat1).to_radians();
  let dlambda = (lon2 - lon1).to_radians();

  let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
  2.0 * EARTH_RADIUS_MILES * a.sqrt().min(1.0).asin()
}

/// Normalize a fire name for stable comparison:
/// - case-fold
/// - collapse runs of whitespace
/// - strip trailing generic qualifiers ("fire", "complex"), repeatedly
///
/// "River Complex Fire", "river complex", and "RIVER" all normalize equal.
/// Stripping never produces an empty name.
pub fn normalize_name(name: &str) -> String {
  let folded = name.trim().to_lowercase();
  let mut tokens: Vec<&str> = folded.split_whitespace().collect();
  while tokens.len() > 1 {
    match tokens.last() {
      Some(&"fire") | Some(&"complex") => {
        tokens.pop();
      }
      _ => break,
    }
  }
  tokens.join(" ")
}

/// Name + optional location view used for same-fire matching.
#[derive(Debug, Clone, Copy)]
pub struct MatchKey<'a> {
  pub name: &'a str,
  pub location: Option<Location>,
}

impl Incident {
  pub fn match_key(&self) -> MatchKey<'_> {
    MatchKey {
      name: &self.name,
      location: self.location,
    }
  }
}

impl CanonicalIncident {
  pub fn match_key(&self) -> MatchKey<'_> {
    MatchKey {
      name: &self.name,
      location: self.location,
    }
  }
}

/// Two records refer to the same real fire when their normalized names are
/// equal AND both carry a location within `max_distance_miles`. A shared
/// name alone or a shared location alone is never enough; records without a
/// location can only merge via explicit correlation-id overlap.
pub fn matches(a: &MatchKey<'_>, b: &MatchKey<'_>, max_distance_miles: f64) -> bool {
  let (loc_a, loc_b) = match (a.location, b.location) {
    (Some(la), Some(lb)) => (la, lb),
    _ => return false,
  };
  if normalize_name(a.name) != normalize_name(b.name) {
    return false;
  }
  distance(loc_a.lon, loc_a.lat, loc_b.lon, loc_b.lat) <= max_distance_miles
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_name_strips_generic_suffixes() {
    assert_eq!(normalize_name("Camp Fire"), "camp");
    assert_eq!(normalize_name("CAMP"), "camp");
    assert_eq!(normalize_name("River Complex Fire"), "river");
    assert_eq!(normalize_name("river complex"), "river");
    assert_eq!(normalize_name("  August   Complex "), "august");
  }

  #[test]
  fn normalize_name_never_empties() {
    assert_eq!(normalize_name("Fire"), "fire");
    assert_eq!(normalize_name("Complex"), "complex");
    assert_eq!(normalize_name("Complex Fire"), "complex");
  }

  #[test]
  fn distance_known_pair() {
    // Sacramento to Reno, roughly 111 miles.
    let d = distance(-121.4944, 38.5816, -119.8138, 39.5296);
    assert!((d - 111.0).abs() < 6.0, "got {}", d);
  }

  #[test]
  fn distance_zero_for_same_point() {
    assert!(distance(-120.0, 40.0, -120.0, 40.0).abs() < 1e-9);
  }

  fn key(name: &str, loc: Option<(f64, f64)>) -> MatchKey<'static> {
    MatchKey {
      name: Box::leak(name.to_string().into_boxed_str()),
      location: loc.map(|(lat, lon)| Location { lat, lon }),
    }
  }

  #[test]
  fn match_requires_both_signals() {
    let a = key("Camp Fire", Some((39.81, -121.44)));
    let same_name_near = key("camp", Some((39.82, -121.45)));
    let same_name_far = key("Camp", Some((45.0, -110.0)));
    let other_name_near = key("Ranch Fire", Some((39.81, -121.44)));
    let no_location = key("Camp Fire", None);

    assert!(matches(&a, &same_name_near, 30.0));
    assert!(!matches(&a, &same_name_far, 30.0));
    assert!(!matches(&a, &other_name_near, 30.0));
    assert!(!matches(&a, &no_location, 30.0));
  }
}
