//! Merge engine: recency-based field ownership across feeds, correlation-id
//! accumulation, and coalescing of canonical incidents discovered to be the
//! same real fire.
//!
//! The later modified time wins field ownership for all overlapping fields;
//! an exact tie goes to the configured source priority. The losing side only
//! fills fields the winner lacks. Source-exclusive metrics never survive a
//! change of authority to a non-owning source.

use crate::config::Config;
use crate::geo;
use crate::types::{CanonicalIncident, CanonicalMap, Incident, Metrics, PerimeterRef, Source};

/// Merge an incoming single-source record into its correlated canonical
/// incident. With no existing record the incoming one is promoted as-is.
/// The canonical id and emission history always survive.
pub fn merge(
  existing: Option<&CanonicalIncident>,
  incoming: &Incident,
  config: &Config,
) -> CanonicalIncident {
  let promoted = CanonicalIncident::from_incident(incoming);
  match existing {
    None => promoted,
    Some(existing) => {
      let mut out = combine(existing.clone(), promoted, config);
      out.canonical_id = existing.canonical_id.clone();
      out.last_emitted_update_id = existing.last_emitted_update_id.clone();
      out
    }
  }
}

/// Collapse canonical incidents that the matcher judges to be the same real
/// fire. Candidate pairs are found over sorted ids and applied one at a time
/// until fixpoint, so the surviving identity does not depend on input order.
/// Returns the number of coalesced pairs.
pub fn coalesce(map: &mut CanonicalMap, config: &Config) -> usize {
  let mut count = 0;
  loop {
    let ids: Vec<_> = map.keys().cloned().collect();
    let mut found = None;
    'scan: for i in 0..ids.len() {
      for j in (i + 1)..ids.len() {
        let a = &map[&ids[i]];
        let b = &map[&ids[j]];
        if geo::matches(
          &a.match_key(),
          &b.match_key(),
          config.max_correlation_distance_miles,
        ) {
          found = Some((ids[i].clone(), ids[j].clone()));
          break 'scan;
        }
      }
    }
    let Some((id_a, id_b)) = found else {
      break;
    };
    // Both ids are present; they came from the key scan above.
    let (a, b) = match (map.remove(&id_a), map.remove(&id_b)) {
      (Some(a), Some(b)) => (a, b),
      _ => break,
    };
    let merged = combine(a, b, config);
    count += 1;
    map.insert(merged.canonical_id.clone(), merged);
  }
  count
}

/// Pick the authoritative side and fold the loser in. The winner keeps its
/// canonical id; correlation ids are unioned.
fn combine(a: CanonicalIncident, b: CanonicalIncident, config: &Config) -> CanonicalIncident {
  let a_wins = match a.modified_at.cmp(&b.modified_at) {
    std::cmp::Ordering::Greater => true,
    std::cmp::Ordering::Less => false,
    std::cmp::Ordering::Equal => {
      match config.source_rank(a.source).cmp(&config.source_rank(b.source)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a.canonical_id <= b.canonical_id,
      }
    }
  };
  let (mut winner, loser) = if a_wins { (a, b) } else { (b, a) };

  winner.correlation_ids.extend(loser.correlation_ids);

  // Null-coalescing fill: the loser never overrides a present winning field.
  if winner.location.is_none() {
    winner.location = loser.location;
  }
  if winner.discovered_at.is_none() {
    winner.discovered_at = loser.discovered_at;
  }
  if winner.incident_type.is_none() {
    winner.incident_type = loser.incident_type;
  }
  if winner.state.is_none() {
    winner.state = loser.state;
  }
  fill_metrics(&mut winner.metrics, &loser.metrics);
  enforce_exclusive(&mut winner.metrics, winner.source);

  // Perimeters track their own recency clock, independent of the metrics.
  winner.perimeter = latest_perimeter(winner.perimeter.as_ref(), loser.perimeter.as_ref());

  if winner.last_emitted_update_id.is_none() {
    winner.last_emitted_update_id = loser.last_emitted_update_id;
  }
  winner
}

fn fill_metrics(winner: &mut Metrics, loser: &Metrics) {
  if winner.daily_acres.is_none() {
    winner.daily_acres = loser.daily_acres;
  }
  if winner.percent_contained.is_none() {
    winner.percent_contained = loser.percent_contained;
  }
  if winner.personnel.is_none() {
    winner.personnel = loser.personnel;
  }
  if winner.cost_to_date.is_none() {
    winner.cost_to_date = loser.cost_to_date;
  }
  if winner.structures_destroyed.is_none() {
    winner.structures_destroyed = loser.structures_destroyed;
  }
}

/// Metrics only one feed ever reports must not ride along once a different
/// feed holds authority.
fn enforce_exclusive(metrics: &mut Metrics, authority: Source) {
  if authority != Source::FeedA {
    metrics.personnel = None;
    metrics.cost_to_date = None;
  }
  if authority != Source::FeedC {
    metrics.structures_destroyed = None;
  }
}

/// Later perimeter timestamp wins; a timestamp tie goes to the smaller
/// source id so the pick is order-independent.
pub fn latest_perimeter(
  a: Option<&PerimeterRef>,
  b: Option<&PerimeterRef>,
) -> Option<PerimeterRef> {
  match (a, b) {
    (None, None) => None,
    (Some(a), None) => Some(a.clone()),
    (None, Some(b)) => Some(b.clone()),
    (Some(a), Some(b)) => {
      let b_wins = b.modified_at > a.modified_at
        || (b.modified_at == a.modified_at && b.source_id < a.source_id);
      Some(if b_wins { b.clone() } else { a.clone() })
    }
  }
}
