//! Snapshot differ: structural field diff between a canonical incident and
//! its previous-cycle version, plus the materiality classifier.
//!
//! Classification order is load-bearing: pruning always wins over
//! suppression, and every suppression reason stays distinguishable.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::EngineError;
use crate::types::{CanonicalIncident, Classification, FieldChange, FieldDiff, SuppressReason};

const PATH_DAILY_ACRES: &str = "metrics.daily_acres";
const PATH_PERCENT_CONTAINED: &str = "metrics.percent_contained";
const PATH_PERIMETER_ACRES: &str = "perimeter.acres";
const PATH_PERIMETER_MODIFIED: &str = "perimeter.modified_at";

/// Compute the dotted-path diff between the previous and current canonical
/// state. Provenance and correlation bookkeeping are audit data, not change
/// signal, and are excluded.
pub fn diff(
  previous: Option<&CanonicalIncident>,
  current: &CanonicalIncident,
) -> Result<FieldDiff, EngineError> {
  let old = match previous {
    Some(prev) => diff_view(prev)?,
    None => Value::Object(Map::new()),
  };
  let new = diff_view(current)?;
  let mut out = FieldDiff::new();
  walk("", &old, &new, &mut out);
  Ok(out)
}

fn diff_view(incident: &CanonicalIncident) -> Result<Value, EngineError> {
  let mut value = serde_json::to_value(incident)?;
  if let Value::Object(map) = &mut value {
    map.remove("provenance");
    map.remove("correlation_ids");
    map.remove("last_emitted_update_id");
  }
  Ok(value)
}

fn walk(prefix: &str, old: &Value, new: &Value, out: &mut FieldDiff) {
  if old.is_object() || new.is_object() {
    let empty = Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);
    let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
      let path = if prefix.is_empty() {
        key.clone()
      } else {
        format!("{}.{}", prefix, key)
      };
      walk(
        &path,
        old_map.get(key).unwrap_or(&Value::Null),
        new_map.get(key).unwrap_or(&Value::Null),
        out,
      );
    }
    return;
  }
  if old != new {
    out.insert(
      prefix.to_string(),
      FieldChange {
        old: old.clone(),
        new: new.clone(),
      },
    );
  }
}

fn changed(diff: &FieldDiff, path: &str) -> bool {
  diff.contains_key(path)
}

fn acreage_delta(diff: &FieldDiff) -> Option<f64> {
  let change = diff.get(PATH_DAILY_ACRES)?;
  let old = change.old.as_f64()?;
  let new = change.new.as_f64()?;
  Some((new - old).abs())
}

/// Classify a cycle diff against the materiality rules, in priority order.
pub fn classify(
  diff: &FieldDiff,
  current: &CanonicalIncident,
  now: DateTime<Utc>,
  config: &Config,
) -> Classification {
  // Pruning wins over everything else, diff contents included.
  let retention_horizon = now - Duration::days(config.retention_days);
  if current.modified_at < retention_horizon {
    return Classification::Prune;
  }

  let acres_changed = changed(diff, PATH_DAILY_ACRES);
  let contained_changed = changed(diff, PATH_PERCENT_CONTAINED);
  let perim_acres_changed = changed(diff, PATH_PERIMETER_ACRES);
  let perim_ts_changed = changed(diff, PATH_PERIMETER_MODIFIED);

  if !acres_changed && !contained_changed && !perim_acres_changed {
    if !config.monitor_perimeters || !perim_ts_changed {
      return Classification::Suppressed(SuppressReason::Unchanged);
    }
    match &current.perimeter {
      None => return Classification::Suppressed(SuppressReason::Unchanged),
      Some(perimeter) => {
        if let Some(cutoff) = config.perimeter_after {
          if perimeter.modified_at <= cutoff {
            return Classification::Suppressed(SuppressReason::PerimeterBeforeCutoff);
          }
        }
      }
    }
  }

  // A lone sub-threshold acreage wiggle between feeds is rounding, not news.
  if !contained_changed && !perim_ts_changed {
    if let Some(delta) = acreage_delta(diff) {
      if delta < config.acreage_noise_threshold {
        return Classification::Suppressed(SuppressReason::AcreageNoise);
      }
    }
  }

  let freshness_horizon = now - Duration::hours(config.freshness_cutoff_hours);
  let perimeter_fresh = current
    .perimeter
    .as_ref()
    .is_some_and(|p| p.modified_at >= freshness_horizon);
  if current.modified_at < freshness_horizon && !perimeter_fresh {
    return Classification::Suppressed(SuppressReason::NotFresh);
  }

  Classification::Material
}
