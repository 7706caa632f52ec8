//! Lifecycle manager: deterministic update ids, replay/anomaly handling,
//! post-materiality display filters, and dispatch priority.

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::geo;
use crate::ledger::UpdateLedger;
use crate::types::{
  CanonicalIncident, Classification, FilterReason, UpdateAction, UpdateDecision, UpdateEvent,
};

const PERIM_NONE: &str = "NONE";
const TIME_FMT: &str = "%Y-%m-%dT%H:%MZ";

/// Hours an emerging fire may go without metrics before it reads as stale.
const EMERGING_INFO_GRACE_HOURS: i64 = 3;

/// Build the stable update id for the current authoritative state.
///
/// Two cycles observing byte-identical state produce the same id; the id is
/// the write-once ledger key. Readable prefix, blake3 suffix over the
/// (modified, perimeter-modified, canonical id, normalized name, source)
/// tuple.
pub fn update_id(current: &CanonicalIncident) -> String {
  let modified = current.modified_at.format(TIME_FMT).to_string();
  let perim = current
    .perimeter
    .as_ref()
    .map(|p| p.modified_at.format(TIME_FMT).to_string())
    .unwrap_or_else(|| PERIM_NONE.to_string());
  let compact: String = current
    .name
    .chars()
    .filter(|c| c.is_ascii_alphanumeric())
    .collect();

  let mut hasher = blake3::Hasher::new();
  hasher.update(modified.as_bytes());
  hasher.update(b"|");
  hasher.update(perim.as_bytes());
  hasher.update(b"|");
  hasher.update(current.canonical_id.as_str().as_bytes());
  hasher.update(b"|");
  hasher.update(geo::normalize_name(&current.name).as_bytes());
  hasher.update(b"|");
  hasher.update(current.source.label().as_bytes());
  let hex = hasher.finalize().to_hex();

  format!(
    "Update-{}-PER-{}-of-{}-named-{}-{}",
    modified,
    perim,
    current.canonical_id,
    compact,
    &hex[..8]
  )
}

/// Veto a material update that is real but not worth surfacing: false
/// alarms, and emerging fires that never picked up any metrics.
pub fn display_filter(current: &CanonicalIncident, config: &Config) -> Option<FilterReason> {
  if config.suppress_false_alarms {
    if current.incident_type.as_deref() == Some("FA") {
      return Some(FilterReason::FalseAlarmType);
    }
    let name = current.name.to_lowercase();
    if name.starts_with("fa ") || (name.contains("false") && name.contains("alarm")) {
      return Some(FilterReason::FalseAlarmName);
    }
  }
  if current.emerging
    && current.metrics.daily_acres.is_none()
    && current.metrics.percent_contained.is_none()
  {
    if let Some(discovered) = current.discovered_at {
      if current.modified_at - discovered > Duration::hours(EMERGING_INFO_GRACE_HOURS) {
        return Some(FilterReason::EmergingWithoutInfo);
      }
    }
  }
  None
}

/// Decide the terminal per-cycle action for one classified incident.
///
/// Material updates pass the display filters, then the write-once ledger:
/// a fresh id is recorded and emitted, a known id is an anomaly. Filtered
/// updates never consume a ledger slot.
pub fn process(
  current: &CanonicalIncident,
  classification: Classification,
  ledger: &mut UpdateLedger,
  now: DateTime<Utc>,
  config: &Config,
) -> UpdateDecision {
  let update_id = update_id(current);
  let action = match classification {
    Classification::Prune => UpdateAction::Prune,
    Classification::Suppressed(reason) => UpdateAction::Suppress(reason),
    Classification::Material => match display_filter(current, config) {
      Some(reason) => UpdateAction::Filter(reason),
      None => {
        if ledger.record(&update_id, now) {
          UpdateAction::Emit
        } else {
          ledger.record_anomaly(&update_id, now);
          UpdateAction::Anomaly
        }
      }
    },
  };
  UpdateDecision {
    canonical_id: current.canonical_id.clone(),
    update_id,
    action,
  }
}

/// Total dispatch order for material updates: biggest fire first, canonical
/// id as the stable fallback. Ordering only; correctness never depends on it.
pub fn assign_priorities(events: &mut [UpdateEvent]) {
  events.sort_by(|a, b| {
    let a_acres = a.incident.metrics.daily_acres.unwrap_or(0.0);
    let b_acres = b.incident.metrics.daily_acres.unwrap_or(0.0);
    b_acres
      .partial_cmp(&a_acres)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| a.canonical_id.cmp(&b.canonical_id))
  });
  for (rank, event) in events.iter_mut().enumerate() {
    event.priority = rank as u64;
  }
}
