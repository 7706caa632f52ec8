//! Write-once ledger of emitted update ids, the data-integrity guard behind
//! at-most-once delivery. A repeated id is an anomaly: recorded for
//! inspection, never re-delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
  pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
  pub update_id: String,
  pub detected_at: DateTime<Utc>,
}

/// Durable record of every update id ever emitted, plus the replays caught.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateLedger {
  #[serde(default)]
  emitted: BTreeMap<String, LedgerEntry>,
  #[serde(default)]
  anomalies: Vec<AnomalyRecord>,
}

impl UpdateLedger {
  pub fn contains(&self, update_id: &str) -> bool {
    self.emitted.contains_key(update_id)
  }

  /// Record an id as emitted. Returns false (and records nothing) if the id
  /// was already present; entries are write-once.
  pub fn record(&mut self, update_id: &str, at: DateTime<Utc>) -> bool {
    if self.contains(update_id) {
      return false;
    }
    self
      .emitted
      .insert(update_id.to_string(), LedgerEntry { recorded_at: at });
    true
  }

  pub fn record_anomaly(&mut self, update_id: &str, at: DateTime<Utc>) {
    self.anomalies.push(AnomalyRecord {
      update_id: update_id.to_string(),
      detected_at: at,
    });
  }

  pub fn emitted_count(&self) -> usize {
    self.emitted.len()
  }

  pub fn anomalies(&self) -> &[AnomalyRecord] {
    &self.anomalies
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 8, 20, 12, 0, 0).unwrap()
  }

  #[test]
  fn record_is_write_once() {
    let mut ledger = UpdateLedger::default();
    assert!(ledger.record("u-1", at()));
    assert!(!ledger.record("u-1", at()));
    assert_eq!(ledger.emitted_count(), 1);
  }

  #[test]
  fn anomalies_accumulate_separately() {
    let mut ledger = UpdateLedger::default();
    ledger.record("u-1", at());
    ledger.record_anomaly("u-1", at());
    ledger.record_anomaly("u-1", at());
    assert_eq!(ledger.emitted_count(), 1);
    assert_eq!(ledger.anomalies().len(), 2);
  }

  #[test]
  fn round_trips_through_yaml() {
    let mut ledger = UpdateLedger::default();
    ledger.record("u-1", at());
    ledger.record_anomaly("u-2", at());
    let doc = serde_yaml::to_string(&ledger).unwrap();
    let back: UpdateLedger = serde_yaml::from_str(&doc).unwrap();
    assert_eq!(ledger, back);
  }
}
