//! Engine configuration with sane defaults, validated once at startup.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::types::Source;

/// Tunable thresholds for correlation and change detection. Immutable during
/// a cycle.
#[derive(Debug, Clone)]
pub struct Config {
  /// Max great-circle distance (miles) for two same-named fires to merge.
  pub max_correlation_distance_miles: f64,
  /// Acreage delta below this is cross-source rounding, not a real change.
  pub acreage_noise_threshold: f64,
  /// Only surface perimeter-only changes newer than this. `None` disables
  /// the cutoff.
  pub perimeter_after: Option<DateTime<Utc>>,
  /// Days before a stale canonical incident is pruned from the snapshot.
  pub retention_days: i64,
  /// Hours after which un-refreshed data is too old to surface this cycle.
  pub freshness_cutoff_hours: i64,
  /// Field-authority order for exact modified-time ties, most authoritative
  /// first. Feed A carries the richer schema and wins by default.
  pub source_priority: [Source; 3],
  /// Whether perimeter-only changes are worth surfacing at all.
  pub monitor_perimeters: bool,
  /// Include emerging-fire layers younger than 24 hours.
  pub include_emerging_new: bool,
  /// Include emerging-fire layers older than 24 hours.
  pub include_emerging_old: bool,
  /// Drop false-alarm incidents before dispatch.
  pub suppress_false_alarms: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_correlation_distance_miles: 30.0,
      acreage_noise_threshold: 1.1,
      perimeter_after: None,
      retention_days: 45,
      freshness_cutoff_hours: 72,
      source_priority: [Source::FeedA, Source::FeedB, Source::FeedC],
      monitor_perimeters: true,
      include_emerging_new: false,
      include_emerging_old: false,
      suppress_false_alarms: true,
    }
  }
}

impl Config {
  pub fn validate(&self) -> Result<(), EngineError> {
    if !self.max_correlation_distance_miles.is_finite() || self.max_correlation_distance_miles <= 0.0 {
      return Err(EngineError::validation(
        "max_correlation_distance_miles",
        "must be a positive number of miles",
      ));
    }
    if !self.acreage_noise_threshold.is_finite() || self.acreage_noise_threshold < 0.0 {
      return Err(EngineError::validation(
        "acreage_noise_threshold",
        "must be zero or a positive acreage",
      ));
    }
    if self.retention_days <= 0 {
      return Err(EngineError::validation(
        "retention_days",
        "must be at least one day",
      ));
    }
    if self.freshness_cutoff_hours <= 0 {
      return Err(EngineError::validation(
        "freshness_cutoff_hours",
        "must be at least one hour",
      ));
    }
    let [a, b, c] = self.source_priority;
    if a == b || a == c || b == c {
      return Err(EngineError::validation(
        "source_priority",
        "must list each source exactly once",
      ));
    }
    Ok(())
  }

  /// Rank of a source in the tie-break order; lower wins.
  pub fn source_rank(&self, source: Source) -> usize {
    self
      .source_priority
      .iter()
      .position(|s| *s == source)
      .unwrap_or(self.source_priority.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    assert!(Config::default().validate().is_ok());
  }

  #[test]
  fn duplicate_priority_rejected() {
    let config = Config {
      source_priority: [Source::FeedA, Source::FeedA, Source::FeedC],
      ..Config::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("source_priority"));
  }

  #[test]
  fn negative_noise_rejected() {
    let config = Config {
      acreage_noise_threshold: -1.0,
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn source_rank_follows_priority() {
    let config = Config {
      source_priority: [Source::FeedB, Source::FeedA, Source::FeedC],
      ..Config::default()
    };
    assert_eq!(config.source_rank(Source::FeedB), 0);
    assert_eq!(config.source_rank(Source::FeedA), 1);
    assert_eq!(config.source_rank(Source::FeedC), 2);
  }
}
