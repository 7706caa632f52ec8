//! Canonical snapshot persistence: a YAML document with a metadata header
//! and a body mapping canonical id -> canonical incident, plus the update
//! ledger document. Both are replaced atomically (temp file + rename) so a
//! cycle that aborts mid-write leaves the previous state intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::ledger::UpdateLedger;
use crate::types::CanonicalMap;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
  pub version: u32,
  pub generated_at: DateTime<Utc>,
  pub cycle: u64,
}

/// World state as of the end of a cycle, as persisted between process runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
  pub meta: DocumentMeta,
  pub incidents: CanonicalMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
  pub meta: DocumentMeta,
  pub ledger: UpdateLedger,
}

fn atomic_write(path: &Path, contents: &str) -> Result<(), EngineError> {
  let tmp = path.with_extension("tmp");
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn check_version(meta: &DocumentMeta) -> Result<(), EngineError> {
  if meta.version != SNAPSHOT_VERSION {
    return Err(EngineError::SnapshotVersion {
      found: meta.version,
      expected: SNAPSHOT_VERSION,
    });
  }
  Ok(())
}

pub fn save_snapshot(path: &Path, document: &SnapshotDocument) -> Result<(), EngineError> {
  atomic_write(path, &serde_yaml::to_string(document)?)
}

pub fn load_snapshot(path: &Path) -> Result<SnapshotDocument, EngineError> {
  let document: SnapshotDocument = serde_yaml::from_str(&fs::read_to_string(path)?)?;
  check_version(&document.meta)?;
  Ok(document)
}

pub fn save_ledger(path: &Path, document: &LedgerDocument) -> Result<(), EngineError> {
  atomic_write(path, &serde_yaml::to_string(document)?)
}

pub fn load_ledger(path: &Path) -> Result<LedgerDocument, EngineError> {
  let document: LedgerDocument = serde_yaml::from_str(&fs::read_to_string(path)?)?;
  check_version(&document.meta)?;
  Ok(document)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{CanonicalIncident, Incident, Metrics, Provenance, Source, SourceId};
  use chrono::TimeZone;

  fn generated_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 8, 20, 12, 0, 0).unwrap()
  }

  fn sample_map() -> CanonicalMap {
    let incident = Incident {
      source_id: SourceId::from("2020-CABTU-016737"),
      source: Source::FeedA,
      name: "Camp".into(),
      location: None,
      modified_at: generated_at(),
      discovered_at: None,
      incident_type: None,
      state: Some("CA".into()),
      emerging: false,
      metrics: Metrics {
        daily_acres: Some(1000.0),
        ..Metrics::default()
      },
      perimeter: None,
      provenance: Provenance::synthetic(Source::FeedA, generated_at()),
    };
    let canonical = CanonicalIncident::from_incident(&incident);
    let mut map = CanonicalMap::new();
    map.insert(canonical.canonical_id.clone(), canonical);
    map
  }

  #[test]
  fn snapshot_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let document = SnapshotDocument {
      meta: DocumentMeta {
        version: SNAPSHOT_VERSION,
        generated_at: generated_at(),
        cycle: 7,
      },
      incidents: sample_map(),
    };
    save_snapshot(&path, &document).unwrap();
    let loaded = load_snapshot(&path).unwrap();
    assert_eq!(document, loaded);
  }

  #[test]
  fn save_replaces_rather_than_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let mut document = SnapshotDocument {
      meta: DocumentMeta {
        version: SNAPSHOT_VERSION,
        generated_at: generated_at(),
        cycle: 1,
      },
      incidents: sample_map(),
    };
    save_snapshot(&path, &document).unwrap();
    document.meta.cycle = 2;
    document.incidents.clear();
    save_snapshot(&path, &document).unwrap();
    let loaded = load_snapshot(&path).unwrap();
    assert_eq!(loaded.meta.cycle, 2);
    assert!(loaded.incidents.is_empty());
  }

  #[test]
  fn unknown_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let document = SnapshotDocument {
      meta: DocumentMeta {
        version: 99,
        generated_at: generated_at(),
        cycle: 0,
      },
      incidents: CanonicalMap::new(),
    };
    save_snapshot(&path, &document).unwrap();
    let err = load_snapshot(&path).unwrap_err();
    assert!(err.to_string().contains("version"));
  }

  #[test]
  fn ledger_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.yaml");
    let mut ledger = UpdateLedger::default();
    ledger.record("Update-x", generated_at());
    let document = LedgerDocument {
      meta: DocumentMeta {
        version: SNAPSHOT_VERSION,
        generated_at: generated_at(),
        cycle: 1,
      },
      ledger,
    };
    save_ledger(&path, &document).unwrap();
    let loaded = load_ledger(&path).unwrap();
    assert_eq!(document, loaded);
  }
}
