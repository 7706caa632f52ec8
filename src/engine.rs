//! Cycle orchestration: normalize -> correlate/merge -> coalesce ->
//! perimeter attach -> diff/classify -> lifecycle -> commit.
//!
//! A cycle computes the next world state off to the side and commits it
//! all-or-nothing; an error mid-cycle leaves the previous snapshot and
//! ledger untouched. Only one cycle may mutate state at a time.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diff;
use crate::error::EngineError;
use crate::ledger::UpdateLedger;
use crate::lifecycle;
use crate::merge;
use crate::normalize::{self, Normalized};
use crate::snapshot::{DocumentMeta, LedgerDocument, SnapshotDocument, SNAPSHOT_VERSION};
use crate::types::*;

/// The correlation engine. Holds the canonical snapshot and update ledger
/// across cycles.
pub struct Engine {
  config: Config,
  snapshot: CanonicalMap,
  ledger: UpdateLedger,
  cycle: u64,
  cycling: AtomicBool,
}

/// Where an incoming record lands in the canonical snapshot.
enum Target {
  Existing(SourceId),
  New,
  Ambiguous(usize),
}

impl Engine {
  pub fn new(config: Config) -> Result<Self, EngineError> {
    config.validate()?;
    Ok(Self {
      config,
      snapshot: CanonicalMap::new(),
      ledger: UpdateLedger::default(),
      cycle: 0,
      cycling: AtomicBool::new(false),
    })
  }

  /// Resume from persisted documents (either may be absent on first run).
  pub fn from_documents(
    config: Config,
    snapshot: Option<SnapshotDocument>,
    ledger: Option<LedgerDocument>,
  ) -> Result<Self, EngineError> {
    let mut engine = Self::new(config)?;
    if let Some(doc) = snapshot {
      engine.cycle = doc.meta.cycle;
      engine.snapshot = doc.incidents;
    }
    if let Some(doc) = ledger {
      engine.ledger = doc.ledger;
    }
    Ok(engine)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn snapshot(&self) -> &CanonicalMap {
    &self.snapshot
  }

  pub fn ledger(&self) -> &UpdateLedger {
    &self.ledger
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn snapshot_document(&self, generated_at: DateTime<Utc>) -> SnapshotDocument {
    SnapshotDocument {
      meta: DocumentMeta {
        version: SNAPSHOT_VERSION,
        generated_at,
        cycle: self.cycle,
      },
      incidents: self.snapshot.clone(),
    }
  }

  pub fn ledger_document(&self, generated_at: DateTime<Utc>) -> LedgerDocument {
    LedgerDocument {
      meta: DocumentMeta {
        version: SNAPSHOT_VERSION,
        generated_at,
        cycle: self.cycle,
      },
      ledger: self.ledger.clone(),
    }
  }

  /// Run one refresh cycle against the previous snapshot and return the
  /// update events plus audit counts. State is only replaced on success.
  pub fn run_cycle(
    &mut self,
    input: &CycleInput,
    now: DateTime<Utc>,
  ) -> Result<CycleReport, EngineError> {
    if self
      .cycling
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return Err(EngineError::CycleInProgress);
    }
    let result = self.run_cycle_inner(input, now);
    self.cycling.store(false, Ordering::SeqCst);
    result
  }

  fn run_cycle_inner(
    &mut self,
    input: &CycleInput,
    now: DateTime<Utc>,
  ) -> Result<CycleReport, EngineError> {
    let mut report = CycleReport::default();
    let mut next = self.snapshot.clone();

    // Source id -> canonical id claim index. Every source id belongs to at
    // most one canonical incident.
    let mut index: BTreeMap<SourceId, SourceId> = BTreeMap::new();
    for (cid, canonical) in &next {
      for sid in &canonical.correlation_ids {
        index.insert(sid.clone(), cid.clone());
      }
    }

    // Merge feeds in priority order; order does not affect the outcome, the
    // recency rule does, but it keeps the logs deterministic.
    for source in self.config.source_priority {
      let batch = match source {
        Source::FeedA => input
          .feed_a
          .as_ref()
          .map(|p| normalize::feed_a(p, &self.config, now)),
        Source::FeedB => input.feed_b.as_ref().map(|p| normalize::feed_b(p, now)),
        Source::FeedC => input.feed_c.as_ref().map(|p| normalize::feed_c(p, now)),
      };
      let Some(Normalized { mut incidents, dropped }) = batch else {
        debug!(source = %source, "no data from source this cycle");
        continue;
      };
      report.dropped_records += dropped;
      incidents.sort_by(|a, b| a.source_id.cmp(&b.source_id));

      for incident in &incidents {
        match self.find_target(&next, &index, incident) {
          Target::Existing(cid) => {
            let merged = merge::merge(next.get(&cid), incident, &self.config);
            index.insert(incident.source_id.clone(), cid.clone());
            next.insert(cid, merged);
            report.merged += 1;
          }
          Target::New => {
            let canonical = merge::merge(None, incident, &self.config);
            index.insert(incident.source_id.clone(), canonical.canonical_id.clone());
            next.insert(canonical.canonical_id.clone(), canonical);
            report.created += 1;
          }
          Target::Ambiguous(candidates) => {
            let err = EngineError::UnresolvedMerge {
              source_id: incident.source_id.to_string(),
              candidates,
            };
            warn!(source = %incident.source, "{err}; leaving record unmerged this cycle");
            report.unresolved.push(incident.source_id.clone());
          }
        }
      }
    }

    report.coalesced = merge::coalesce(&mut next, &self.config);

    if let Some(payload) = &input.perimeters {
      let perims = normalize::perimeters(payload);
      attach_perimeters(&mut next, &perims);
    }

    // Read-only analysis fans out per incident; one failure never blocks the
    // rest of the cycle.
    let previous = &self.snapshot;
    let config = &self.config;
    let entries: Vec<(&SourceId, &CanonicalIncident)> = next.iter().collect();
    let analyzed: Vec<Option<(SourceId, FieldDiff, Classification)>> = entries
      .par_iter()
      .map(|(cid, current)| match diff::diff(previous.get(*cid), current) {
        Ok(d) => {
          let classification = diff::classify(&d, current, now, config);
          Some(((*cid).clone(), d, classification))
        }
        Err(err) => {
          warn!(canonical_id = %cid, "diff failed, skipping incident this cycle: {err}");
          None
        }
      })
      .collect();

    // Lifecycle decisions serialize the write-once ledger updates.
    let mut ledger = self.ledger.clone();
    let mut events = Vec::new();
    for (cid, field_diff, classification) in analyzed.into_iter().flatten() {
      let Some(current) = next.get(&cid) else {
        continue;
      };
      let decision = lifecycle::process(current, classification, &mut ledger, now, &self.config);
      match decision.action {
        UpdateAction::Prune => {
          let was_known = self.snapshot.contains_key(&cid);
          if let Some(removed) = next.remove(&cid) {
            if was_known {
              info!(
                canonical_id = %cid,
                name = %removed.name,
                modified_at = %removed.modified_at,
                "pruned stale incident"
              );
            }
          }
          report.pruned += 1;
        }
        UpdateAction::Suppress(reason) => {
          debug!(canonical_id = %cid, ?reason, "suppressed");
          report.suppressed += 1;
        }
        UpdateAction::Filter(reason) => {
          debug!(canonical_id = %cid, ?reason, "filtered");
          report.filtered += 1;
        }
        UpdateAction::Anomaly => {
          warn!(
            canonical_id = %cid,
            update_id = %decision.update_id,
            "anomaly detected: repeating update, skipped"
          );
          report.anomalies += 1;
        }
        UpdateAction::Emit => {
          let is_new = !self.snapshot.contains_key(&cid);
          if let Some(current) = next.get_mut(&cid) {
            current.last_emitted_update_id = Some(decision.update_id.clone());
            events.push(UpdateEvent {
              update_id: decision.update_id,
              canonical_id: cid.clone(),
              priority: 0,
              is_new,
              incident: current.clone(),
              diff: field_diff,
            });
          }
        }
      }
    }

    lifecycle::assign_priorities(&mut events);
    report.material = events.len();
    report.events = events;

    // Commit: replace state only now that the whole cycle has computed.
    self.snapshot = next;
    self.ledger = ledger;
    self.cycle += 1;
    report.cycle = self.cycle;
    info!(
      cycle = report.cycle,
      created = report.created,
      merged = report.merged,
      coalesced = report.coalesced,
      pruned = report.pruned,
      suppressed = report.suppressed,
      material = report.material,
      anomalies = report.anomalies,
      "cycle complete"
    );
    Ok(report)
  }

  /// Locate the canonical incident an incoming record belongs to: first by
  /// explicit correlation-id claim, then by geo/name match. More than one
  /// match without a claim is ambiguous and never guessed at.
  fn find_target(
    &self,
    next: &CanonicalMap,
    index: &BTreeMap<SourceId, SourceId>,
    incident: &Incident,
  ) -> Target {
    if let Some(cid) = index.get(&incident.source_id) {
      return Target::Existing(cid.clone());
    }
    let candidates: Vec<SourceId> = next
      .values()
      .filter(|canonical| {
        crate::geo::matches(
          &canonical.match_key(),
          &incident.match_key(),
          self.config.max_correlation_distance_miles,
        )
      })
      .map(|canonical| canonical.canonical_id.clone())
      .collect();
    if candidates.len() > 1 {
      return Target::Ambiguous(candidates.len());
    }
    match candidates.into_iter().next() {
      Some(cid) => Target::Existing(cid),
      None => Target::New,
    }
  }
}

/// Attach perimeter records to canonical incidents: by correlation-id
/// family, then child perimeters that name this fire's complex. Always under
/// the perimeter's own recency clock.
fn attach_perimeters(next: &mut CanonicalMap, perims: &BTreeMap<SourceId, PerimeterRef>) {
  for canonical in next.values_mut() {
    let mut best = canonical.perimeter.clone();
    for sid in &canonical.correlation_ids {
      if let Some(perimeter) = perims.get(sid) {
        best = merge::latest_perimeter(best.as_ref(), Some(perimeter));
      }
    }
    let name = crate::geo::normalize_name(&canonical.name);
    for perimeter in perims.values() {
      if let Some(complex) = &perimeter.complex_name {
        if crate::geo::normalize_name(complex) == name {
          best = merge::latest_perimeter(best.as_ref(), Some(perimeter));
        }
      }
    }
    canonical.perimeter = best;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 8, 20, 12, 0, 0).unwrap()
  }

  fn input(value: serde_json::Value) -> CycleInput {
    serde_json::from_value(value).unwrap()
  }

  fn feed_a_camp(acres: f64, modified_ms: i64) -> serde_json::Value {
    json!({
      "layers": [{
        "name": "Large WF",
        "features": [{
          "geometry": {"x": -121.43, "y": 39.79},
          "attributes": {
            "UniqueFireIdentifier": "2020-CABTU-016737",
            "IncidentName": "Camp",
            "DailyAcres": acres,
            "PercentContained": 25.0,
            "ModifiedOnDateTime": modified_ms,
            "State": "CA"
          }
        }]
      }]
    })
  }

  #[test]
  fn first_cycle_creates_and_emits() {
    let mut engine = Engine::new(Config::default()).unwrap();
    // 2020-08-20 10:00:00 UTC.
    let report = engine
      .run_cycle(&input(json!({"feed_a": feed_a_camp(1000.0, 1597917600000i64)})), now())
      .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.material, 1);
    assert_eq!(report.events.len(), 1);
    assert!(report.events[0].is_new);
    assert_eq!(engine.snapshot().len(), 1);
    let canonical = engine.snapshot().values().next().unwrap();
    assert_eq!(
      canonical.last_emitted_update_id.as_deref(),
      Some(report.events[0].update_id.as_str())
    );
  }

  #[test]
  fn same_state_next_cycle_is_suppressed_not_anomalous() {
    let mut engine = Engine::new(Config::default()).unwrap();
    let payload = json!({"feed_a": feed_a_camp(1000.0, 1597917600000i64)});
    engine.run_cycle(&input(payload.clone()), now()).unwrap();
    let report = engine.run_cycle(&input(payload), now()).unwrap();
    assert_eq!(report.material, 0);
    assert_eq!(report.anomalies, 0);
    assert_eq!(report.suppressed, 1);
  }

  #[test]
  fn replaying_previous_snapshot_pair_yields_anomaly() {
    let config = Config::default();
    let mut engine = Engine::new(config.clone()).unwrap();
    let payload = json!({"feed_a": feed_a_camp(1000.0, 1597917600000i64)});
    let first = engine.run_cycle(&input(payload.clone()), now()).unwrap();
    assert_eq!(first.material, 1);

    // Reset to the pre-cycle snapshot but keep the ledger: the same input
    // must classify Material again, then be caught as a replay.
    let mut replayed = Engine::from_documents(
      config,
      None,
      Some(engine.ledger_document(now())),
    )
    .unwrap();
    let second = replayed.run_cycle(&input(payload), now()).unwrap();
    assert_eq!(second.material, 0);
    assert_eq!(second.anomalies, 1);
  }

  #[test]
  fn cross_feed_records_merge_into_one_canonical() {
    let mut engine = Engine::new(Config::default()).unwrap();
    let payload = json!({
      "feed_a": feed_a_camp(1000.0, 1597917600000i64),
      "feed_b": {
        "features": [{
          "geometry": {"coordinates": [-121.44, 39.80]},
          "properties": {
            "uniquefireidentifier": "GM-778",
            "incidentname": "Camp Fire",
            "acres": 1200.0,
            // One hour later than feed A.
            "reportdatetime": 1597921200000i64
          }
        }]
      }
    });
    let report = engine.run_cycle(&input(payload), now()).unwrap();

    assert_eq!(engine.snapshot().len(), 1, "correlated into one canonical");
    assert_eq!(report.created, 1);
    assert_eq!(report.merged, 1);
    let canonical = engine.snapshot().values().next().unwrap();
    assert_eq!(canonical.metrics.daily_acres, Some(1200.0), "fresher feed wins");
    assert!(canonical.correlation_ids.contains(&SourceId::from("GM-778")));
    assert!(canonical
      .correlation_ids
      .contains(&SourceId::from("2020-CABTU-016737")));
  }

  #[test]
  fn correlation_id_claim_survives_source_churn() {
    let mut engine = Engine::new(Config::default()).unwrap();
    engine
      .run_cycle(
        &input(json!({
          "feed_a": feed_a_camp(1000.0, 1597917600000i64),
          "feed_b": {
            "features": [{
              "geometry": {"coordinates": [-121.44, 39.80]},
              "properties": {
                "uniquefireidentifier": "GM-778",
                "incidentname": "Camp Fire",
                "reportdatetime": 1597921200000i64
              }
            }]
          }
        })),
        now(),
      )
      .unwrap();
    let before: Vec<_> = engine.snapshot().keys().cloned().collect();

    // Feed A goes quiet; feed B keeps reporting under its own id only.
    engine
      .run_cycle(
        &input(json!({
          "feed_b": {
            "features": [{
              "geometry": {"coordinates": [-121.44, 39.80]},
              "properties": {
                "uniquefireidentifier": "GM-778",
                "incidentname": "Camp Fire",
                "acres": 5000.0,
                "reportdatetime": 1597924800000i64
              }
            }]
          }
        })),
        now(),
      )
      .unwrap();

    let after: Vec<_> = engine.snapshot().keys().cloned().collect();
    assert_eq!(before, after, "canonical id stays stable across source churn");
    assert_eq!(engine.snapshot().len(), 1);
  }

  #[test]
  fn ambiguous_match_is_left_unmerged() {
    // Two distinct canonicals share the name but sit far apart; a third
    // record between them matches both.
    let seed = json!({
      "feed_a": {
        "layers": [{
          "name": "Large WF",
          "features": [
            {
              "geometry": {"x": -121.40, "y": 39.70},
              "attributes": {
                "UniqueFireIdentifier": "A-NORTH",
                "IncidentName": "Twin",
                "ModifiedOnDateTime": 1597917600000i64
              }
            },
            {
              "geometry": {"x": -121.40, "y": 40.10},
              "attributes": {
                "UniqueFireIdentifier": "A-SOUTH",
                "IncidentName": "Twin",
                "ModifiedOnDateTime": 1597917600000i64
              }
            }
          ]
        }]
      }
    });
    // ~28 miles apart: each is beyond coalescing reach of the other only if
    // the threshold is tightened.
    let config = Config {
      max_correlation_distance_miles: 25.0,
      ..Config::default()
    };
    let mut engine2 = Engine::new(config).unwrap();
    engine2.run_cycle(&input(seed), now()).unwrap();
    assert_eq!(engine2.snapshot().len(), 2);

    let probe = json!({
      "feed_b": {
        "features": [{
          "geometry": {"coordinates": [-121.40, 39.90]},
          "properties": {
            "uniquefireidentifier": "GM-TWIN",
            "incidentname": "Twin Fire",
            "reportdatetime": 1597921200000i64
          }
        }]
      }
    });
    let report = engine2.run_cycle(&input(probe), now()).unwrap();
    assert_eq!(report.unresolved, vec![SourceId::from("GM-TWIN")]);
    assert_eq!(engine2.snapshot().len(), 2, "no guessing");
  }

  #[test]
  fn zero_source_cycle_completes_without_corruption() {
    let mut engine = Engine::new(Config::default()).unwrap();
    engine
      .run_cycle(&input(json!({"feed_a": feed_a_camp(1000.0, 1597917600000i64)})), now())
      .unwrap();
    let before = engine.snapshot().clone();

    let report = engine.run_cycle(&CycleInput::default(), now()).unwrap();
    assert_eq!(report.created + report.merged, 0);
    assert_eq!(report.material, 0);
    assert_eq!(engine.snapshot().len(), before.len());
  }

  #[test]
  fn stale_incident_is_pruned_from_next_snapshot() {
    let mut engine = Engine::new(Config::default()).unwrap();
    engine
      .run_cycle(&input(json!({"feed_a": feed_a_camp(1000.0, 1597917600000i64)})), now())
      .unwrap();
    assert_eq!(engine.snapshot().len(), 1);

    // 50 days later, the feed has gone quiet past the retention horizon.
    let later = Utc.with_ymd_and_hms(2020, 10, 9, 12, 0, 0).unwrap();
    let report = engine.run_cycle(&CycleInput::default(), later).unwrap();
    assert_eq!(report.pruned, 1);
    assert!(engine.snapshot().is_empty());
  }

  #[test]
  fn perimeter_attaches_by_correlation_id_and_complex_name() {
    let mut engine = Engine::new(Config::default()).unwrap();
    let payload = json!({
      "feed_a": feed_a_camp(1000.0, 1597917600000i64),
      "perimeters": {
        "features": [
          {
            "uniquefireidentifier": "2020-CABTU-016737",
            "perimeterdatetime": 1597918000000i64,
            "gisacres": 990.0
          },
          {
            "uniquefireidentifier": "OTHER-CHILD",
            "perimeterdatetime": 1597919000000i64,
            "gisacres": 1010.0,
            "complexname": "Camp Complex"
          }
        ]
      }
    });
    engine.run_cycle(&input(payload), now()).unwrap();
    let canonical = engine.snapshot().values().next().unwrap();
    let perimeter = canonical.perimeter.as_ref().unwrap();
    // The complex child carries the later perimeter clock.
    assert_eq!(perimeter.acres, Some(1010.0));
  }

  #[test]
  fn events_ordered_by_descending_acreage() {
    let mut engine = Engine::new(Config::default()).unwrap();
    let payload = json!({
      "feed_a": {
        "layers": [{
          "name": "Large WF",
          "features": [
            {
              "geometry": {"x": -120.0, "y": 38.0},
              "attributes": {
                "UniqueFireIdentifier": "A-SMALL",
                "IncidentName": "Creek",
                "DailyAcres": 50.0,
                "ModifiedOnDateTime": 1597917600000i64
              }
            },
            {
              "geometry": {"x": -122.0, "y": 41.0},
              "attributes": {
                "UniqueFireIdentifier": "A-BIG",
                "IncidentName": "August",
                "DailyAcres": 90000.0,
                "ModifiedOnDateTime": 1597917600000i64
              }
            }
          ]
        }]
      }
    });
    let report = engine.run_cycle(&input(payload), now()).unwrap();
    assert_eq!(report.events.len(), 2);
    assert_eq!(report.events[0].canonical_id, SourceId::from("A-BIG"));
    assert_eq!(report.events[0].priority, 0);
    assert_eq!(report.events[1].priority, 1);
  }
}
