//! Normalize raw feed payloads into canonical internal Incident models.
//!
//! One normalizer per feed. Malformed records (missing identifier, name, or
//! modified time) are dropped with a warning and never abort the cycle.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::Config;
use crate::types::*;

const LAYER_LARGE: &str = "Large WF";
const LAYER_EMERGING_NEW: &str = "Emerging WF < 24 hours";
const LAYER_EMERGING_OLD: &str = "Emerging WF > 24 hours";

const FEED_C_ID_PREFIX: &str = "FEEDC-";
const FEED_C_FOREIGN_SUFFIX: &str = " (not a cal fire incident)";

/// Records accepted plus the count of malformed records dropped.
pub struct Normalized {
  pub incidents: Vec<Incident>,
  pub dropped: usize,
}

fn epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
}

fn clean(s: &Option<String>) -> Option<String> {
  s.as_ref()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

/// Feed A: layered feature sets. Emerging layers are included only when
/// configured. An ICS-209 report time supersedes the modified time when
/// present.
pub fn feed_a(payload: &FeedAPayload, config: &Config, now: DateTime<Utc>) -> Normalized {
  let provenance = payload
    .provenance
    .clone()
    .unwrap_or_else(|| Provenance::synthetic(Source::FeedA, now));

  let mut incidents = Vec::new();
  let mut dropped = 0;
  for layer in &payload.layers {
    let emerging = match layer.name.as_str() {
      LAYER_LARGE => false,
      LAYER_EMERGING_NEW if config.include_emerging_new => true,
      LAYER_EMERGING_OLD if config.include_emerging_old => true,
      _ => continue,
    };
    for feature in &layer.features {
      let attrs = &feature.attributes;
      let id = match clean(&attrs.unique_fire_identifier) {
        Some(id) => id,
        None => {
          warn!(source = %Source::FeedA, "dropping record without identifier");
          dropped += 1;
          continue;
        }
      };
      let name = match clean(&attrs.incident_name) {
        Some(name) => name,
        None => {
          warn!(source = %Source::FeedA, id = %id, "dropping record without name");
          dropped += 1;
          continue;
        }
      };
      // Report time beats modified time as the recency signal.
      let modified_ms = attrs.ics209_report_date_time.or(attrs.modified_on_date_time);
      let modified_at = match modified_ms.and_then(epoch_ms) {
        Some(ts) => ts,
        None => {
          warn!(source = %Source::FeedA, id = %id, "dropping record without modified time");
          dropped += 1;
          continue;
        }
      };
      incidents.push(Incident {
        source_id: SourceId(id),
        source: Source::FeedA,
        name,
        location: feature.geometry.as_ref().map(|p| Location { lat: p.y, lon: p.x }),
        modified_at,
        discovered_at: attrs.fire_discovery_date_time.and_then(epoch_ms),
        incident_type: clean(&attrs.incident_type_category),
        state: clean(&attrs.state),
        emerging,
        metrics: Metrics {
          daily_acres: attrs.daily_acres,
          percent_contained: attrs.percent_contained,
          personnel: attrs.total_incident_personnel,
          cost_to_date: attrs.estimated_cost_to_date,
          structures_destroyed: None,
        },
        perimeter: None,
        provenance: provenance.clone(),
      });
    }
  }
  Normalized { incidents, dropped }
}

/// Feed B: GeoJSON-style features with lowercase property keys.
pub fn feed_b(payload: &FeedBPayload, now: DateTime<Utc>) -> Normalized {
  let provenance = payload
    .provenance
    .clone()
    .unwrap_or_else(|| Provenance::synthetic(Source::FeedB, now));

  let mut incidents = Vec::new();
  let mut dropped = 0;
  for feature in &payload.features {
    let props = &feature.properties;
    let id = match clean(&props.uniquefireidentifier) {
      Some(id) => id,
      None => {
        warn!(source = %Source::FeedB, "dropping record without identifier");
        dropped += 1;
        continue;
      }
    };
    let name = match clean(&props.incidentname) {
      Some(name) => name,
      None => {
        warn!(source = %Source::FeedB, id = %id, "dropping record without name");
        dropped += 1;
        continue;
      }
    };
    let modified_at = match props.reportdatetime.and_then(epoch_ms) {
      Some(ts) => ts,
      None => {
        warn!(source = %Source::FeedB, id = %id, "dropping record without modified time");
        dropped += 1;
        continue;
      }
    };
    incidents.push(Incident {
      source_id: SourceId(id),
      source: Source::FeedB,
      name,
      location: feature.geometry.as_ref().map(|g| Location {
        lat: g.coordinates[1],
        lon: g.coordinates[0],
      }),
      modified_at,
      discovered_at: props.firediscoverydatetime.and_then(epoch_ms),
      incident_type: None,
      state: clean(&props.state),
      emerging: false,
      metrics: Metrics {
        daily_acres: props.acres,
        percent_contained: props.percentcontained,
        personnel: None,
        cost_to_date: None,
        structures_destroyed: None,
      },
      perimeter: None,
      provenance: provenance.clone(),
    });
  }
  Normalized { incidents, dropped }
}

/// Feed C: flat state-agency rows. Identifiers are prefixed so they never
/// collide with the federal identifier family, and the agency's
/// foreign-incident qualifier is stripped off the name.
pub fn feed_c(payload: &FeedCPayload, now: DateTime<Utc>) -> Normalized {
  let provenance = payload
    .provenance
    .clone()
    .unwrap_or_else(|| Provenance::synthetic(Source::FeedC, now));

  let mut incidents = Vec::new();
  let mut dropped = 0;
  for record in &payload.incidents {
    let id = match clean(&record.incident_id) {
      Some(id) => format!("{}{}", FEED_C_ID_PREFIX, id),
      None => {
        warn!(source = %Source::FeedC, "dropping record without identifier");
        dropped += 1;
        continue;
      }
    };
    let mut name = match clean(&record.incident_name) {
      Some(name) => name,
      None => {
        warn!(source = %Source::FeedC, id = %id, "dropping record without name");
        dropped += 1;
        continue;
      }
    };
    let mut note = None;
    if name.to_lowercase().ends_with(FEED_C_FOREIGN_SUFFIX) {
      name.truncate(name.len() - FEED_C_FOREIGN_SUFFIX.len());
      name = name.trim().to_string();
      note = Some("not a state-agency incident".to_string());
    }
    let modified_at = match record
      .incident_date_last_update
      .as_deref()
      .and_then(parse_feed_c_timestamp)
    {
      Some(ts) => ts,
      None => {
        warn!(source = %Source::FeedC, id = %id, "dropping record without modified time");
        dropped += 1;
        continue;
      }
    };
    let location = match (record.incident_latitude, record.incident_longitude) {
      (Some(lat), Some(lon)) => Some(Location { lat, lon }),
      _ => None,
    };
    let mut provenance = provenance.clone();
    provenance.note = note;
    incidents.push(Incident {
      source_id: SourceId(id),
      source: Source::FeedC,
      name,
      location,
      modified_at,
      discovered_at: None,
      incident_type: None,
      state: Some("CA".to_string()),
      emerging: false,
      metrics: Metrics {
        daily_acres: record.incident_acres_burned,
        percent_contained: record.incident_containment,
        personnel: None,
        cost_to_date: None,
        structures_destroyed: record.structures_destroyed,
      },
      perimeter: None,
      provenance,
    });
  }
  Normalized { incidents, dropped }
}

/// "YYYY-MM-DD HH:MM:SS", already shifted to UTC by the fetch adapter.
fn parse_feed_c_timestamp(s: &str) -> Option<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
    .ok()
    .map(|naive| naive.and_utc())
}

/// Perimeter summaries keyed by the feeds' identifier family. Features
/// without an identifier or timestamp are dropped.
pub fn perimeters(payload: &PerimeterPayload) -> BTreeMap<SourceId, PerimeterRef> {
  let mut out = BTreeMap::new();
  for feature in &payload.features {
    let id = match clean(&feature.uniquefireidentifier) {
      Some(id) => id,
      None => {
        warn!("dropping perimeter without identifier");
        continue;
      }
    };
    let modified_at = match feature.perimeterdatetime.and_then(epoch_ms) {
      Some(ts) => ts,
      None => {
        warn!(id = %id, "dropping perimeter without timestamp");
        continue;
      }
    };
    out.insert(
      SourceId(id.clone()),
      PerimeterRef {
        source_id: SourceId(id),
        acres: feature.gisacres,
        modified_at,
        complex_name: clean(&feature.complexname),
        inciweb_id: clean(&feature.inciwebid),
      },
    );
  }
  out
}
