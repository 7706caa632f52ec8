//! Core types for the fire incident engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Source enum
// ---------------------------------------------------------------------------

/// The data feed a record came from. Field authority between feeds is decided
/// by recency with a configured priority order for exact timestamp ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
  FeedA,
  FeedB,
  FeedC,
}

impl Source {
  pub fn label(self) -> &'static str {
    match self {
      Self::FeedA => "feed_a",
      Self::FeedB => "feed_b",
      Self::FeedC => "feed_c",
    }
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A source-scoped incident identifier (the feed's native incident key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for SourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for SourceId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

// ---------------------------------------------------------------------------
// Inbound types (JSON contract — what the caller sends per cycle)
// ---------------------------------------------------------------------------

/// One cycle's worth of raw feed payloads. Absent feeds contribute nothing
/// this cycle; previous canonical values survive. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleInput {
  /// Cycle wall-clock; the binary defaults this to the current time.
  #[serde(default)]
  pub now: Option<DateTime<Utc>>,
  #[serde(default)]
  pub feed_a: Option<FeedAPayload>,
  #[serde(default)]
  pub feed_b: Option<FeedBPayload>,
  #[serde(default)]
  pub feed_c: Option<FeedCPayload>,
  #[serde(default)]
  pub perimeters: Option<PerimeterPayload>,
}

/// Feed A: layered feature sets keyed by incident attributes (situational
/// awareness service). Coordinates are WGS84 lon/lat.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedAPayload {
  pub layers: Vec<FeedALayer>,
  #[serde(default)]
  pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedALayer {
  pub name: String,
  pub features: Vec<FeedAFeature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedAFeature {
  #[serde(default)]
  pub geometry: Option<FeedAPoint>,
  pub attributes: FeedAAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedAPoint {
  pub x: f64,
  pub y: f64,
}

/// Feed A attribute bag. Datetimes are epoch milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedAAttributes {
  #[serde(rename = "UniqueFireIdentifier", default)]
  pub unique_fire_identifier: Option<String>,
  #[serde(rename = "IncidentName", default)]
  pub incident_name: Option<String>,
  #[serde(rename = "DailyAcres", default)]
  pub daily_acres: Option<f64>,
  #[serde(rename = "PercentContained", default)]
  pub percent_contained: Option<f64>,
  #[serde(rename = "TotalIncidentPersonnel", default)]
  pub total_incident_personnel: Option<u32>,
  #[serde(rename = "EstimatedCostToDate", default)]
  pub estimated_cost_to_date: Option<f64>,
  #[serde(rename = "ModifiedOnDateTime", default)]
  pub modified_on_date_time: Option<i64>,
  /// When present this report time supersedes the modified time.
  #[serde(rename = "ICS209ReportDateTime", default)]
  pub ics209_report_date_time: Option<i64>,
  #[serde(rename = "FireDiscoveryDateTime", default)]
  pub fire_discovery_date_time: Option<i64>,
  #[serde(rename = "IncidentTypeCategory", default)]
  pub incident_type_category: Option<String>,
  #[serde(rename = "State", default)]
  pub state: Option<String>,
}

/// Feed B: GeoJSON-style features with lowercase property keys
/// (federal geospatial service). Coordinates are [lon, lat].
#[derive(Debug, Clone, Deserialize)]
pub struct FeedBPayload {
  pub features: Vec<FeedBFeature>,
  #[serde(default)]
  pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedBFeature {
  #[serde(default)]
  pub geometry: Option<FeedBGeometry>,
  pub properties: FeedBProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedBGeometry {
  pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedBProperties {
  #[serde(default)]
  pub uniquefireidentifier: Option<String>,
  #[serde(default)]
  pub incidentname: Option<String>,
  #[serde(default)]
  pub acres: Option<f64>,
  #[serde(default)]
  pub percentcontained: Option<f64>,
  /// Epoch milliseconds.
  #[serde(default)]
  pub reportdatetime: Option<i64>,
  #[serde(default)]
  pub firediscoverydatetime: Option<i64>,
  #[serde(default)]
  pub state: Option<String>,
}

/// Feed C: flat state-agency records (already parsed from CSV upstream).
#[derive(Debug, Clone, Deserialize)]
pub struct FeedCPayload {
  pub incidents: Vec<FeedCRecord>,
  #[serde(default)]
  pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedCRecord {
  #[serde(default)]
  pub incident_id: Option<String>,
  #[serde(default)]
  pub incident_name: Option<String>,
  #[serde(default)]
  pub incident_acres_burned: Option<f64>,
  #[serde(default)]
  pub incident_containment: Option<f64>,
  #[serde(default)]
  pub incident_longitude: Option<f64>,
  #[serde(default)]
  pub incident_latitude: Option<f64>,
  /// "YYYY-MM-DD HH:MM:SS", already shifted to UTC by the fetch adapter.
  #[serde(default)]
  pub incident_date_last_update: Option<String>,
  #[serde(default)]
  pub structures_destroyed: Option<u32>,
}

/// Perimeter geometry summaries, keyed by the same identifier family as the
/// feeds. Geometry itself stays with the renderer; the engine only needs the
/// acreage and timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct PerimeterPayload {
  pub features: Vec<PerimeterFeature>,
  #[serde(default)]
  pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerimeterFeature {
  #[serde(default)]
  pub uniquefireidentifier: Option<String>,
  /// Epoch milliseconds.
  #[serde(default)]
  pub perimeterdatetime: Option<i64>,
  #[serde(default)]
  pub gisacres: Option<f64>,
  #[serde(default)]
  pub complexname: Option<String>,
  #[serde(default)]
  pub inciwebid: Option<String>,
}

// ---------------------------------------------------------------------------
// Internal normalized types
// ---------------------------------------------------------------------------

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub lat: f64,
  pub lon: f64,
}

/// Reported metrics. Absent fields are `None`, never defaulted to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub daily_acres: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub percent_contained: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub personnel: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cost_to_date: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub structures_destroyed: Option<u32>,
}

/// Pointer to a separately-fetched perimeter record. Merges under its own
/// recency clock, independent of the main metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerimeterRef {
  pub source_id: SourceId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub acres: Option<f64>,
  pub modified_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub complex_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inciweb_id: Option<String>,
}

/// Request/response metadata captured for audit. Excluded from merge logic
/// and from the field diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
  pub retrieved_at: DateTime<Utc>,
  pub endpoint: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

impl Provenance {
  pub fn synthetic(source: Source, at: DateTime<Utc>) -> Self {
    Self {
      retrieved_at: at,
      endpoint: format!("inline:{}", source.label()),
      note: None,
    }
  }
}

/// A normalized description of one wildfire as seen from one source at one
/// point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
  pub source_id: SourceId,
  pub source: Source,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<Location>,
  pub modified_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub discovered_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub incident_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  /// Record came from an emerging-fire layer (young, thin on detail).
  #[serde(default)]
  pub emerging: bool,
  #[serde(default)]
  pub metrics: Metrics,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub perimeter: Option<PerimeterRef>,
  pub provenance: Provenance,
}

// ---------------------------------------------------------------------------
// Canonical incident + snapshot
// ---------------------------------------------------------------------------

/// The merged, addressable entity the rest of the system operates on: one
/// record per real-world fire across all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIncident {
  /// Stable across cycles; initially the first reporter's source id.
  pub canonical_id: SourceId,
  /// Every source id ever merged into this fire. Grows monotonically.
  pub correlation_ids: BTreeSet<SourceId>,
  /// Source currently holding field authority.
  pub source: Source,
  pub source_id: SourceId,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<Location>,
  pub modified_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub discovered_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub incident_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  #[serde(default)]
  pub emerging: bool,
  #[serde(default)]
  pub metrics: Metrics,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub perimeter: Option<PerimeterRef>,
  pub provenance: Provenance,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_emitted_update_id: Option<String>,
}

impl CanonicalIncident {
  /// Promote a single-source incident to a fresh canonical record.
  pub fn from_incident(incident: &Incident) -> Self {
    let mut correlation_ids = BTreeSet::new();
    correlation_ids.insert(incident.source_id.clone());
    Self {
      canonical_id: incident.source_id.clone(),
      correlation_ids,
      source: incident.source,
      source_id: incident.source_id.clone(),
      name: incident.name.clone(),
      location: incident.location,
      modified_at: incident.modified_at,
      discovered_at: incident.discovered_at,
      incident_type: incident.incident_type.clone(),
      state: incident.state.clone(),
      emerging: incident.emerging,
      metrics: incident.metrics.clone(),
      perimeter: incident.perimeter.clone(),
      provenance: incident.provenance.clone(),
      last_emitted_update_id: None,
    }
  }
}

/// World state as of the end of a cycle: canonical id -> canonical incident.
pub type CanonicalMap = BTreeMap<SourceId, CanonicalIncident>;

// ---------------------------------------------------------------------------
// Diff + classification
// ---------------------------------------------------------------------------

/// One changed field: old and new values (JSON null when absent on a side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
  pub old: serde_json::Value,
  pub new: serde_json::Value,
}

/// Structural diff keyed by dotted field path.
pub type FieldDiff = BTreeMap<String, FieldChange>;

/// Why a change was withheld from the notifier. Each reason is distinct so
/// tests and logs can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
  /// No acreage, containment, or perimeter movement.
  Unchanged,
  /// Perimeter moved, but not after the configured cutoff.
  PerimeterBeforeCutoff,
  /// Acreage delta within cross-source rounding noise.
  AcreageNoise,
  /// Data older than the freshness cutoff, perimeter included.
  NotFresh,
}

/// Materiality classification of one canonical incident's cycle diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
  Material,
  Suppressed(SuppressReason),
  Prune,
}

// ---------------------------------------------------------------------------
// Lifecycle decisions
// ---------------------------------------------------------------------------

/// Post-materiality veto: the change is real but not worth surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
  FalseAlarmType,
  FalseAlarmName,
  EmergingWithoutInfo,
}

/// Terminal per-cycle action for one canonical incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
  Emit,
  Suppress(SuppressReason),
  Filter(FilterReason),
  Anomaly,
  Prune,
}

/// Outcome of lifecycle processing for one canonical incident.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDecision {
  pub canonical_id: SourceId,
  pub update_id: String,
  pub action: UpdateAction,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract — what we emit)
// ---------------------------------------------------------------------------

/// One material update handed to the downstream dispatcher. Fire-and-forget
/// once the update id is durably recorded.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
  pub update_id: String,
  pub canonical_id: SourceId,
  /// Dispatch rank: 0 is most urgent (largest fire). Ordering only.
  pub priority: u64,
  pub is_new: bool,
  pub incident: CanonicalIncident,
  pub diff: FieldDiff,
}

/// Per-cycle summary for audit, mirroring the whole-cycle diff record the
/// notifier never sees.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
  pub cycle: u64,
  pub created: usize,
  pub merged: usize,
  pub coalesced: usize,
  pub pruned: usize,
  pub suppressed: usize,
  pub filtered: usize,
  pub material: usize,
  pub anomalies: usize,
  pub dropped_records: usize,
  /// Source ids left unmerged this cycle because coalescing was ambiguous.
  pub unresolved: Vec<SourceId>,
  pub events: Vec<UpdateEvent>,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
