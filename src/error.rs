//! Structured error types for the fire incident engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("parse: {0}")]
  Parse(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("yaml: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("unresolved merge: {source_id} matches {candidates} canonical incidents")]
  UnresolvedMerge { source_id: String, candidates: usize },

  #[error("a refresh cycle is already in progress")]
  CycleInProgress,

  #[error("snapshot version {found} is not supported (expected {expected})")]
  SnapshotVersion { found: u32, expected: u32 },
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn parse(msg: impl Into<String>) -> Self {
    Self::Parse(msg.into())
  }
}
