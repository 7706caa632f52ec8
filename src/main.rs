//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a CycleInput (one refresh cycle's raw feed payloads).
//! Output lines are either:
//! - An UpdateEvent per material update, in dispatch priority order
//! - An ErrorOutput (when input parsing or the cycle fails)
//!
//! An optional first argument names a state directory; the canonical
//! snapshot and update ledger are loaded from it at startup and atomically
//! rewritten after each cycle, ledger first so a crash between the writes
//! can only drop a replay, never double-deliver.

use chrono::Utc;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use fire_incident_engine::snapshot;
use fire_incident_engine::types::{CycleInput, ErrorOutput};
use fire_incident_engine::{Config, Engine, EngineError};

fn load_engine(state_dir: Option<&PathBuf>) -> Result<Engine, EngineError> {
  let config = Config::default();
  let Some(dir) = state_dir else {
    return Engine::new(config);
  };
  let snapshot_path = dir.join("snapshot.yaml");
  let ledger_path = dir.join("ledger.yaml");
  let snapshot_doc = if snapshot_path.exists() {
    Some(snapshot::load_snapshot(&snapshot_path)?)
  } else {
    None
  };
  let ledger_doc = if ledger_path.exists() {
    Some(snapshot::load_ledger(&ledger_path)?)
  } else {
    None
  };
  Engine::from_documents(config, snapshot_doc, ledger_doc)
}

fn persist(engine: &Engine, dir: &PathBuf) -> Result<(), EngineError> {
  let now = Utc::now();
  snapshot::save_ledger(&dir.join("ledger.yaml"), &engine.ledger_document(now))?;
  snapshot::save_snapshot(&dir.join("snapshot.yaml"), &engine.snapshot_document(now))?;
  Ok(())
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(io::stderr)
    .init();

  let state_dir = std::env::args().nth(1).map(PathBuf::from);

  let mut engine = match load_engine(state_dir.as_ref()) {
    Ok(engine) => engine,
    Err(e) => {
      let _ = writeln!(io::stderr(), "fire-incident-engine: startup: {}", e);
      std::process::exit(1);
    }
  };

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "fire-incident-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let input: CycleInput = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        continue;
      }
    };

    let now = input.now.unwrap_or_else(Utc::now);
    match engine.run_cycle(&input, now) {
      Ok(report) => {
        // Durably record before dispatch: at-most-once over at-least-once.
        if let Some(dir) = &state_dir {
          if let Err(e) = persist(&engine, dir) {
            let _ = writeln!(io::stderr(), "fire-incident-engine: persist: {}", e);
            std::process::exit(1);
          }
        }
        for event in &report.events {
          let _ = serde_json::to_writer(&mut out, event);
          let _ = writeln!(out);
        }
        let _ = out.flush();
      }
      Err(e) => {
        let err = match &e {
          EngineError::Validation { field, reason } => {
            ErrorOutput::new(reason.clone()).with_field(field.clone())
          }
          _ => ErrorOutput::new(e.to_string()),
        };
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
      }
    }
  }

  let _ = out.flush();
}
