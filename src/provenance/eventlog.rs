//! CS-021: Append-only JSONL run journal.

use crate::core::error::EngineError;
use crate::core::executor::ChangesetHook;
use crate::core::migration::PendingMigration;
use crate::core::types::{Changeset, ProvenanceEvent, Report, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// UTC timestamp, second precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

/// Append an event to the journal under `state_dir`.
pub fn append_event(state_dir: &Path, event: ProvenanceEvent) -> Result<(), String> {
    let path = event_log_path(state_dir);
    std::fs::create_dir_all(state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read back every event in the journal. Missing journal is empty.
pub fn read_events(state_dir: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("cannot read event log {}: {}", path.display(), e)),
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| format!("corrupt event log line: {}", e)))
        .collect()
}

/// Between-changesets hook that journals every changeset and replayed
/// migration of one run.
#[derive(Debug, Clone)]
pub struct JournalHook {
    state_dir: PathBuf,
    run_id: String,
    changesets: u32,
}

impl JournalHook {
    pub fn new(state_dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            run_id: run_id.into(),
            changesets: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Changesets journaled so far.
    pub fn changesets(&self) -> u32 {
        self.changesets
    }

    pub fn started(&self, title: &str) -> Result<(), String> {
        append_event(
            &self.state_dir,
            ProvenanceEvent::RunStarted {
                run_id: self.run_id.clone(),
                title: title.to_string(),
                cascade_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        )
    }

    pub fn completed(&self, report: &Report, total_seconds: f64) -> Result<(), String> {
        append_event(
            &self.state_dir,
            ProvenanceEvent::RunCompleted {
                run_id: self.run_id.clone(),
                implemented: report.implemented.len() as u32,
                unimplemented: report.unimplemented.len() as u32,
                total_seconds,
            },
        )
    }

    fn append(&self, event: ProvenanceEvent) -> Result<(), EngineError> {
        append_event(&self.state_dir, event).map_err(EngineError::Hook)
    }
}

#[async_trait::async_trait]
impl ChangesetHook for JournalHook {
    async fn after_changeset(
        &mut self,
        changeset: &Changeset,
        report: &Report,
    ) -> Result<(), EngineError> {
        self.changesets += 1;
        for u in &report.unimplemented {
            self.append(ProvenanceEvent::RequirementUnimplemented {
                run_id: self.run_id.clone(),
                requirement: u.requirement.describe(),
                reason: u.message.clone(),
            })?;
        }
        self.append(ProvenanceEvent::ChangesetCompleted {
            run_id: self.run_id.clone(),
            title: changeset.title_requirement.describe(),
            implemented: report.implemented.len() as u32,
            unimplemented: report.unimplemented.len() as u32,
        })
    }

    async fn before_migration(&mut self, migration: &PendingMigration) -> Result<(), EngineError> {
        self.append(ProvenanceEvent::MigrationReplayed {
            run_id: self.run_id.clone(),
            version: migration.version.clone(),
            artifact: migration.path.clone(),
        })
    }
}
