use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use super::entry::{Actor, AuditEntry, AuditEvent};
use super::journal::AuditJournal;
use super::workflow_logger::WorkflowLogger;
use crate::errors::WardenError;

const SUBSCRIBER_CAPACITY: usize = 1024;

struct RecorderState {
    next_seq: u64,
    entries: Vec<AuditEntry>,
    journal: Option<AuditJournal>,
    workflow: Option<WorkflowLogger>,
}

/// Append-only audit trail of one run.
///
/// Sequence numbers are assigned under a single lock, so the in-memory log,
/// the journal file and subscribers all observe the same order.
pub struct AuditRecorder {
    run_id: String,
    base_dir: Option<PathBuf>,
    state: Mutex<RecorderState>,
    tx: broadcast::Sender<AuditEntry>,
}

impl AuditRecorder {
    /// Persist to `<output_dir>/<run_id>/{audit.jsonl,workflow.log}`.
    pub async fn initialize(output_dir: &Path, run_id: &str) -> Result<Self, WardenError> {
        let base_dir = output_dir.join(run_id);
        tokio::fs::create_dir_all(&base_dir).await.map_err(|e| {
            WardenError::Config(format!("Failed to create run directory {}: {}", base_dir.display(), e))
        })?;

        let journal = AuditJournal::open(&base_dir).await?;
        let workflow = WorkflowLogger::new(&base_dir);
        workflow.initialize(run_id).await?;

        Ok(Self::build(run_id, Some(base_dir), Some(journal), Some(workflow)))
    }

    /// Keep entries in memory only.
    pub fn in_memory(run_id: &str) -> Self {
        Self::build(run_id, None, None, None)
    }

    fn build(
        run_id: &str,
        base_dir: Option<PathBuf>,
        journal: Option<AuditJournal>,
        workflow: Option<WorkflowLogger>,
    ) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            run_id: run_id.to_string(),
            base_dir,
            state: Mutex::new(RecorderState { next_seq: 1, entries: Vec::new(), journal, workflow }),
            tx,
        }
    }

    pub async fn record(&self, phase: Option<&str>, actor: Actor, event: AuditEvent) -> AuditEntry {
        let mut state = self.state.lock().await;
        let entry = AuditEntry {
            seq: state.next_seq,
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            phase: phase.map(str::to_string),
            actor,
            event,
        };
        state.next_seq += 1;

        if let Some(journal) = state.journal.as_mut() {
            if let Err(e) = journal.append(&entry).await {
                warn!(seq = entry.seq, error = %e, "Failed to append audit entry");
            }
        }
        if let Some(workflow) = state.workflow.as_ref() {
            let line = format!("{} ({})", entry.event.summary(), entry.actor);
            if let Err(e) = workflow.log_event(phase, &line).await {
                warn!(seq = entry.seq, error = %e, "Failed to write workflow log");
            }
        }

        state.entries.push(entry.clone());
        // No subscribers is fine.
        let _ = self.tx.send(entry.clone());
        entry
    }

    pub async fn system(&self, phase: Option<&str>, event: AuditEvent) -> AuditEntry {
        self.record(phase, Actor::System, event).await
    }

    /// Read-only stream of entries recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.tx.subscribe()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.entries.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}
