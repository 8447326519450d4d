use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingApproval => "awaiting-approval",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one phase. Frozen once `closed_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub entered_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub iterations: u32,
    pub recommendations: Vec<String>,
    pub invocations: Vec<String>,
    pub findings_added: usize,
    pub exit_satisfied: bool,
    /// Closed on budget exhaustion or planner exhaustion without the exit
    /// predicate holding.
    pub incomplete: bool,
}

impl PhaseRecord {
    pub fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entered_at: Utc::now(),
            closed_at: None,
            iterations: 0,
            recommendations: Vec::new(),
            invocations: Vec::new(),
            findings_added: 0,
            exit_satisfied: false,
            incomplete: false,
        }
    }

    pub fn close(&mut self, exit_satisfied: bool) {
        self.exit_satisfied = exit_satisfied;
        self.incomplete = !exit_satisfied;
        self.closed_at = Some(Utc::now());
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// A run. Owned by the phase controller; everyone else sees snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub target: String,
    /// Opaque to the engine.
    pub intent: String,
    pub current_phase: Option<String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseRecord>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl Run {
    pub fn new(id: &str, target: &str, intent: &str) -> Self {
        Self {
            id: id.to_string(),
            target: target.to_string(),
            intent: intent.to_string(),
            current_phase: None,
            status: RunStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            phases: Vec::new(),
            error: None,
            error_type: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.current_phase = None;
        self.completed_at = Some(Utc::now());
    }
}

pub fn new_run_id() -> String {
    format!("run-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &uuid::Uuid::new_v4().simple().to_string()[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_close_sets_incomplete_flag() {
        let mut record = PhaseRecord::open("recon");
        record.close(false);
        assert!(record.incomplete);
        assert!(record.is_closed());

        let mut record = PhaseRecord::open("analyze");
        record.close(true);
        assert!(!record.incomplete);
    }

    #[test]
    fn test_run_finish() {
        let mut run = Run::new("run-1", "example.com", "");
        run.current_phase = Some("recon".into());
        run.finish(RunStatus::Cancelled);
        assert!(run.status.is_terminal());
        assert!(run.current_phase.is_none());
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(serde_json::to_value(RunStatus::AwaitingApproval).unwrap(), "awaiting-approval");
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
