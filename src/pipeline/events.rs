use crate::gate::ApprovalRequest;
use crate::models::{ExitStatus, Finding};
use super::state::RunStatus;

/// Progress messages streamed from the controller to a CLI or other consumer.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        target: String,
    },
    PhaseStarted {
        phase: String,
        display_name: String,
    },
    PhaseCompleted {
        phase: String,
        display_name: String,
        incomplete: bool,
    },
    InvocationStarted {
        invocation_id: String,
        tool: String,
        subject: String,
    },
    InvocationCompleted {
        invocation_id: String,
        tool: String,
        status: ExitStatus,
        duration_ms: u64,
        findings: usize,
    },
    /// Blocked by the gate; never executed.
    InvocationDenied {
        invocation_id: String,
        tool: String,
        reason: String,
    },
    FindingDiscovered {
        finding: Finding,
    },
    ApprovalRequested {
        request: ApprovalRequest,
    },
    ApprovalResolved {
        invocation_id: String,
        approved: bool,
        reason: String,
    },
    RunFinished {
        status: RunStatus,
        findings: usize,
    },
}
