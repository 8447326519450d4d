use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::FindingLedger;
use super::state::{PhaseRecord, Run, RunStatus};
use crate::models::ExitStatus;

/// How invocations ended, across the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub tool_error: usize,
    pub timeout: usize,
    pub infrastructure_error: usize,
    pub cancelled: usize,
    /// Blocked by the gate, including approval timeouts.
    pub denied: usize,
    pub rejected: usize,
    pub unresolvable: usize,
    pub parse_failures: usize,
}

impl OutcomeCounts {
    pub fn record_status(&mut self, status: ExitStatus) {
        match status {
            ExitStatus::Success => self.success += 1,
            ExitStatus::ToolError => self.tool_error += 1,
            ExitStatus::Timeout => self.timeout += 1,
            ExitStatus::InfrastructureError => self.infrastructure_error += 1,
            ExitStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn executed(&self) -> usize {
        self.success + self.tool_error + self.timeout + self.infrastructure_error + self.cancelled
    }

    /// Executions that may not have produced evidence. A nonzero exit is
    /// often an unreachable target, so tool errors count.
    pub fn failed_executions(&self) -> usize {
        self.tool_error + self.timeout + self.infrastructure_error + self.cancelled
    }

    /// Planned work that never reached a container.
    pub fn not_executed(&self) -> usize {
        self.denied + self.rejected + self.unresolvable
    }
}

/// Distinguishes "nothing found" from "could not look".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Assessment {
    FindingsReported,
    NoFindingsClean,
    NoFindingsExecutionFailed,
    Inconclusive,
}

impl Assessment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assessment::FindingsReported => "findings-reported",
            Assessment::NoFindingsClean => "no-findings-clean",
            Assessment::NoFindingsExecutionFailed => "no-findings-execution-failed",
            Assessment::Inconclusive => "inconclusive",
        }
    }
}

pub fn assess(status: RunStatus, findings: usize, outcomes: &OutcomeCounts) -> Assessment {
    if findings > 0 {
        return Assessment::FindingsReported;
    }
    if status != RunStatus::Completed || outcomes.executed() == 0 {
        return Assessment::Inconclusive;
    }
    if outcomes.failed_executions() > 0 || outcomes.parse_failures > 0 {
        Assessment::NoFindingsExecutionFailed
    } else if outcomes.not_executed() > 0 {
        Assessment::Inconclusive
    } else {
        Assessment::NoFindingsClean
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub status: RunStatus,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseRecord>,
    pub total_findings: usize,
    pub findings_by_severity: BTreeMap<String, usize>,
    pub findings_by_type: BTreeMap<String, usize>,
    pub outcomes: OutcomeCounts,
    pub assessment: Assessment,
}

impl RunReport {
    pub fn incomplete_phases(&self) -> Vec<&str> {
        self.phases.iter().filter(|p| p.incomplete).map(|p| p.name.as_str()).collect()
    }
}

pub fn compute_report(run: &Run, ledger: &FindingLedger, outcomes: &OutcomeCounts) -> RunReport {
    let finished_at = run.completed_at;
    let duration_ms = finished_at
        .unwrap_or_else(Utc::now)
        .signed_duration_since(run.created_at)
        .num_milliseconds()
        .max(0) as u64;

    RunReport {
        run_id: run.id.clone(),
        target: run.target.clone(),
        status: run.status,
        error: run.error.clone(),
        error_type: run.error_type.clone(),
        started_at: run.created_at,
        finished_at,
        duration_ms,
        phases: run.phases.clone(),
        total_findings: ledger.len(),
        findings_by_severity: ledger.count_by_severity(),
        findings_by_type: ledger.count_by_type(),
        outcomes: outcomes.clone(),
        assessment: assess(run.status, ledger.len(), outcomes),
    }
}
