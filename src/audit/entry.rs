use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::approval::ApprovalRequest;
use crate::models::{ExecutionResult, Finding, GateDecision, Invocation, Recommendation};

/// Who caused an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    System,
    Planner,
    Human { id: String },
}

impl Actor {
    pub fn human(id: impl Into<String>) -> Self {
        Actor::Human { id: id.into() }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Planner => f.write_str("planner"),
            Actor::Human { id } => write!(f, "human:{}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AuditEvent {
    RunStarted {
        target: String,
        intent: String,
        phases: Vec<String>,
        policy_version: String,
    },
    PhaseEntered {
        budget: u32,
    },
    PlannerRequested {
        iteration: u32,
        findings: usize,
        failures: usize,
    },
    RecommendationReceived {
        recommendation: Recommendation,
    },
    /// The planner reused an id already taken in this run.
    RecommendationRenamed {
        original_id: String,
        assigned_id: String,
    },
    RecommendationRejected {
        recommendation_id: String,
        tool: String,
        error_type: String,
        reason: String,
    },
    BindingDeferred {
        recommendation_id: String,
        missing: Vec<String>,
        ticks: u32,
    },
    ReferenceUnresolvable {
        recommendation_id: String,
        missing: Vec<String>,
        ticks: u32,
    },
    InvocationBound {
        invocation: Invocation,
    },
    FanOutTruncated {
        recommendation_id: String,
        emitted: usize,
        dropped: usize,
    },
    GateEvaluated {
        decision: GateDecision,
    },
    ApprovalRequested {
        request: ApprovalRequest,
    },
    ApprovalResolved {
        invocation_id: String,
        approved: bool,
        reason: String,
    },
    InvocationStarted {
        invocation_id: String,
        tool: String,
    },
    InvocationCompleted {
        result: ExecutionResult,
    },
    FindingsExtracted {
        invocation_id: String,
        count: usize,
        skipped: usize,
    },
    ParseFailure {
        invocation_id: String,
        tool: String,
        reason: String,
    },
    FindingRecorded {
        finding: Finding,
    },
    FallbackScheduled {
        recommendation_id: String,
        fallback_id: String,
    },
    PhaseClosed {
        iterations: u32,
        exit_satisfied: bool,
        /// Budget ran out before the exit predicate held.
        incomplete: bool,
    },
    PlannerFailed {
        error: String,
    },
    RunFinished {
        status: String,
        findings: usize,
    },
    Warning {
        message: String,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::RunStarted { .. } => "run-started",
            AuditEvent::PhaseEntered { .. } => "phase-entered",
            AuditEvent::PlannerRequested { .. } => "planner-requested",
            AuditEvent::RecommendationReceived { .. } => "recommendation-received",
            AuditEvent::RecommendationRenamed { .. } => "recommendation-renamed",
            AuditEvent::RecommendationRejected { .. } => "recommendation-rejected",
            AuditEvent::BindingDeferred { .. } => "binding-deferred",
            AuditEvent::ReferenceUnresolvable { .. } => "reference-unresolvable",
            AuditEvent::InvocationBound { .. } => "invocation-bound",
            AuditEvent::FanOutTruncated { .. } => "fan-out-truncated",
            AuditEvent::GateEvaluated { .. } => "gate-evaluated",
            AuditEvent::ApprovalRequested { .. } => "approval-requested",
            AuditEvent::ApprovalResolved { .. } => "approval-resolved",
            AuditEvent::InvocationStarted { .. } => "invocation-started",
            AuditEvent::InvocationCompleted { .. } => "invocation-completed",
            AuditEvent::FindingsExtracted { .. } => "findings-extracted",
            AuditEvent::ParseFailure { .. } => "parse-failure",
            AuditEvent::FindingRecorded { .. } => "finding-recorded",
            AuditEvent::FallbackScheduled { .. } => "fallback-scheduled",
            AuditEvent::PhaseClosed { .. } => "phase-closed",
            AuditEvent::PlannerFailed { .. } => "planner-failed",
            AuditEvent::RunFinished { .. } => "run-finished",
            AuditEvent::Warning { .. } => "warning",
        }
    }

    /// One-line rendering for workflow.log.
    pub fn summary(&self) -> String {
        match self {
            AuditEvent::RunStarted { target, phases, policy_version, .. } => {
                format!("Run started against {} (phases: {}, policy v{})", target, phases.join(" -> "), policy_version)
            }
            AuditEvent::PhaseEntered { budget } => format!("Phase entered (budget {})", budget),
            AuditEvent::PlannerRequested { iteration, findings, failures } => {
                format!("Planner round {} ({} findings, {} failures)", iteration, findings, failures)
            }
            AuditEvent::RecommendationReceived { recommendation } => {
                format!("Recommendation {} -> {}", recommendation.id, recommendation.tool)
            }
            AuditEvent::RecommendationRenamed { original_id, assigned_id } => {
                format!("Recommendation id {} already used; renamed to {}", original_id, assigned_id)
            }
            AuditEvent::RecommendationRejected { recommendation_id, error_type, reason, .. } => {
                format!("Recommendation {} rejected [{}]: {}", recommendation_id, error_type, reason)
            }
            AuditEvent::BindingDeferred { recommendation_id, missing, ticks } => {
                format!("Recommendation {} deferred (tick {}): {}", recommendation_id, ticks, missing.join(", "))
            }
            AuditEvent::ReferenceUnresolvable { recommendation_id, missing, .. } => {
                format!("Recommendation {} unresolvable: {}", recommendation_id, missing.join(", "))
            }
            AuditEvent::InvocationBound { invocation } => {
                format!("Invocation {} bound ({})", invocation.id, invocation.tool)
            }
            AuditEvent::FanOutTruncated { recommendation_id, emitted, dropped } => {
                format!("Fan-out of {} truncated: {} emitted, {} dropped", recommendation_id, emitted, dropped)
            }
            AuditEvent::GateEvaluated { decision } => {
                format!("Gate {} for {}: {}", decision.outcome, decision.invocation_id, decision.reason)
            }
            AuditEvent::ApprovalRequested { request } => {
                format!("Approval requested for {} ({} on {})", request.invocation_id, request.tool, request.subject)
            }
            AuditEvent::ApprovalResolved { invocation_id, reason, .. } => {
                format!("Approval for {} resolved: {}", invocation_id, reason)
            }
            AuditEvent::InvocationStarted { invocation_id, tool } => {
                format!("Invocation {} started ({})", invocation_id, tool)
            }
            AuditEvent::InvocationCompleted { result } => format!(
                "Invocation {} finished: {} in {}ms",
                result.invocation_id, result.status, result.duration_ms
            ),
            AuditEvent::FindingsExtracted { invocation_id, count, .. } => {
                format!("{} finding(s) from {}", count, invocation_id)
            }
            AuditEvent::ParseFailure { invocation_id, reason, .. } => {
                format!("Parse failure for {}: {}", invocation_id, reason)
            }
            AuditEvent::FindingRecorded { finding } => format!(
                "Finding [{}] {} {}",
                finding.severity, finding.finding_type, finding.subject
            ),
            AuditEvent::FallbackScheduled { recommendation_id, fallback_id } => {
                format!("Fallback {} scheduled for {}", fallback_id, recommendation_id)
            }
            AuditEvent::PhaseClosed { iterations, incomplete, .. } => {
                if *incomplete {
                    format!("Phase closed INCOMPLETE after {} iteration(s)", iterations)
                } else {
                    format!("Phase closed after {} iteration(s)", iterations)
                }
            }
            AuditEvent::PlannerFailed { error } => format!("Planner failed: {}", error),
            AuditEvent::RunFinished { status, findings } => {
                format!("Run finished: {} ({} findings)", status, findings)
            }
            AuditEvent::Warning { message } => format!("Warning: {}", message),
        }
    }
}

/// One immutable line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub actor: Actor,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_flat() {
        let entry = AuditEntry {
            seq: 3,
            timestamp: Utc::now(),
            run_id: "run-1".into(),
            phase: Some("recon".into()),
            actor: Actor::human("alice"),
            event: AuditEvent::ApprovalResolved {
                invocation_id: "sqli.0".into(),
                approved: false,
                reason: "denied-by-reviewer".into(),
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"], "approval-resolved");
        assert_eq!(value["actor"]["kind"], "human");
        assert_eq!(value["actor"]["id"], "alice");
        assert_eq!(value["invocation_id"], "sqli.0");
        assert_eq!(value["phase"], "recon");
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let event = AuditEvent::PhaseClosed { iterations: 3, exit_satisfied: false, incomplete: true };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.kind());
        assert!(event.summary().contains("INCOMPLETE"));
    }
}
