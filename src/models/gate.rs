use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateOutcome {
    Allow,
    Deny,
    PendingApproval,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Allow => "allow",
            GateOutcome::Deny => "deny",
            GateOutcome::PendingApproval => "pending-approval",
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate verdict for one invocation. Every decision is audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub invocation_id: String,
    pub outcome: GateOutcome,
    /// Short machine-readable reason, e.g. `out-of-scope`.
    pub reason: String,
    pub policy_version: String,
}

impl GateDecision {
    pub fn new(invocation_id: &str, outcome: GateOutcome, reason: impl Into<String>, policy_version: &str) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            outcome,
            reason: reason.into(),
            policy_version: policy_version.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == GateOutcome::Allow
    }
}
