//! Restraint gate: every invocation passes here before it can execute.

pub mod approval;
pub mod policy;
pub mod scope;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::errors::WardenError;
use crate::models::{GateDecision, GateOutcome, Invocation};
use crate::registry::ToolRegistry;
pub use approval::{
    ApprovalDecision, ApprovalOutcome, ApprovalQueue, ApprovalRequest, ApprovalResolution, ApprovalTicket,
};
pub use policy::Policy;
pub use scope::Scope;

pub struct RestraintGate {
    policy: Policy,
    registry: Arc<ToolRegistry>,
    approvals: Arc<ApprovalQueue>,
}

impl RestraintGate {
    pub fn new(policy: Policy, registry: Arc<ToolRegistry>, approvals: Arc<ApprovalQueue>) -> Self {
        Self { policy, registry, approvals }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn approvals(&self) -> &Arc<ApprovalQueue> {
        &self.approvals
    }

    pub fn approval_expiry(&self) -> Duration {
        Duration::from_secs(self.policy.approval_expiry_secs())
    }

    /// Pure policy evaluation.
    pub fn evaluate(&self, invocation: &Invocation) -> GateDecision {
        match self.registry.lookup(&invocation.tool) {
            Ok(spec) => self.policy.evaluate(invocation, spec),
            Err(_) => GateDecision::new(
                &invocation.id,
                GateOutcome::Deny,
                "unknown-tool",
                self.policy.version(),
            ),
        }
    }

    /// Park a pending-approval invocation.
    pub async fn request_approval(
        &self,
        invocation: &Invocation,
        decision: &GateDecision,
    ) -> Result<(ApprovalRequest, ApprovalTicket), WardenError> {
        let expiry = self.approval_expiry();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(expiry)
            .map_err(|e| WardenError::Config(format!("Invalid approval expiry: {}", e)))?;
        let request = ApprovalRequest {
            invocation_id: invocation.id.clone(),
            tool: invocation.tool.clone(),
            subject: invocation.subject_or(""),
            reason: decision.reason.clone(),
            arguments: invocation.arguments.clone(),
            requested_at: now,
            expires_at,
        };
        let ticket = self.approvals.park(request.clone(), expiry).await?;
        Ok((request, ticket))
    }

    pub async fn wait_for_decision(&self, ticket: ApprovalTicket, cancel: &CancellationToken) -> ApprovalResolution {
        self.approvals.wait(ticket, cancel).await
    }

    /// Final decision after an approval wait.
    pub fn settle(&self, invocation: &Invocation, resolution: &ApprovalResolution) -> GateDecision {
        let outcome = if resolution.is_approved() { GateOutcome::Allow } else { GateOutcome::Deny };
        GateDecision::new(&invocation.id, outcome, resolution.reason(), self.policy.version())
    }
}
