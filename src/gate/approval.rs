//! Durable queue of invocations parked for human approval.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::utils::write_json;
use crate::errors::WardenError;

pub const REASON_APPROVAL_TIMEOUT: &str = "approval-timeout";
pub const REASON_RUN_CANCELLED: &str = "run-cancelled";

/// Emitted when an invocation is parked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub invocation_id: String,
    pub tool: String,
    pub subject: String,
    pub reason: String,
    pub arguments: BTreeMap<String, Value>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Approve,
    Deny,
}

/// External answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub invocation_id: String,
    pub outcome: ApprovalOutcome,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalResolution {
    Approved { actor: String },
    Denied { actor: String },
    Expired,
    Cancelled,
}

impl ApprovalResolution {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalResolution::Approved { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ApprovalResolution::Approved { .. } => "approved",
            ApprovalResolution::Denied { .. } => "denied-by-reviewer",
            ApprovalResolution::Expired => REASON_APPROVAL_TIMEOUT,
            ApprovalResolution::Cancelled => REASON_RUN_CANCELLED,
        }
    }

    pub fn actor(&self) -> Option<&str> {
        match self {
            ApprovalResolution::Approved { actor } | ApprovalResolution::Denied { actor } => Some(actor),
            _ => None,
        }
    }
}

struct PendingApproval {
    request: ApprovalRequest,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Handle returned by [`ApprovalQueue::park`]; consumed by [`ApprovalQueue::wait`].
pub struct ApprovalTicket {
    invocation_id: String,
    expiry: Duration,
    decision: oneshot::Receiver<ApprovalDecision>,
}

impl ApprovalTicket {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}

#[derive(Default)]
pub struct ApprovalQueue {
    pending: DashMap<String, PendingApproval>,
    snapshot_path: Option<PathBuf>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist pending requests to `path` on every change.
    pub fn with_snapshot(path: PathBuf) -> Self {
        Self { pending: DashMap::new(), snapshot_path: Some(path) }
    }

    pub async fn park(&self, request: ApprovalRequest, expiry: Duration) -> Result<ApprovalTicket, WardenError> {
        let invocation_id = request.invocation_id.clone();
        if self.pending.contains_key(&invocation_id) {
            return Err(WardenError::Internal(format!(
                "Invocation {} is already awaiting approval", invocation_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(invocation_id.clone(), PendingApproval { request, respond: tx });
        debug!(invocation = %invocation_id, "Parked invocation for approval");
        self.persist().await;

        Ok(ApprovalTicket { invocation_id, expiry, decision: rx })
    }

    /// Deliver an external decision. Unknown or already-settled ids are an error.
    pub async fn resolve(&self, decision: ApprovalDecision) -> Result<(), WardenError> {
        let (_, pending) = self.pending.remove(&decision.invocation_id).ok_or_else(|| {
            WardenError::Internal(format!("No pending approval for invocation {}", decision.invocation_id))
        })?;
        self.persist().await;
        let id = decision.invocation_id.clone();
        pending.respond.send(decision).map_err(|_| {
            WardenError::Internal(format!("Approval waiter for {} is gone", id))
        })
    }

    /// Wait for a decision, expiry, or run cancellation.
    pub async fn wait(&self, ticket: ApprovalTicket, cancel: &CancellationToken) -> ApprovalResolution {
        let ApprovalTicket { invocation_id, expiry, decision } = ticket;

        let resolution = tokio::select! {
            biased;
            received = decision => match received {
                Ok(d) => match d.outcome {
                    ApprovalOutcome::Approve => ApprovalResolution::Approved { actor: d.actor },
                    ApprovalOutcome::Deny => ApprovalResolution::Denied { actor: d.actor },
                },
                Err(_) => ApprovalResolution::Cancelled,
            },
            _ = cancel.cancelled() => ApprovalResolution::Cancelled,
            _ = tokio::time::sleep(expiry) => ApprovalResolution::Expired,
        };

        if self.pending.remove(&invocation_id).is_some() {
            self.persist().await;
        }
        resolution
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self.pending.iter()
            .map(|entry| entry.value().request.clone())
            .collect();
        requests.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.invocation_id.cmp(&b.invocation_id)));
        requests
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    async fn persist(&self) {
        let Some(path) = &self.snapshot_path else { return };
        let snapshot = serde_json::json!({ "pending": self.pending() });
        if let Err(e) = write_json(path, &snapshot).await {
            warn!(path = %path.display(), error = %e, "Failed to persist approval queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            invocation_id: id.to_string(),
            tool: "sql-injection".to_string(),
            subject: "https://a.example.com/login".to_string(),
            reason: "high-impact".to_string(),
            arguments: BTreeMap::new(),
            requested_at: now,
            expires_at: now + chrono::Duration::seconds(300),
        }
    }

    #[tokio::test]
    async fn test_approve() {
        let queue = ApprovalQueue::new();
        let ticket = queue.park(request("r1.0"), Duration::from_secs(300)).await.unwrap();
        assert_eq!(queue.pending().len(), 1);

        queue.resolve(ApprovalDecision {
            invocation_id: "r1.0".into(),
            outcome: ApprovalOutcome::Approve,
            actor: "alice".into(),
        }).await.unwrap();

        let resolution = queue.wait(ticket, &CancellationToken::new()).await;
        assert_eq!(resolution, ApprovalResolution::Approved { actor: "alice".into() });
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_denies() {
        let queue = ApprovalQueue::new();
        let ticket = queue.park(request("r1.0"), Duration::from_secs(300)).await.unwrap();
        let resolution = queue.wait(ticket, &CancellationToken::new()).await;
        assert_eq!(resolution, ApprovalResolution::Expired);
        assert_eq!(resolution.reason(), REASON_APPROVAL_TIMEOUT);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_denies() {
        let queue = ApprovalQueue::new();
        let cancel = CancellationToken::new();
        let ticket = queue.park(request("r1.0"), Duration::from_secs(300)).await.unwrap();
        cancel.cancel();
        let resolution = queue.wait(ticket, &cancel).await;
        assert_eq!(resolution, ApprovalResolution::Cancelled);
        assert!(!resolution.is_approved());
    }

    #[tokio::test]
    async fn test_resolve_unknown_fails() {
        let queue = ApprovalQueue::new();
        let err = queue.resolve(ApprovalDecision {
            invocation_id: "nope".into(),
            outcome: ApprovalOutcome::Deny,
            actor: "bob".into(),
        }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.json");
        let queue = ApprovalQueue::with_snapshot(path.clone());
        let _ticket = queue.park(request("r1.0"), Duration::from_secs(300)).await.unwrap();

        let snapshot: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snapshot["pending"][0]["invocation_id"], "r1.0");
    }
}
