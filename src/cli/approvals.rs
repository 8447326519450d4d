use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::gate::{ApprovalDecision, ApprovalOutcome, ApprovalQueue, ApprovalRequest};

/// `y`/`yes` approves; anything else denies.
pub fn parse_answer(line: &str) -> ApprovalOutcome {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalOutcome::Approve,
        _ => ApprovalOutcome::Deny,
    }
}

fn describe(request: &ApprovalRequest) -> String {
    let arguments = serde_json::to_string(&request.arguments).unwrap_or_default();
    format!(
        "Approval required: {} against {} ({})\n  arguments: {}\n  expires: {}\nApprove? [y/N] ",
        request.tool,
        request.subject,
        request.reason,
        arguments,
        request.expires_at.format("%H:%M:%S"),
    )
}

/// Answer approval requests one at a time from `input` until the request
/// channel closes or input ends. Requests left unanswered simply expire.
pub async fn prompt_loop<R>(
    mut requests: mpsc::UnboundedReceiver<ApprovalRequest>,
    queue: Arc<ApprovalQueue>,
    actor: String,
    input: R,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(request) = requests.recv().await {
        // may have expired while an earlier prompt was open
        if !queue.pending().iter().any(|p| p.invocation_id == request.invocation_id) {
            continue;
        }

        eprint!("{}", describe(&request));
        let _ = std::io::stderr().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read approval answer");
                break;
            }
        };

        let decision = ApprovalDecision {
            invocation_id: request.invocation_id.clone(),
            outcome: parse_answer(&line),
            actor: actor.clone(),
        };
        if let Err(e) = queue.resolve(decision).await {
            warn!(invocation = %request.invocation_id, error = %e, "Approval answer was not applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use crate::gate::ApprovalResolution;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            invocation_id: id.to_string(),
            tool: "sql-injection".to_string(),
            subject: "https://app.example.com/login".to_string(),
            reason: "high-impact".to_string(),
            arguments: BTreeMap::new(),
            requested_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y"), ApprovalOutcome::Approve);
        assert_eq!(parse_answer(" YES \n"), ApprovalOutcome::Approve);
        assert_eq!(parse_answer(""), ApprovalOutcome::Deny);
        assert_eq!(parse_answer("nope"), ApprovalOutcome::Deny);
    }

    #[tokio::test]
    async fn test_prompt_resolves_pending_requests_in_order() {
        let queue = Arc::new(ApprovalQueue::new());
        let first = queue.park(request("inv-1"), Duration::from_secs(300)).await.unwrap();
        let second = queue.park(request("inv-2"), Duration::from_secs(300)).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(request("inv-1")).unwrap();
        tx.send(request("inv-2")).unwrap();
        drop(tx);

        prompt_loop(rx, Arc::clone(&queue), "alice".into(), &b"y\nn\n"[..]).await;

        let cancel = CancellationToken::new();
        assert_eq!(queue.wait(first, &cancel).await, ApprovalResolution::Approved { actor: "alice".into() });
        assert_eq!(queue.wait(second, &cancel).await, ApprovalResolution::Denied { actor: "alice".into() });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_skips_requests_no_longer_pending() {
        let queue = Arc::new(ApprovalQueue::new());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(request("gone")).unwrap();
        drop(tx);

        // no input consumed for a request that is not pending
        prompt_loop(rx, queue, "alice".into(), &b""[..]).await;
    }
}
