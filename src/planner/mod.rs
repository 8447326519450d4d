//! The Planner seam. Strategy lives outside the engine; the engine only asks
//! for recommendations and validates what comes back.

pub mod http;
pub mod schema;
pub mod scripted;

pub use http::HttpPlanner;
pub use scripted::ScriptedPlanner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::WardenError;
use crate::models::{Finding, Recommendation};

/// Outcome of an invocation that did not succeed, fed back to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNote {
    pub invocation_id: String,
    pub tool: String,
    pub status: String,
    pub reason: String,
}

/// Everything the planner is told about the run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub run_id: String,
    pub phase: String,
    pub target: String,
    /// Opaque to the engine.
    pub intent: String,
    /// 0-based planning round within the phase.
    pub iteration: u32,
    pub findings: Vec<Finding>,
    /// Failed outcomes of the previous round.
    pub failures: Vec<FailureNote>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose the next batch of recommendations. An empty batch means the
    /// planner has nothing more for this phase. `PlannerUnavailable` is the
    /// only error the run does not survive.
    async fn propose(&self, request: &PlanRequest) -> Result<Vec<Recommendation>, WardenError>;

    /// Planner name for logging
    fn name(&self) -> &str;
}

/// Enforce the "fallbacks do not nest" rule on planner output.
pub(crate) fn flatten_fallback(mut rec: Recommendation) -> Recommendation {
    if let Some(fallback) = rec.fallback.as_mut() {
        if fallback.fallback.take().is_some() {
            tracing::warn!(recommendation = %rec.id, "Dropping nested fallback");
        }
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_fallback_is_dropped() {
        let rec = Recommendation::new("vuln-scanner").with_fallback(
            Recommendation::new("tech-detector").with_fallback(Recommendation::new("port-scanner")),
        );
        let rec = flatten_fallback(rec);
        let fallback = rec.fallback.unwrap();
        assert_eq!(fallback.tool, "tech-detector");
        assert!(fallback.fallback.is_none());
    }

    #[test]
    fn test_plan_request_serializes_findings() {
        let request = PlanRequest {
            run_id: "run-1".into(),
            phase: "recon".into(),
            target: "example.com".into(),
            intent: "external assessment".into(),
            iteration: 0,
            findings: vec![Finding::new(crate::models::FindingType::Subdomain, "a.example.com", "subdomain-scanner", "r.0")],
            failures: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["findings"][0]["type"], "subdomain");
        assert_eq!(value["phase"], "recon");
    }
}
