use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use super::schema::validate_recommendation;
use super::{flatten_fallback, PlanRequest, Planner};
use crate::config::PlannerConfig;
use crate::errors::{with_retry, RetryConfig, WardenError};
use crate::models::Recommendation;

/// JSON-over-HTTP planner. POSTs the [`PlanRequest`] and expects either
/// `{"recommendations": [...]}` or a bare array back.
pub struct HttpPlanner {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl HttpPlanner {
    pub fn new(endpoint: &str, config: &PlannerConfig) -> Result<Self, WardenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WardenError::Config(format!("Failed to build planner client: {}", e)))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            retry: RetryConfig { max_retries: config.max_retries, ..Default::default() },
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// One round trip. Transport failures and 5xx are infrastructure errors
    /// so the retry loop picks them up.
    async fn request_once(&self, request: &PlanRequest) -> Result<Value, WardenError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| WardenError::Infrastructure(format!("Planner request failed: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(WardenError::Infrastructure(format!("Planner returned {}", status)));
        }
        if !status.is_success() {
            return Err(WardenError::PlannerUnavailable(format!("Planner rejected request: {}", status)));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| WardenError::PlannerUnavailable(format!("Failed to parse planner response: {}", e)))
    }
}

/// Accept `{"recommendations": [...]}` or a bare array; drop entries that do
/// not match the recommendation schema.
pub fn parse_recommendations(body: Value) -> Result<Vec<Recommendation>, WardenError> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("recommendations") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(WardenError::PlannerUnavailable(
                    "Planner response has no recommendations array".into(),
                ))
            }
        },
        other => {
            return Err(WardenError::PlannerUnavailable(format!(
                "Unexpected planner response type: {}",
                other
            )))
        }
    };

    let mut recommendations = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let violations = validate_recommendation(&entry);
        if !violations.is_empty() {
            warn!(index, violations = ?violations, "Dropping malformed recommendation");
            continue;
        }
        match serde_json::from_value::<Recommendation>(entry) {
            Ok(rec) => recommendations.push(flatten_fallback(rec)),
            Err(e) => warn!(index, error = %e, "Dropping malformed recommendation"),
        }
    }
    Ok(recommendations)
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn propose(&self, request: &PlanRequest) -> Result<Vec<Recommendation>, WardenError> {
        let (result, attempts) = with_retry("planner", &self.retry, || self.request_once(request)).await;
        let body = result.map_err(|e| match e {
            WardenError::PlannerUnavailable(_) => e,
            other => WardenError::PlannerUnavailable(format!("{} (after {} attempt(s))", other, attempts)),
        })?;
        let recommendations = parse_recommendations(body)?;
        info!(
            phase = %request.phase,
            iteration = request.iteration,
            count = recommendations.len(),
            "Planner proposed recommendations"
        );
        Ok(recommendations)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> PlanRequest {
        PlanRequest {
            run_id: "run-1".into(),
            phase: "recon".into(),
            target: "example.com".into(),
            intent: "external".into(),
            iteration: 0,
            findings: vec![],
            failures: vec![],
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Serve `responses` to consecutive connections, one each.
    async fn serve(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}/plan", addr)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = parse_recommendations(json!({"recommendations": [{"tool": "subdomain-scanner"}]})).unwrap();
        assert_eq!(wrapped.len(), 1);
        let bare = parse_recommendations(json!([{"tool": "a"}, {"tool": "b"}])).unwrap();
        assert_eq!(bare.len(), 2);
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let recs = parse_recommendations(json!([
            {"tool": "subdomain-scanner"},
            {"priority": "high"},
            {"tool": "port-scanner", "priority": "whenever"},
            {"tool": "tech-detector", "arguments": {"url": {"$ref": {"tool": "x"}}}}
        ]))
        .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].tool, "subdomain-scanner");
    }

    #[test]
    fn test_non_list_response_is_unavailable() {
        let err = parse_recommendations(json!({"plan": "later"})).unwrap_err();
        assert!(matches!(err, WardenError::PlannerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_propose_round_trip() {
        let body = json!({"recommendations": [{"id": "r1", "tool": "subdomain-scanner", "arguments": {"domain": "example.com"}}]});
        let endpoint = serve(vec![(200, body.to_string())]).await;
        let planner = HttpPlanner::new(&endpoint, &PlannerConfig::default()).unwrap();
        let recs = planner.propose(&request()).await.unwrap();
        assert_eq!(recs[0].id, "r1");
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let body = json!([{"tool": "subdomain-scanner"}]);
        let endpoint = serve(vec![(503, "{}".into()), (200, body.to_string())]).await;
        let planner = HttpPlanner::new(&endpoint, &PlannerConfig::default()).unwrap().with_retry_config(fast_retry());
        assert_eq!(planner.propose(&request()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_planner_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/plan", listener.local_addr().unwrap());
        drop(listener);
        let planner = HttpPlanner::new(&endpoint, &PlannerConfig::default()).unwrap().with_retry_config(fast_retry());
        let err = planner.propose(&request()).await.unwrap_err();
        assert!(matches!(err, WardenError::PlannerUnavailable(_)));
        assert!(err.is_run_fatal());
    }
}
