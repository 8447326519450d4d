use serde::{Deserialize, Serialize};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitStatus {
    /// Exit code 0.
    Success,
    /// Nonzero exit. Output is still handed to the extractor.
    ToolError,
    /// Wall-clock timeout; the container was force-terminated.
    Timeout,
    /// Image missing, runtime unavailable, ...
    InfrastructureError,
    /// Interrupted by run cancellation or an addressed termination.
    Cancelled,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::ToolError => "tool-error",
            ExitStatus::Timeout => "timeout",
            ExitStatus::InfrastructureError => "infrastructure-error",
            ExitStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the raw output is worth parsing for findings.
    pub fn has_parseable_output(&self) -> bool {
        matches!(self, ExitStatus::Success | ExitStatus::ToolError)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produced exactly once per executed invocation. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub invocation_id: String,
    pub status: ExitStatus,
    pub exit_code: Option<i64>,
    /// Combined stdout/stderr, bounded.
    pub output: String,
    /// Bytes dropped from the front of the output.
    pub truncated_bytes: u64,
    pub duration_ms: u64,
    /// Launch attempts, including infrastructure retries.
    pub attempts: u32,
    /// Set when the container had to be force-terminated.
    pub termination_confirmed: Option<bool>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn infrastructure_error(invocation_id: &str, error: String, attempts: u32, duration_ms: u64) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            status: ExitStatus::InfrastructureError,
            exit_code: None,
            output: String::new(),
            truncated_bytes: 0,
            duration_ms,
            attempts,
            termination_confirmed: None,
            error: Some(error),
        }
    }

    pub fn cancelled(invocation_id: &str, duration_ms: u64) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            status: ExitStatus::Cancelled,
            exit_code: None,
            output: String::new(),
            truncated_bytes: 0,
            duration_ms,
            attempts: 0,
            termination_confirmed: None,
            error: Some("cancelled before launch".to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExitStatus::Success
    }
}
