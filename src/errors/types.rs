use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unresolvable reference: {0}")]
    UnresolvableReference(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Denied by restraint gate: {0}")]
    GateDenied(String),

    #[error("Approval timed out: {0}")]
    ApprovalTimeout(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Planner unavailable: {0}")]
    PlannerUnavailable(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
