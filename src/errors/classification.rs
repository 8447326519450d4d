use serde::Serialize;
use super::types::WardenError;

/// Whether an error stays attached to a single invocation or ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorScope {
    Local,
    RunFatal,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
    pub scope: ErrorScope,
}

impl ErrorClassification {
    const fn local(error_type: &'static str, retryable: bool) -> Self {
        Self { error_type, retryable, scope: ErrorScope::Local }
    }
}

impl WardenError {
    /// Classify this error to determine its type, whether it can be retried,
    /// and whether it is allowed to fail the whole run.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Infrastructure problems are the only automatically retried class
            WardenError::Infrastructure(_) => ErrorClassification::local("InfrastructureError", true),
            WardenError::Docker(_) => ErrorClassification::local("InfrastructureError", true),
            WardenError::Io(_) => ErrorClassification::local("IoError", true),

            // Surfaced to the phase controller as failed invocation outcomes
            WardenError::UnknownTool(_) => ErrorClassification::local("UnknownTool", false),
            WardenError::UnresolvableReference(_) => {
                ErrorClassification::local("UnresolvableReference", false)
            }
            WardenError::InvalidArguments(_) => ErrorClassification::local("InvalidArguments", false),
            WardenError::GateDenied(_) => ErrorClassification::local("GateDenied", false),
            WardenError::ApprovalTimeout(_) => ErrorClassification::local("ApprovalTimeout", false),
            WardenError::ToolError(_) => ErrorClassification::local("ToolError", false),
            WardenError::Timeout(_) => ErrorClassification::local("Timeout", false),
            WardenError::ParseFailure(_) => ErrorClassification::local("ParseFailure", false),

            // No further recommendations can be produced
            WardenError::PlannerUnavailable(_) => ErrorClassification {
                error_type: "PlannerUnavailable",
                retryable: false,
                scope: ErrorScope::RunFatal,
            },

            WardenError::Cancelled(_) => ErrorClassification::local("Cancelled", false),
            WardenError::Config(_) => ErrorClassification::local("ConfigError", false),
            WardenError::Json(_) => ErrorClassification::local("JsonError", false),
            WardenError::Yaml(_) => ErrorClassification::local("YamlError", false),
            WardenError::Internal(_) => ErrorClassification::local("InternalError", false),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classify().retryable
    }

    pub fn is_run_fatal(&self) -> bool {
        self.classify().scope == ErrorScope::RunFatal
    }
}
