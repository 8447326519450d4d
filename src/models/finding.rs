use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity level for a finding, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Returns a numeric rank where lower values indicate higher severity.
    /// Critical = 0, High = 1, Medium = 2, Low = 3, Info = 4.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Lenient parse of tool-reported severity labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "critical" | "crit" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" | "moderate" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "informational" | "unknown" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of discovered information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingType {
    Subdomain,
    OpenPort,
    Endpoint,
    Vulnerability,
    Technology,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::Subdomain => "subdomain",
            FindingType::OpenPort => "open-port",
            FindingType::Endpoint => "endpoint",
            FindingType::Vulnerability => "vulnerability",
            FindingType::Technology => "technology",
        }
    }
}

impl std::fmt::Display for FindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured unit of discovered information, produced by one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// The asset this finding concerns (host, host:port, URL, ...).
    pub subject: String,
    #[serde(default)]
    pub evidence: Value,
    /// Tool that produced the finding.
    pub tool: String,
    /// Invocation id that produced the finding.
    pub produced_by: String,
}

impl Finding {
    pub fn new(
        finding_type: FindingType,
        subject: impl Into<String>,
        tool: impl Into<String>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            finding_type,
            severity: Severity::Info,
            confidence: 1.0,
            subject: subject.into().trim().to_string(),
            evidence: Value::Null,
            tool: tool.into(),
            produced_by: produced_by.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        self
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    /// Identity used for deduplication within a run.
    pub fn key(&self) -> FindingKey {
        FindingKey {
            tool: self.tool.clone(),
            subject: self.subject.to_lowercase(),
            finding_type: self.finding_type,
        }
    }
}

/// Deduplication identity: (tool, subject, type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FindingKey {
    pub tool: String,
    pub subject: String,
    pub finding_type: FindingType,
}
