use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::phase::{default_phases, PhaseDefinition};
use crate::registry::{ImpactClass, ToolSpec};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseDefinition>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub tools_dir: Option<PathBuf>,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            engine: EngineConfig::default(),
            phases: default_phases(),
            policy: PolicyConfig::default(),
            tools: Vec::new(),
            tools_dir: None,
            planner: PlannerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Values normally given on the command line.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RunConfig {
    pub target: Option<String>,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_containers: usize,
    pub max_fanout: usize,
    pub max_defer_ticks: u32,
    pub infrastructure_retries: u32,
    pub retry_base_delay_ms: u64,
    pub output_cap_bytes: usize,
    pub termination_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_containers: 4,
            max_fanout: 64,
            max_defer_ticks: 3,
            infrastructure_retries: 2,
            retry_base_delay_ms: 500,
            output_cap_bytes: 256 * 1024,
            termination_grace_secs: 10,
        }
    }
}

pub const DEFAULT_DESTRUCTIVE_PATTERNS: &[&str] = &[
    "rm -rf",
    "drop table",
    "drop database",
    "truncate table",
    "shutdown",
    "mkfs",
    "dd if=",
    "--os-pwn",
    "--os-shell",
    "--file-write",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub version: String,
    /// Host patterns (`example.com`, `*.example.com`, `*`), optionally with a
    /// path prefix. Empty means the run target and its subdomains.
    pub scope: Vec<String>,
    pub denied_tools: Vec<String>,
    pub deny_classes: Vec<ImpactClass>,
    /// Case-insensitive substrings that hard-deny an invocation.
    pub destructive_patterns: Vec<String>,
    pub approval_classes: Vec<ImpactClass>,
    pub approval_tools: Vec<String>,
    pub approval_expiry_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            scope: Vec::new(),
            denied_tools: Vec::new(),
            deny_classes: vec![ImpactClass::Destructive],
            destructive_patterns: DEFAULT_DESTRUCTIVE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            approval_classes: vec![ImpactClass::HighImpact],
            approval_tools: Vec::new(),
            approval_expiry_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// YAML plan file for the scripted planner.
    pub plan_file: Option<PathBuf>,
    /// HTTP endpoint receiving planning requests.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Environment variable holding a bearer token for the endpoint.
    pub api_key_env: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            plan_file: None,
            endpoint: None,
            timeout_secs: 120,
            max_retries: 2,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("./warden-runs") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_concurrent_containers, 4);
        assert_eq!(engine.max_fanout, 64);
        assert_eq!(engine.max_defer_ticks, 3);
        assert_eq!(engine.infrastructure_retries, 2);
        assert_eq!(engine.output_cap_bytes, 262_144);
        assert_eq!(engine.termination_grace_secs, 10);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.approval_expiry_secs, 300);
        assert_eq!(policy.approval_classes, vec![ImpactClass::HighImpact]);
        assert_eq!(policy.deny_classes, vec![ImpactClass::Destructive]);
        assert!(policy.destructive_patterns.iter().any(|p| p == "rm -rf"));
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: WardenConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.phases.len(), 3);
        assert!(config.tools.is_empty());
        assert_eq!(config.output.directory, PathBuf::from("./warden-runs"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: WardenConfig = serde_yaml::from_str("engine:\n  max_fanout: 8\n").unwrap();
        assert_eq!(config.engine.max_fanout, 8);
        assert_eq!(config.engine.max_concurrent_containers, 4);
    }
}
