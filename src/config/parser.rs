use std::collections::HashSet;
use std::path::Path;

use crate::errors::WardenError;
use super::types::WardenConfig;
use super::security::validate_security_patterns;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<WardenConfig, WardenError> {
    if !path.exists() {
        return Err(WardenError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(WardenError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<WardenConfig, WardenError> {
    if content.len() as u64 > MAX_CONFIG_BYTES {
        return Err(WardenError::Config("Config file exceeds 1MB limit".into()));
    }

    let yaml: serde_yaml::Value = if content.trim().is_empty() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        serde_yaml::from_str(content)?
    };

    validate_security_patterns(&yaml)?;
    validate_schema(&yaml)?;

    let config: WardenConfig = serde_yaml::from_value(yaml)
        .map_err(|e| WardenError::Config(format!("Invalid configuration: {}", e)))?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Schema violations are advisory: the typed parse is authoritative.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), WardenError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| WardenError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| WardenError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts the schema cannot express.
pub fn validate_conflicts(config: &WardenConfig) -> Result<(), WardenError> {
    if config.phases.is_empty() {
        return Err(WardenError::Config("At least one phase must be configured".into()));
    }

    let mut names = HashSet::new();
    for phase in &config.phases {
        if !names.insert(phase.name.as_str()) {
            return Err(WardenError::Config(format!("Duplicate phase name: {}", phase.name)));
        }
        if phase.budget == 0 {
            return Err(WardenError::Config(format!("Phase '{}' has a zero iteration budget", phase.name)));
        }
    }

    if config.engine.max_concurrent_containers == 0 {
        return Err(WardenError::Config("engine.max_concurrent_containers must be at least 1".into()));
    }
    if config.engine.max_fanout == 0 {
        return Err(WardenError::Config("engine.max_fanout must be at least 1".into()));
    }

    let mut tools = HashSet::new();
    for tool in &config.tools {
        if !tools.insert(tool.name.as_str()) {
            return Err(WardenError::Config(format!("Duplicate tool definition: {}", tool.name)));
        }
    }

    for denied in &config.policy.denied_tools {
        if config.policy.approval_tools.contains(denied) {
            return Err(WardenError::Config(format!(
                "Conflicting policy: tool '{}' is both denied and approval-gated", denied
            )));
        }
    }
    for class in &config.policy.deny_classes {
        if config.policy.approval_classes.contains(class) {
            return Err(WardenError::Config(format!(
                "Conflicting policy: class '{}' is both denied and approval-gated", class.as_str()
            )));
        }
    }

    if config.planner.plan_file.is_some() && config.planner.endpoint.is_some() {
        warn!("Both planner.plan_file and planner.endpoint are set; the plan file takes precedence");
    }

    Ok(())
}
