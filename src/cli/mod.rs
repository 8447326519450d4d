pub mod approvals;
pub mod commands;
pub mod run;
pub mod tools;

pub use commands::{ApprovalMode, Cli, Commands};

use std::path::{Path, PathBuf};

use crate::config::{self, WardenConfig};
use crate::errors::WardenError;
use crate::registry::ToolRegistry;

const DEFAULT_TOOLS_DIR: &str = "tools";

/// Config file if given, defaults otherwise.
pub async fn load_config(path: Option<&str>) -> Result<WardenConfig, WardenError> {
    match path {
        Some(p) => config::parse_config(&PathBuf::from(p)).await,
        None => Ok(WardenConfig::default()),
    }
}

/// Registry from the tools directory plus inline `tools` entries.
pub fn build_registry(config: &WardenConfig, tools_dir: Option<&str>) -> Result<ToolRegistry, WardenError> {
    let dir = tools_dir
        .map(PathBuf::from)
        .or_else(|| config.tools_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOLS_DIR));

    let mut registry = ToolRegistry::new();
    registry.load_dir(Path::new(&dir))?;
    for spec in &config.tools {
        registry.register(spec.clone())?;
    }
    if registry.is_empty() {
        return Err(WardenError::Config(format!(
            "No tools registered: {} has no tool files and the config defines none",
            dir.display()
        )));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registry_from_shipped_tools() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tools");
        let registry = build_registry(&WardenConfig::default(), Some(dir)).unwrap();
        assert!(registry.contains("subdomain-scanner"));
        assert!(registry.contains("port-scanner"));
    }

    #[test]
    fn test_empty_registry_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_registry(&WardenConfig::default(), dir.path().to_str()).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let err = load_config(Some("/nonexistent/warden.yaml")).await.unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }
}
