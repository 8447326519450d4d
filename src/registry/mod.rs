//! Tool registry: static, read-only after startup.

pub mod spec;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::WardenError;
pub use spec::{ImpactClass, ToolSpec};

/// Layout of a tool definition file.
#[derive(Debug, Deserialize)]
pub struct ToolFile {
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Result<Self, WardenError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), WardenError> {
        if spec.name.trim().is_empty() {
            return Err(WardenError::Config("Tool name must not be empty".to_string()));
        }
        if spec.image.trim().is_empty() {
            return Err(WardenError::Config(format!("Tool '{}' has no image", spec.name)));
        }
        if spec.command.is_empty() {
            return Err(WardenError::Config(format!("Tool '{}' has an empty command", spec.name)));
        }
        if self.tools.contains_key(&spec.name) {
            return Err(WardenError::Config(format!("Duplicate tool definition: {}", spec.name)));
        }
        debug!(tool = %spec.name, image = %spec.image, class = spec.class.as_str(), "Registered tool");
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Load every `*.yaml` file in `dir`. A missing directory is not an error.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, WardenError> {
        if !dir.exists() {
            return Ok(0);
        }

        let pattern = dir.join("*.yaml");
        let pattern_str = pattern.to_string_lossy();
        let mut loaded = 0;

        let mut paths = Vec::new();
        for entry in glob::glob(&pattern_str)
            .map_err(|e| WardenError::Config(format!("Invalid glob pattern: {}", e)))?
        {
            paths.push(entry.map_err(|e| WardenError::Config(format!("Glob error: {}", e)))?);
        }
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file: ToolFile = serde_yaml::from_str(&content).map_err(|e| {
                WardenError::Config(format!("Invalid tool file {}: {}", path.display(), e))
            })?;
            let count = file.tools.len();
            for spec in file.tools {
                self.register(spec)?;
            }
            info!(file = %path.display(), tools = count, "Loaded tool definitions");
            loaded += count;
        }

        Ok(loaded)
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolSpec, WardenError> {
        self.tools.get(name)
            .ok_or_else(|| WardenError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOLS: &str = r#"
tools:
  - name: subdomain-scanner
    image: projectdiscovery/subfinder:latest
    command: ["subfinder", "-silent", "-d", "{domain}"]
    network: egress
  - name: sql-injection
    image: parrotsec/sqlmap:latest
    command: ["sqlmap", "--batch", "-u", "{url}"]
    class: high-impact
"#;

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("recon.yaml"), TOOLS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ToolRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(registry.lookup("sql-injection").unwrap().class, ImpactClass::HighImpact);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.load_dir(Path::new("/nonexistent/tools")).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.lookup("nope"), Err(WardenError::UnknownTool(_))));
    }

    #[test]
    fn test_duplicate_tool_rejected() {
        let file: ToolFile = serde_yaml::from_str(TOOLS).unwrap();
        let mut specs = file.tools.clone();
        specs.push(file.tools[0].clone());
        assert!(matches!(ToolRegistry::from_specs(specs), Err(WardenError::Config(_))));
    }
}
