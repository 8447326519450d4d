use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WardenError;
use crate::models::{value_as_text, NetworkPolicy, ResourceLimits};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}").unwrap()
});

/// Impact classification used by the restraint gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ImpactClass {
    #[default]
    Passive,
    Active,
    HighImpact,
    Destructive,
}

impl ImpactClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactClass::Passive => "passive",
            ImpactClass::Active => "active",
            ImpactClass::HighImpact => "high-impact",
            ImpactClass::Destructive => "destructive",
        }
    }
}

/// Static description of a tool: image, argv template, sandbox profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub image: String,
    /// Argv tokens. `{name}` is replaced by an argument, `{name?}` drops the
    /// token when the argument is absent.
    pub command: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub network: NetworkPolicy,
    /// Tools sharing a scratch volume never run concurrently.
    #[serde(default)]
    pub scratch_volume: bool,
    #[serde(default)]
    pub class: ImpactClass,
    /// Output parser name. Defaults to a parser registered under the tool name.
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

fn default_timeout() -> u64 {
    300
}

impl ToolSpec {
    /// Placeholder names in the command template, required ones first.
    pub fn parameters(&self) -> Vec<(String, bool)> {
        let mut params: Vec<(String, bool)> = Vec::new();
        for token in &self.command {
            for caps in PLACEHOLDER.captures_iter(token) {
                let name = caps[1].to_string();
                let required = caps.get(2).is_none();
                if !params.iter().any(|(n, _)| *n == name) {
                    params.push((name, required));
                }
            }
        }
        params.sort_by_key(|(_, required)| !*required);
        params
    }

    /// Substitute arguments into the argv template.
    pub fn render_command(&self, arguments: &BTreeMap<String, Value>) -> Result<Vec<String>, WardenError> {
        let mut argv = Vec::with_capacity(self.command.len());
        'tokens: for token in &self.command {
            let mut rendered = String::with_capacity(token.len());
            let mut cursor = 0;
            for caps in PLACEHOLDER.captures_iter(token) {
                let Some(whole) = caps.get(0) else { continue };
                rendered.push_str(&token[cursor..whole.start()]);
                let name = &caps[1];
                let optional = caps.get(2).is_some();
                let value = arguments.get(name)
                    .or_else(|| self.defaults.get(name))
                    .and_then(value_as_text);
                match value {
                    Some(v) => rendered.push_str(&v),
                    None if optional => continue 'tokens,
                    None => {
                        return Err(WardenError::InvalidArguments(format!(
                            "Tool '{}' requires argument '{}'", self.name, name
                        )));
                    }
                }
                cursor = whole.end();
            }
            rendered.push_str(&token[cursor..]);
            argv.push(rendered);
        }
        Ok(argv)
    }

    /// Names that may appear in a recommendation's arguments.
    pub fn accepts(&self, argument: &str) -> bool {
        self.parameters().iter().any(|(n, _)| n == argument) || self.defaults.contains_key(argument)
    }

    pub fn parser_name(&self) -> &str {
        self.parser.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn port_scanner() -> ToolSpec {
        serde_yaml::from_str(r#"
name: port-scanner
image: instrumentisto/nmap:latest
command: ["nmap", "-sV", "-p", "{ports}", "--script={scripts?}", "{target}"]
defaults:
  ports: "1-1000"
"#).unwrap()
    }

    fn args(v: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_defaults_from_yaml() {
        let spec = port_scanner();
        assert_eq!(spec.timeout_secs, 300);
        assert_eq!(spec.class, ImpactClass::Passive);
        assert_eq!(spec.network, NetworkPolicy::None);
        assert_eq!(spec.parser_name(), "port-scanner");
    }

    #[test]
    fn test_render_uses_arguments_and_defaults() {
        let spec = port_scanner();
        let argv = spec.render_command(&args(json!({"target": "a.example.com"}))).unwrap();
        assert_eq!(argv, vec!["nmap", "-sV", "-p", "1-1000", "a.example.com"]);
    }

    #[test]
    fn test_render_optional_placeholder() {
        let spec = port_scanner();
        let argv = spec
            .render_command(&args(json!({"target": "a.example.com", "scripts": "vuln", "ports": [80, 443]})))
            .unwrap();
        assert_eq!(argv, vec!["nmap", "-sV", "-p", "80,443", "--script=vuln", "a.example.com"]);
    }

    #[test]
    fn test_render_missing_required_argument() {
        let spec = port_scanner();
        let err = spec.render_command(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, WardenError::InvalidArguments(_)));
    }

    #[test]
    fn test_parameters_and_accepts() {
        let spec = port_scanner();
        let params = spec.parameters();
        assert_eq!(params[0], ("ports".to_string(), true));
        assert!(params.contains(&("scripts".to_string(), false)));
        assert!(spec.accepts("target"));
        assert!(!spec.accepts("wordlist"));
    }
}
