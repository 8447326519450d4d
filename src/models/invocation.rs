use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::recommendation::Priority;

/// CPU, memory and process ceilings applied to a tool container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_pids")]
    pub pids: i64,
}

fn default_cpus() -> f64 {
    1.0
}

fn default_memory_mb() -> u64 {
    512
}

fn default_pids() -> i64 {
    256
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { cpus: default_cpus(), memory_mb: default_memory_mb(), pids: default_pids() }
    }
}

/// Network egress granted to a tool container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    #[default]
    None,
    Egress,
}

/// A concrete, fully-bound tool call ready for gating and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub recommendation_id: String,
    pub tool: String,
    pub arguments: BTreeMap<String, Value>,
    pub limits: ResourceLimits,
    pub timeout_secs: u64,
    pub priority: Priority,
}

/// Argument names that identify the asset an invocation is aimed at.
const SUBJECT_ARGUMENTS: &[&str] = &["target", "host", "url", "domain", "subject"];

impl Invocation {
    /// The asset this invocation targets, if any argument names one.
    pub fn subject(&self) -> Option<String> {
        SUBJECT_ARGUMENTS.iter()
            .find_map(|name| self.arguments.get(*name))
            .and_then(value_as_text)
    }

    /// Every asset the arguments name: each subject argument, plus any other
    /// argument carrying a URL. Arrays contribute each element.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects = Vec::new();
        for (name, value) in &self.arguments {
            let named = SUBJECT_ARGUMENTS.contains(&name.as_str());
            let mut texts = Vec::new();
            flatten_text(value, &mut texts);
            subjects.extend(texts.into_iter().filter(|text| named || text.contains("://")));
        }
        subjects
    }

    /// Subject, falling back to the run target.
    pub fn subject_or(&self, fallback: &str) -> String {
        self.subject().unwrap_or_else(|| fallback.to_string())
    }
}

/// Render a JSON value the way it appears on a command line.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_as_text).collect();
            Some(parts.join(","))
        }
        other => Some(other.to_string()),
    }
}

fn flatten_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten_text(item, out)),
        other => out.extend(value_as_text(other).filter(|text| !text.is_empty())),
    }
}
