//! Typed cross-step references.
//!
//! Planner arguments may embed `ref(tool, field)` or `ref(tool, field, all)`.
//! They are parsed once, at the Planner boundary, into [`ArgValue`] so the
//! binder resolves them structurally instead of searching strings at
//! execution time.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static REF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\bref\(\s*["']?([A-Za-z0-9_.:\-]+)["']?\s*,\s*["']?([A-Za-z0-9_.\-]+)["']?\s*(?:,\s*["']?(all)["']?\s*)?\)"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanOut {
    /// Fan out only if the projection is multi-valued.
    Implicit,
    /// Written as `ref(tool, field, all)`.
    All,
}

/// A reference to a field of the findings produced by an earlier tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub tool: String,
    pub field: String,
    pub fan_out: FanOut,
}

impl Reference {
    pub fn new(tool: impl Into<String>, field: impl Into<String>) -> Self {
        Self { tool: tool.into(), field: field.into(), fan_out: FanOut::Implicit }
    }

    pub fn all(tool: impl Into<String>, field: impl Into<String>) -> Self {
        Self { tool: tool.into(), field: field.into(), fan_out: FanOut::All }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fan_out {
            FanOut::Implicit => write!(f, "ref({}, {})", self.tool, self.field),
            FanOut::All => write!(f, "ref({}, {}, all)", self.tool, self.field),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// One argument value of a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ArgValue {
    /// Plain JSON, used as-is.
    Literal(Value),
    /// A string with at least one embedded reference.
    Template(Vec<Segment>),
}

impl ArgValue {
    pub fn reference(reference: Reference) -> Self {
        ArgValue::Template(vec![Segment::Ref(reference)])
    }

    pub fn references(&self) -> Vec<&Reference> {
        match self {
            ArgValue::Literal(_) => Vec::new(),
            ArgValue::Template(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Ref(r) => Some(r),
                    Segment::Text(_) => None,
                })
                .collect(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ArgValue::Literal(_))
    }

    fn parse_string(s: &str) -> ArgValue {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for caps in REF_PATTERN.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > cursor {
                segments.push(Segment::Text(s[cursor..whole.start()].to_string()));
            }
            let reference = Reference {
                tool: caps[1].to_string(),
                field: caps[2].to_string(),
                fan_out: if caps.get(3).is_some() { FanOut::All } else { FanOut::Implicit },
            };
            segments.push(Segment::Ref(reference));
            cursor = whole.end();
        }
        if segments.is_empty() {
            return ArgValue::Literal(Value::String(s.to_string()));
        }
        if cursor < s.len() {
            segments.push(Segment::Text(s[cursor..].to_string()));
        }
        ArgValue::Template(segments)
    }

    /// `{"$ref": {"tool": "...", "field": "...", "all": true}}`
    fn parse_object_ref(map: &Map<String, Value>) -> Option<Result<ArgValue, String>> {
        if map.len() != 1 {
            return None;
        }
        let inner = map.get("$ref")?;
        let tool = inner.get("tool").and_then(Value::as_str);
        let field = inner.get("field").and_then(Value::as_str);
        let all = inner.get("all").and_then(Value::as_bool).unwrap_or(false);
        Some(match (tool, field) {
            (Some(tool), Some(field)) if !tool.is_empty() && !field.is_empty() => {
                let reference = if all { Reference::all(tool, field) } else { Reference::new(tool, field) };
                Ok(ArgValue::reference(reference))
            }
            _ => Err(format!("malformed $ref object: {}", Value::Object(map.clone()))),
        })
    }
}

impl TryFrom<Value> for ArgValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::String(s) => Ok(ArgValue::parse_string(s)),
            Value::Object(map) => match ArgValue::parse_object_ref(map) {
                Some(parsed) => parsed,
                None => Ok(ArgValue::Literal(value)),
            },
            _ => Ok(ArgValue::Literal(value)),
        }
    }
}

impl From<ArgValue> for Value {
    fn from(arg: ArgValue) -> Self {
        match arg {
            ArgValue::Literal(v) => v,
            ArgValue::Template(segments) => {
                let mut out = String::new();
                for segment in &segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => out.push_str(&r.to_string()),
                    }
                }
                Value::String(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> ArgValue {
        ArgValue::try_from(v).unwrap()
    }

    #[test]
    fn test_plain_string_is_literal() {
        assert_eq!(parse(json!("example.com")), ArgValue::Literal(json!("example.com")));
    }

    #[test]
    fn test_whole_string_reference() {
        let arg = parse(json!("ref(subdomain-scanner, host)"));
        assert_eq!(arg, ArgValue::reference(Reference::new("subdomain-scanner", "host")));
    }

    #[test]
    fn test_quoted_reference_with_all() {
        let arg = parse(json!("ref(\"port-scanner\", \"evidence.port\", all)"));
        assert_eq!(arg, ArgValue::reference(Reference::all("port-scanner", "evidence.port")));
    }

    #[test]
    fn test_embedded_reference_keeps_surrounding_text() {
        let arg = parse(json!("https://ref(subdomain-scanner, host)/login"));
        assert_eq!(
            arg,
            ArgValue::Template(vec![
                Segment::Text("https://".into()),
                Segment::Ref(Reference::new("subdomain-scanner", "host")),
                Segment::Text("/login".into()),
            ])
        );
        assert_eq!(arg.references().len(), 1);
    }

    #[test]
    fn test_object_reference() {
        let arg = parse(json!({"$ref": {"tool": "crawler", "field": "subject", "all": true}}));
        assert_eq!(arg, ArgValue::reference(Reference::all("crawler", "subject")));
    }

    #[test]
    fn test_malformed_object_reference_is_rejected() {
        assert!(ArgValue::try_from(json!({"$ref": {"tool": "crawler"}})).is_err());
    }

    #[test]
    fn test_non_reference_text_is_untouched() {
        // looks similar but is not a reference
        assert!(parse(json!("preference(a)")).is_resolved());
        assert!(parse(json!(8080)).is_resolved());
        assert!(parse(json!({"headers": {"X-Test": "1"}})).is_resolved());
    }

    #[test]
    fn test_template_converts_back_to_reference_syntax() {
        let arg = parse(json!("ref(a, b, all)"));
        assert_eq!(Value::from(arg), json!("ref(a, b, all)"));
    }
}
