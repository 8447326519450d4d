use std::sync::LazyLock;

use serde_json::{json, Value};

/// Shape of one recommendation returned by an external planner.
pub static RECOMMENDATION_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$defs": {
            "recommendation": {
                "type": "object",
                "required": ["tool"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "tool": { "type": "string", "minLength": 1 },
                    "arguments": { "type": "object" },
                    "priority": { "enum": ["critical", "high", "medium", "low"] },
                    "rationale": { "type": "string" }
                }
            }
        },
        "allOf": [
            { "$ref": "#/$defs/recommendation" },
            {
                "properties": {
                    "fallback": { "$ref": "#/$defs/recommendation" }
                }
            }
        ]
    })
});

static COMPILED: LazyLock<Option<jsonschema::JSONSchema>> = LazyLock::new(|| {
    jsonschema::JSONSchema::compile(&RECOMMENDATION_SCHEMA).ok()
});

/// Schema violations of one recommendation entry, empty when valid.
pub fn validate_recommendation(entry: &Value) -> Vec<String> {
    let Some(compiled) = COMPILED.as_ref() else {
        return vec!["recommendation schema failed to compile".to_string()];
    };
    match compiled.validate(entry) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| format!("{}: {}", e.instance_path, e)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entry() {
        let entry = json!({
            "tool": "port-scanner",
            "arguments": {"target": "ref(subdomain-scanner, subject)"},
            "priority": "high",
            "fallback": {"tool": "tech-detector"}
        });
        assert!(validate_recommendation(&entry).is_empty());
    }

    #[test]
    fn test_missing_tool_and_bad_priority() {
        let errors = validate_recommendation(&json!({"priority": "urgent"}));
        assert!(errors.len() >= 2, "{:?}", errors);
    }

    #[test]
    fn test_bad_fallback() {
        let errors = validate_recommendation(&json!({"tool": "a", "fallback": {"arguments": []}}));
        assert!(!errors.is_empty());
    }
}
