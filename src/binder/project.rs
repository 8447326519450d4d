//! Field projection over the finding ledger.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::Finding;
use super::reference::Reference;

/// Fields that fall back to the finding subject when the evidence lacks them.
const SUBJECT_ALIASES: &[&str] = &["host", "target", "asset", "url"];

/// Project `reference.field` over every finding produced by `reference.tool`.
///
/// Arrays are flattened, nulls skipped, and duplicates collapsed while keeping
/// ledger order, so the result is stable for a given snapshot.
pub fn project(findings: &[Finding], reference: &Reference) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();

    for finding in findings.iter().filter(|f| f.tool == reference.tool) {
        let Some(value) = field_of(finding, &reference.field) else {
            continue;
        };
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for item in items {
            if item.is_null() {
                continue;
            }
            if seen.insert(item.to_string()) {
                values.push(item);
            }
        }
    }

    values
}

fn field_of(finding: &Finding, field: &str) -> Option<Value> {
    match field {
        "subject" => return Some(Value::String(finding.subject.clone())),
        "type" => return Some(Value::String(finding.finding_type.as_str().to_string())),
        "severity" => return Some(Value::String(finding.severity.as_str().to_string())),
        "confidence" => return serde_json::Number::from_f64(finding.confidence).map(Value::Number),
        "tool" => return Some(Value::String(finding.tool.clone())),
        "produced_by" => return Some(Value::String(finding.produced_by.clone())),
        "evidence" => return (!finding.evidence.is_null()).then(|| finding.evidence.clone()),
        _ => {}
    }

    let path = field.strip_prefix("evidence.").unwrap_or(field);
    match lookup_path(&finding.evidence, path) {
        Some(v) if !v.is_null() => Some(v.clone()),
        _ if SUBJECT_ALIASES.contains(&field) => Some(Value::String(finding.subject.clone())),
        _ => None,
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
