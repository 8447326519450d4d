use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::models::{Finding, FindingKey};

/// Collapse findings that share an identity, keeping the more severe one.
/// First-seen order is preserved.
pub fn deduplicate_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut index: HashMap<FindingKey, usize> = HashMap::new();
    let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());
    for finding in findings {
        match index.entry(finding.key()) {
            Entry::Vacant(e) => {
                e.insert(kept.len());
                kept.push(finding);
            }
            Entry::Occupied(e) => {
                let slot = &mut kept[*e.get()];
                // Keep higher severity (lower rank number)
                if finding.severity.rank() < slot.severity.rank() {
                    *slot = finding;
                }
            }
        }
    }
    kept
}
