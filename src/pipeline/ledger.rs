use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::models::{Finding, FindingKey};

/// The run's findings. Append-only, one writer (the phase controller).
///
/// Readers take cheap [`snapshot`](FindingLedger::snapshot)s; a later append
/// never changes a snapshot already handed out.
#[derive(Debug, Default)]
pub struct FindingLedger {
    findings: Arc<Vec<Finding>>,
    keys: HashSet<FindingKey>,
}

impl FindingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `finding` unless one with the same identity is already present.
    /// Returns whether it was added.
    pub fn admit(&mut self, finding: Finding) -> bool {
        if !self.keys.insert(finding.key()) {
            return false;
        }
        Arc::make_mut(&mut self.findings).push(finding);
        true
    }

    /// Admit a batch, returning the findings that were new.
    pub fn admit_all(&mut self, findings: Vec<Finding>) -> Vec<Finding> {
        findings
            .into_iter()
            .filter(|f| self.admit(f.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Arc<Vec<Finding>> {
        Arc::clone(&self.findings)
    }

    pub fn as_slice(&self) -> &[Finding] {
        &self.findings
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count_by_severity(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for f in self.findings.iter() {
            *counts.entry(f.severity.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for f in self.findings.iter() {
            *counts.entry(f.finding_type.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingType, Severity};

    fn sub(host: &str, by: &str) -> Finding {
        Finding::new(FindingType::Subdomain, host, "subdomain-scanner", by)
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut ledger = FindingLedger::new();
        let batch = vec![sub("a.example.com", "r.0"), sub("b.example.com", "r.0")];
        assert_eq!(ledger.admit_all(batch.clone()).len(), 2);
        assert_eq!(ledger.admit_all(batch).len(), 0);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_identity_ignores_producer_and_case() {
        let mut ledger = FindingLedger::new();
        assert!(ledger.admit(sub("a.example.com", "r.0")));
        assert!(!ledger.admit(sub("A.EXAMPLE.COM", "r.1")));
        // same subject from another tool is a separate finding
        assert!(ledger.admit(Finding::new(FindingType::Subdomain, "a.example.com", "other", "x.0")));
    }

    #[test]
    fn test_snapshots_are_stable() {
        let mut ledger = FindingLedger::new();
        ledger.admit(sub("a.example.com", "r.0"));
        let before = ledger.snapshot();
        ledger.admit(sub("b.example.com", "r.0"));
        assert_eq!(before.len(), 1);
        assert_eq!(ledger.snapshot().len(), 2);
    }

    #[test]
    fn test_counts() {
        let mut ledger = FindingLedger::new();
        ledger.admit(sub("a.example.com", "r.0"));
        ledger.admit(
            Finding::new(FindingType::Vulnerability, "https://a.example.com", "vuln-scanner", "v.0")
                .with_severity(Severity::High),
        );
        assert_eq!(ledger.count_by_severity()["high"], 1);
        assert_eq!(ledger.count_by_type()["subdomain"], 1);
    }
}
