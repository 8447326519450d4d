use serde::{Deserialize, Serialize};

use crate::models::{Finding, FindingType, Severity};

/// Pure predicate over the run's accumulated findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExitPredicate {
    Always,
    /// Only budget exhaustion closes the phase.
    Never,
    AnyFinding,
    FindingOfType {
        #[serde(rename = "type")]
        finding_type: FindingType,
        #[serde(default = "default_min_count")]
        min_count: usize,
    },
    SeverityAtLeast {
        severity: Severity,
    },
    AllOf {
        predicates: Vec<ExitPredicate>,
    },
    AnyOf {
        predicates: Vec<ExitPredicate>,
    },
}

fn default_min_count() -> usize {
    1
}

impl ExitPredicate {
    pub fn evaluate(&self, findings: &[Finding]) -> bool {
        match self {
            ExitPredicate::Always => true,
            ExitPredicate::Never => false,
            ExitPredicate::AnyFinding => !findings.is_empty(),
            ExitPredicate::FindingOfType { finding_type, min_count } => {
                findings.iter().filter(|f| f.finding_type == *finding_type).count() >= *min_count
            }
            // Severity orders most severe first
            ExitPredicate::SeverityAtLeast { severity } => {
                findings.iter().any(|f| f.severity <= *severity)
            }
            ExitPredicate::AllOf { predicates } => predicates.iter().all(|p| p.evaluate(findings)),
            ExitPredicate::AnyOf { predicates } => predicates.iter().any(|p| p.evaluate(findings)),
        }
    }

    pub fn finding_of(finding_type: FindingType) -> Self {
        ExitPredicate::FindingOfType { finding_type, min_count: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub exit: ExitPredicate,
    /// Planning rounds before the phase is closed as incomplete.
    #[serde(default = "default_budget")]
    pub budget: u32,
}

fn default_budget() -> u32 {
    3
}

impl PhaseDefinition {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

pub fn default_phases() -> Vec<PhaseDefinition> {
    vec![
        PhaseDefinition {
            name: "recon".to_string(),
            display_name: Some("Reconnaissance".to_string()),
            description: "Enumerate hosts and services in scope".to_string(),
            exit: ExitPredicate::finding_of(FindingType::Subdomain),
            budget: default_budget(),
        },
        PhaseDefinition {
            name: "analyze".to_string(),
            display_name: Some("Analysis".to_string()),
            description: "Map reachable endpoints and technologies".to_string(),
            exit: ExitPredicate::finding_of(FindingType::Endpoint),
            budget: default_budget(),
        },
        PhaseDefinition {
            name: "exploit".to_string(),
            display_name: Some("Exploitation".to_string()),
            description: "Confirm vulnerabilities on discovered endpoints".to_string(),
            exit: ExitPredicate::finding_of(FindingType::Vulnerability),
            budget: default_budget(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(t: FindingType, severity: Severity) -> Finding {
        Finding::new(t, "a.example.com", "tool", "r.0").with_severity(severity)
    }

    #[test]
    fn test_finding_of_type_counts() {
        let p = ExitPredicate::FindingOfType { finding_type: FindingType::Subdomain, min_count: 2 };
        let one = vec![finding(FindingType::Subdomain, Severity::Info)];
        assert!(!p.evaluate(&one));
        let mut two = one.clone();
        two.push(finding(FindingType::Subdomain, Severity::Info));
        assert!(p.evaluate(&two));
    }

    #[test]
    fn test_severity_at_least() {
        let p = ExitPredicate::SeverityAtLeast { severity: Severity::High };
        assert!(!p.evaluate(&[finding(FindingType::Vulnerability, Severity::Medium)]));
        assert!(p.evaluate(&[finding(FindingType::Vulnerability, Severity::Critical)]));
    }

    #[test]
    fn test_combinators_and_yaml() {
        let p: ExitPredicate = serde_yaml::from_str(r#"
kind: any-of
predicates:
  - kind: finding-of-type
    type: endpoint
  - kind: all-of
    predicates:
      - kind: any-finding
      - kind: never
"#).unwrap();
        assert!(!p.evaluate(&[finding(FindingType::Subdomain, Severity::Info)]));
        assert!(p.evaluate(&[finding(FindingType::Endpoint, Severity::Info)]));
    }

    #[test]
    fn test_default_phases_order() {
        let names: Vec<String> = default_phases().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["recon", "analyze", "exploit"]);
    }

    #[test]
    fn test_empty_findings() {
        assert!(ExitPredicate::Always.evaluate(&[]));
        assert!(!ExitPredicate::AnyFinding.evaluate(&[]));
        assert!(!ExitPredicate::finding_of(FindingType::Subdomain).evaluate(&[]));
    }
}
