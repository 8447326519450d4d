use tracing::debug;

use crate::config::PolicyConfig;
use crate::models::{value_as_text, GateDecision, GateOutcome, Invocation};
use crate::registry::ToolSpec;
use super::scope::Scope;

pub const REASON_TOOL_DENIED: &str = "tool-denied";
pub const REASON_DESTRUCTIVE_TOOL: &str = "destructive-tool";
pub const REASON_DESTRUCTIVE_ARGUMENT: &str = "destructive-argument";
pub const REASON_OUT_OF_SCOPE: &str = "out-of-scope";
pub const REASON_HIGH_IMPACT: &str = "high-impact";
pub const REASON_APPROVAL_REQUIRED: &str = "approval-required";
pub const REASON_DEFAULT_ALLOW: &str = "default-allow";

/// Compiled restraint policy for one run.
#[derive(Debug, Clone)]
pub struct Policy {
    config: PolicyConfig,
    scope: Scope,
    patterns: Vec<String>,
    target: String,
}

impl Policy {
    pub fn new(config: PolicyConfig, target: &str) -> Self {
        let scope = Scope::new(&config.scope, target);
        let patterns = config.destructive_patterns.iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { config, scope, patterns, target: target.to_string() }
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn approval_expiry_secs(&self) -> u64 {
        self.config.approval_expiry_secs
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Hard denials first, then approval requirements, then default allow.
    pub fn evaluate(&self, invocation: &Invocation, spec: &ToolSpec) -> GateDecision {
        let decide = |outcome, reason: String| {
            GateDecision::new(&invocation.id, outcome, reason, &self.config.version)
        };

        if self.config.denied_tools.contains(&spec.name) {
            return decide(GateOutcome::Deny, REASON_TOOL_DENIED.to_string());
        }
        if self.config.deny_classes.contains(&spec.class) {
            return decide(GateOutcome::Deny, REASON_DESTRUCTIVE_TOOL.to_string());
        }
        if let Some(pattern) = self.destructive_argument(invocation) {
            return decide(GateOutcome::Deny, format!("{}: {}", REASON_DESTRUCTIVE_ARGUMENT, pattern));
        }

        if let Some(outside) = self.out_of_scope(invocation) {
            debug!(invocation = %invocation.id, subject = %outside, "Subject outside engagement scope");
            return decide(GateOutcome::Deny, REASON_OUT_OF_SCOPE.to_string());
        }

        if self.config.approval_classes.contains(&spec.class) {
            return decide(GateOutcome::PendingApproval, REASON_HIGH_IMPACT.to_string());
        }
        if self.config.approval_tools.contains(&spec.name) {
            return decide(GateOutcome::PendingApproval, REASON_APPROVAL_REQUIRED.to_string());
        }

        decide(GateOutcome::Allow, REASON_DEFAULT_ALLOW.to_string())
    }

    /// First named asset outside scope. Without any, the run target stands in.
    fn out_of_scope(&self, invocation: &Invocation) -> Option<String> {
        let mut subjects = invocation.subjects();
        if subjects.is_empty() {
            subjects.push(self.target.clone());
        }
        subjects.into_iter().find(|subject| !self.scope.contains(subject))
    }

    fn destructive_argument(&self, invocation: &Invocation) -> Option<&str> {
        invocation.arguments.values()
            .filter_map(value_as_text)
            .map(|text| text.to_lowercase())
            .find_map(|text| self.patterns.iter().find(|p| text.contains(p.as_str())))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, ResourceLimits};
    use crate::registry::ImpactClass;
    use serde_json::{json, Value};

    fn spec(name: &str, class: ImpactClass) -> ToolSpec {
        let mut spec: ToolSpec = serde_json::from_value(json!({
            "name": name, "image": "img", "command": [name, "{target}"]
        })).unwrap();
        spec.class = class;
        spec
    }

    fn invocation(tool: &str, args: Value) -> Invocation {
        Invocation {
            id: "r1.0".into(),
            recommendation_id: "r1".into(),
            tool: tool.into(),
            arguments: serde_json::from_value(args).unwrap(),
            limits: ResourceLimits::default(),
            timeout_secs: 60,
            priority: Priority::Medium,
        }
    }

    fn policy() -> Policy {
        Policy::new(PolicyConfig::default(), "example.com")
    }

    #[test]
    fn test_default_allow_in_scope() {
        let d = policy().evaluate(
            &invocation("port-scanner", json!({"target": "a.example.com"})),
            &spec("port-scanner", ImpactClass::Active),
        );
        assert_eq!(d.outcome, GateOutcome::Allow);
        assert_eq!(d.reason, REASON_DEFAULT_ALLOW);
        assert_eq!(d.policy_version, "1");
    }

    #[test]
    fn test_out_of_scope_denied() {
        let d = policy().evaluate(
            &invocation("port-scanner", json!({"target": "evil.org"})),
            &spec("port-scanner", ImpactClass::Active),
        );
        assert_eq!(d.outcome, GateOutcome::Deny);
        assert_eq!(d.reason, REASON_OUT_OF_SCOPE);
    }

    #[test]
    fn test_every_subject_argument_is_scope_checked() {
        let d = policy().evaluate(
            &invocation("dir-bruteforcer", json!({"target": "a.example.com", "url": "https://evil.org/FUZZ"})),
            &spec("dir-bruteforcer", ImpactClass::Active),
        );
        assert_eq!(d.outcome, GateOutcome::Deny);
        assert_eq!(d.reason, REASON_OUT_OF_SCOPE);

        // a URL under any argument name counts
        let d = policy().evaluate(
            &invocation("dir-bruteforcer", json!({"target": "a.example.com", "proxy": "http://10.0.0.5:8080"})),
            &spec("dir-bruteforcer", ImpactClass::Active),
        );
        assert_eq!(d.reason, REASON_OUT_OF_SCOPE);

        let d = policy().evaluate(
            &invocation("port-scanner", json!({"target": ["a.example.com", "evil.org"]})),
            &spec("port-scanner", ImpactClass::Active),
        );
        assert_eq!(d.reason, REASON_OUT_OF_SCOPE);

        let d = policy().evaluate(
            &invocation("dir-bruteforcer", json!({"url": "https://a.example.com/FUZZ", "wordlist": "common.txt"})),
            &spec("dir-bruteforcer", ImpactClass::Active),
        );
        assert!(d.is_allowed());
    }

    #[test]
    fn test_high_impact_needs_approval() {
        let d = policy().evaluate(
            &invocation("sql-injection", json!({"target": "https://a.example.com/login"})),
            &spec("sql-injection", ImpactClass::HighImpact),
        );
        assert_eq!(d.outcome, GateOutcome::PendingApproval);
        assert_eq!(d.reason, REASON_HIGH_IMPACT);
    }

    #[test]
    fn test_hard_denial_beats_approval() {
        // out of scope and high impact: deny wins
        let d = policy().evaluate(
            &invocation("sql-injection", json!({"target": "https://evil.org"})),
            &spec("sql-injection", ImpactClass::HighImpact),
        );
        assert_eq!(d.outcome, GateOutcome::Deny);

        let d = policy().evaluate(
            &invocation("sql-injection", json!({"target": "a.example.com", "extra": "--os-pwn"})),
            &spec("sql-injection", ImpactClass::HighImpact),
        );
        assert_eq!(d.outcome, GateOutcome::Deny);
        assert!(d.reason.starts_with(REASON_DESTRUCTIVE_ARGUMENT));
    }

    #[test]
    fn test_destructive_class_and_denied_tool() {
        let d = policy().evaluate(
            &invocation("wiper", json!({"target": "a.example.com"})),
            &spec("wiper", ImpactClass::Destructive),
        );
        assert_eq!(d.reason, REASON_DESTRUCTIVE_TOOL);

        let mut config = PolicyConfig::default();
        config.denied_tools = vec!["port-scanner".into()];
        let d = Policy::new(config, "example.com").evaluate(
            &invocation("port-scanner", json!({"target": "a.example.com"})),
            &spec("port-scanner", ImpactClass::Passive),
        );
        assert_eq!(d.reason, REASON_TOOL_DENIED);
    }

    #[test]
    fn test_missing_subject_uses_run_target() {
        let d = policy().evaluate(
            &invocation("tech-detector", json!({})),
            &spec("tech-detector", ImpactClass::Passive),
        );
        assert!(d.is_allowed());
    }
}
