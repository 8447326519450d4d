use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use crate::binder::reference::ArgValue;

/// Planner-assigned urgency of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Lower values dispatch first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// A proposed, not-yet-bound tool call from the Planner.
///
/// Never mutated after creation: binding produces new invocations and the
/// recommendation itself is kept only for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default = "new_recommendation_id")]
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgValue>,
    #[serde(default)]
    pub priority: Priority,
    /// Opaque audit text.
    #[serde(default)]
    pub rationale: String,
    /// Bound in the next round if every invocation of this recommendation
    /// ends in a tool error or timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<Recommendation>>,
}

pub fn new_recommendation_id() -> String {
    format!("rec-{}", uuid::Uuid::new_v4().simple())
}

impl Recommendation {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            id: new_recommendation_id(),
            tool: tool.into(),
            arguments: BTreeMap::new(),
            priority: Priority::default(),
            rationale: String::new(),
            fallback: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_fallback(mut self, fallback: Recommendation) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// True if no argument carries a reference.
    pub fn is_concrete(&self) -> bool {
        self.arguments.values().all(ArgValue::is_resolved)
    }
}
