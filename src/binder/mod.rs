//! Parameter binder: turns recommendations into concrete invocations.

pub mod deferral;
pub mod project;
pub mod reference;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::WardenError;
use crate::models::{value_as_text, Finding, Invocation, Recommendation};
use crate::registry::ToolRegistry;
pub use deferral::{DeferredEntry, DeferredQueue, Requeue};
pub use reference::{ArgValue, FanOut, Reference, Segment};

#[derive(Debug)]
pub enum BindOutcome {
    Bound {
        invocations: Vec<Invocation>,
        /// Combinations dropped by the fan-out cap.
        truncated: usize,
    },
    /// At least one reference has no findings yet.
    Deferred { missing: Vec<Reference> },
    Rejected(WardenError),
}

pub struct ParameterBinder {
    registry: Arc<ToolRegistry>,
    max_fanout: usize,
}

impl ParameterBinder {
    pub fn new(registry: Arc<ToolRegistry>, max_fanout: usize) -> Self {
        Self { registry, max_fanout: max_fanout.max(1) }
    }

    /// Bind against a findings snapshot. Pure: the same snapshot always yields
    /// the same invocations in the same order.
    pub fn bind(&self, rec: &Recommendation, findings: &[Finding]) -> BindOutcome {
        let spec = match self.registry.lookup(&rec.tool) {
            Ok(spec) => spec,
            Err(e) => return BindOutcome::Rejected(e),
        };

        if let Some(name) = rec.arguments.keys().find(|name| !spec.accepts(name)) {
            return BindOutcome::Rejected(WardenError::InvalidArguments(format!(
                "Tool '{}' does not accept argument '{}'", spec.name, name
            )));
        }

        let mut candidates: Vec<(&str, Vec<Value>)> = Vec::with_capacity(rec.arguments.len());
        let mut missing = Vec::new();
        for (name, arg) in &rec.arguments {
            candidates.push((name.as_str(), resolve_argument(arg, findings, &mut missing)));
        }
        if !missing.is_empty() {
            return BindOutcome::Deferred { missing };
        }

        let total = candidates.iter()
            .try_fold(1usize, |acc, (_, values)| acc.checked_mul(values.len()))
            .unwrap_or(usize::MAX);
        let emitted = total.min(self.max_fanout);

        let mut invocations = Vec::with_capacity(emitted);
        let mut odometer = vec![0usize; candidates.len()];
        for index in 0..emitted {
            let mut arguments: BTreeMap<String, Value> = candidates.iter()
                .zip(&odometer)
                .map(|((name, values), &i)| (name.to_string(), values[i].clone()))
                .collect();
            for (name, value) in &spec.defaults {
                arguments.entry(name.clone()).or_insert_with(|| value.clone());
            }

            if let Err(e) = spec.render_command(&arguments) {
                return BindOutcome::Rejected(e);
            }

            invocations.push(Invocation {
                id: format!("{}.{}", rec.id, index),
                recommendation_id: rec.id.clone(),
                tool: spec.name.clone(),
                arguments,
                limits: spec.limits,
                timeout_secs: spec.timeout_secs,
                priority: rec.priority,
            });

            advance(&mut odometer, &candidates);
        }

        BindOutcome::Bound { invocations, truncated: total - emitted }
    }
}

/// All concrete values one argument can take. Missing references are
/// collected into `missing`.
fn resolve_argument(arg: &ArgValue, findings: &[Finding], missing: &mut Vec<Reference>) -> Vec<Value> {
    let segments = match arg {
        ArgValue::Literal(v) => return vec![v.clone()],
        ArgValue::Template(segments) => segments,
    };

    let alternatives: Vec<Vec<Value>> = segments.iter()
        .map(|segment| match segment {
            Segment::Text(t) => vec![Value::String(t.clone())],
            Segment::Ref(r) => {
                let values = project::project(findings, r);
                if values.is_empty() && !missing.contains(r) {
                    missing.push(r.clone());
                }
                values
            }
        })
        .collect();

    // a bare reference keeps the projected JSON type
    if let [only] = alternatives.as_slice() {
        return only.clone();
    }

    alternatives.iter().fold(vec![String::new()], |prefixes, options| {
        prefixes.iter()
            .flat_map(|p| options.iter().map(move |o| format!("{}{}", p, value_as_text(o).unwrap_or_default())))
            .collect()
    })
    .into_iter()
    .map(Value::String)
    .collect()
}

fn advance(odometer: &mut [usize], candidates: &[(&str, Vec<Value>)]) {
    for pos in (0..odometer.len()).rev() {
        odometer[pos] += 1;
        if odometer[pos] < candidates[pos].1.len() {
            return;
        }
        odometer[pos] = 0;
    }
}
