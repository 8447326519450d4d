//! Arena of in-flight containers keyed by invocation id.

use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Running,
    Terminating,
    Reaped,
}

struct Slot {
    tool: String,
    container_id: Option<String>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    registered: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct InflightInfo {
    pub invocation_id: String,
    pub tool: String,
    pub container_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub age_ms: u64,
}

#[derive(Default)]
pub struct InflightRegistry {
    slots: DashMap<String, Slot>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token that fires on run cancellation or on [`terminate`](Self::terminate).
    pub fn register(&self, invocation_id: &str, tool: &str, parent: &CancellationToken) -> CancellationToken {
        let cancel = parent.child_token();
        self.slots.insert(invocation_id.to_string(), Slot {
            tool: tool.to_string(),
            container_id: None,
            lifecycle: Lifecycle::Created,
            cancel: cancel.clone(),
            registered: Instant::now(),
        });
        cancel
    }

    pub fn attach(&self, invocation_id: &str, container_id: &str) {
        if let Some(mut slot) = self.slots.get_mut(invocation_id) {
            slot.container_id = Some(container_id.to_string());
            slot.lifecycle = Lifecycle::Running;
        }
    }

    pub fn mark_terminating(&self, invocation_id: &str) {
        if let Some(mut slot) = self.slots.get_mut(invocation_id) {
            slot.lifecycle = Lifecycle::Terminating;
        }
    }

    pub fn reap(&self, invocation_id: &str) {
        if self.slots.remove(invocation_id).is_some() {
            debug!(invocation = %invocation_id, "Reaped container slot");
        }
    }

    /// Interrupt one invocation. Returns false if it is not in flight.
    pub fn terminate(&self, invocation_id: &str) -> bool {
        match self.slots.get_mut(invocation_id) {
            Some(mut slot) => {
                slot.lifecycle = Lifecycle::Terminating;
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn lifecycle(&self, invocation_id: &str) -> Lifecycle {
        self.slots.get(invocation_id).map_or(Lifecycle::Reaped, |s| s.lifecycle)
    }

    pub fn snapshot(&self) -> Vec<InflightInfo> {
        let mut infos: Vec<InflightInfo> = self.slots.iter()
            .map(|entry| InflightInfo {
                invocation_id: entry.key().clone(),
                tool: entry.tool.clone(),
                container_id: entry.container_id.clone(),
                lifecycle: entry.lifecycle,
                age_ms: entry.registered.elapsed().as_millis() as u64,
            })
            .collect();
        infos.sort_by(|a, b| a.invocation_id.cmp(&b.invocation_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
