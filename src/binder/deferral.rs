use crate::models::Recommendation;
use super::reference::Reference;

/// A recommendation waiting for its referenced tool to produce findings.
#[derive(Debug, Clone)]
pub struct DeferredEntry {
    pub recommendation: Recommendation,
    pub missing: Vec<Reference>,
    /// Rebind attempts so far.
    pub ticks: u32,
}

pub enum Requeue {
    Waiting,
    Unresolvable(DeferredEntry),
}

/// Phase-scoped holding area for deferred recommendations.
#[derive(Debug)]
pub struct DeferredQueue {
    entries: Vec<DeferredEntry>,
    max_ticks: u32,
}

impl DeferredQueue {
    pub fn new(max_ticks: u32) -> Self {
        Self { entries: Vec::new(), max_ticks: max_ticks.max(1) }
    }

    pub fn defer(&mut self, recommendation: Recommendation, missing: Vec<Reference>) {
        self.entries.push(DeferredEntry { recommendation, missing, ticks: 0 });
    }

    /// Take every entry for a rebind attempt after new findings landed.
    pub fn take(&mut self) -> Vec<DeferredEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Put back an entry whose rebind attempt still found missing references.
    pub fn requeue(&mut self, mut entry: DeferredEntry, missing: Vec<Reference>) -> Requeue {
        entry.ticks += 1;
        entry.missing = missing;
        if entry.ticks >= self.max_ticks {
            Requeue::Unresolvable(entry)
        } else {
            self.entries.push(entry);
            Requeue::Waiting
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
