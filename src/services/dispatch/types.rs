//! Dispatcher pass types.

use std::collections::HashSet;

use crate::models::{ItemId, ItemOutcome};

/// Result of one dispatcher pass over the remaining items.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Items that received a final outcome in this pass.
    pub completed_ids: HashSet<ItemId>,
    /// One outcome per id in `completed_ids`.
    pub outcomes: Vec<ItemOutcome>,
    /// A batch failed transiently (or its worker died); its items stay remaining.
    pub had_transient_error: bool,
    /// Batches handed to the operation client.
    pub batches_executed: usize,
    /// Batches never started because the pass stopped early.
    pub batches_skipped: usize,
    /// The pass stopped starting batches because of cancellation.
    pub cancelled: bool,
}

impl PassOutcome {
    pub(super) fn record(&mut self, outcome: ItemOutcome) {
        if self.completed_ids.insert(outcome.item_id.clone()) {
            self.outcomes.push(outcome);
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }
}

/// Where the pass sits within its group, for cumulative item progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressBase {
    /// Items of the group completed before this pass.
    pub done: usize,
    /// Size of the group's working set.
    pub total: usize,
}
