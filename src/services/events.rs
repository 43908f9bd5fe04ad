//! Progress events emitted by the engine.
//!
//! Only the coordinating task emits, so events arrive in a consistent order.
//! Delivery is fire-and-forget: a slow or missing consumer never stalls a run.

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::classifier::ErrorKind;
use crate::models::{GroupStatus, GroupSummary};

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A run over `groups` groups began
    RunStarted { run_id: Uuid, groups: usize },
    /// Group `index` of `total` is about to be fetched (1-based)
    GroupStarted {
        index: usize,
        total: usize,
        group_name: String,
    },
    /// Items were fetched and filtered
    GroupFetched {
        group_name: String,
        fetched: usize,
        kept: usize,
        skipped: usize,
    },
    /// A dispatcher pass is starting over the remaining items
    PassStarted {
        group_name: String,
        pass: u32,
        remaining: usize,
        batches: usize,
    },
    /// Items of the current group with a recorded outcome
    ItemProgress { current: usize, total: usize },
    /// A whole batch failed
    BatchFailed {
        seq: usize,
        kind: ErrorKind,
        error: String,
    },
    /// The session was reset and the engine is cooling down
    SessionRecovering {
        group_name: String,
        recovery: u32,
        cooldown: Duration,
    },
    /// A group reached its final status
    GroupFinished {
        group_name: String,
        status: GroupStatus,
        succeeded: usize,
        failed: usize,
    },
    /// Group `current` of `total` is done
    GroupProgress {
        current: usize,
        total: usize,
        group_name: String,
    },
    /// The run ended
    RunFinished { cancelled: bool },
}

/// Sink for engine events.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: EngineEvent);

    fn on_item_progress(&self, current: usize, total: usize) {
        self.report(EngineEvent::ItemProgress { current, total });
    }

    fn on_group_progress(&self, current: usize, total: usize, group_name: &str) {
        self.report(EngineEvent::GroupProgress {
            current,
            total,
            group_name: group_name.to_string(),
        });
    }

    fn on_group_finished(&self, summary: &GroupSummary) {
        self.report(EngineEvent::GroupFinished {
            group_name: summary.group_name.clone(),
            status: summary.status,
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: EngineEvent) {}
}

/// Reporter forwarding into a bounded channel, dropping events when full.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Create a reporter and the receiver its events arrive on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: EngineEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!("Progress event dropped: {}", e);
        }
    }
}
