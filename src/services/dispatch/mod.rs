//! One pass of batches through a bounded worker pool.
//!
//! The coordinating task owns all bookkeeping. Workers only execute a batch
//! and hand it back together with the backend's answer; merging happens as
//! each worker is joined.

mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::cancel::CancellationToken;
use super::classifier::{classify, ErrorKind};
use super::events::{EngineEvent, ProgressReporter};
use super::planner::partition;
use crate::backend::{OperationClient, OperationError};
use crate::models::{Batch, BatchResult, Item, ItemOutcome};

pub use types::{PassOutcome, ProgressBase};

/// Status recorded for items a successful batch response left out.
pub const MISSING_FROM_RESPONSE: &str = "missing from response";

/// Runs passes of batches against an [`OperationClient`].
pub struct Dispatcher {
    client: Arc<dyn OperationClient>,
    batch_size: usize,
    parallel_count: usize,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn OperationClient>, batch_size: usize, parallel_count: usize) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            parallel_count: parallel_count.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches a pass over `items` would run.
    pub fn batch_count(&self, items: usize) -> usize {
        items.div_ceil(self.batch_size)
    }

    /// Run one pass over `remaining`.
    ///
    /// At most `parallel_count` batches are in flight. The first transient
    /// failure, a dead worker, or cancellation stops new batches from
    /// starting; batches already started are still awaited and merged.
    pub async fn run(
        &self,
        remaining: &[Item],
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
        progress: ProgressBase,
    ) -> PassOutcome {
        let mut pending = partition(remaining, self.batch_size).into_iter();
        let mut workers: JoinSet<(Batch, Result<BatchResult, OperationError>)> = JoinSet::new();
        let mut pass = PassOutcome::default();
        let mut stop_starting = false;

        loop {
            while !stop_starting && workers.len() < self.parallel_count {
                if cancel.is_cancelled() {
                    debug!("Cancellation observed, no further batches start");
                    pass.cancelled = true;
                    stop_starting = true;
                    break;
                }
                let Some(batch) = pending.next() else {
                    break;
                };
                pass.batches_executed += 1;
                let client = self.client.clone();
                workers.spawn(async move {
                    let result = client.execute(&batch).await;
                    (batch, result)
                });
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };

            match joined {
                Ok((batch, Ok(result))) => {
                    merge_response(&mut pass, &batch, result);
                    reporter.on_item_progress(progress.done + pass.completed_ids.len(), progress.total);
                }
                Ok((batch, Err(e))) => match classify(&e.message) {
                    ErrorKind::Transient => {
                        warn!(
                            "Batch {} ({} items) hit a connection error: {}",
                            batch.seq,
                            batch.len(),
                            e
                        );
                        reporter.report(EngineEvent::BatchFailed {
                            seq: batch.seq,
                            kind: ErrorKind::Transient,
                            error: e.message.clone(),
                        });
                        pass.had_transient_error = true;
                        stop_starting = true;
                    }
                    ErrorKind::Permanent => {
                        warn!("Batch {} failed: {}", batch.seq, e);
                        reporter.report(EngineEvent::BatchFailed {
                            seq: batch.seq,
                            kind: ErrorKind::Permanent,
                            error: e.message.clone(),
                        });
                        for item in &batch.items {
                            pass.record(ItemOutcome::failed(item.id.clone(), e.message.clone()));
                        }
                        reporter.on_item_progress(progress.done + pass.completed_ids.len(), progress.total);
                    }
                },
                Err(e) => {
                    error!("Batch worker died: {}", e);
                    pass.had_transient_error = true;
                    stop_starting = true;
                }
            }
        }

        pass.batches_skipped = pending.len();
        debug!(
            "Pass finished: {} executed, {} skipped, {} completed",
            pass.batches_executed,
            pass.batches_skipped,
            pass.completed_ids.len()
        );
        pass
    }
}

/// Fold a transport-level success into the pass.
///
/// Every item of the batch receives exactly one outcome, in batch order.
fn merge_response(pass: &mut PassOutcome, batch: &Batch, result: BatchResult) {
    let mut by_id = HashMap::with_capacity(result.per_item.len());
    for entry in result.per_item {
        if !batch.ids().any(|id| *id == entry.id) {
            warn!("Batch {} response names unknown item {}", batch.seq, entry.id);
            continue;
        }
        by_id.entry(entry.id.clone()).or_insert(entry);
    }

    for item in &batch.items {
        let outcome = match by_id.remove(&item.id) {
            Some(entry) => ItemOutcome {
                item_id: entry.id,
                success: entry.success,
                status: entry.status,
            },
            None => ItemOutcome::failed(item.id.clone(), MISSING_FROM_RESPONSE),
        };
        pass.record(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::backend::ScriptedBackend;
    use crate::models::{ItemId, ItemResult};
    use crate::services::events::NoopReporter;

    /// Panics on any batch containing `trigger`, succeeds otherwise.
    struct PanickingClient {
        trigger: ItemId,
    }

    #[async_trait]
    impl OperationClient for PanickingClient {
        async fn execute(&self, batch: &Batch) -> Result<BatchResult, OperationError> {
            if batch.ids().any(|id| *id == self.trigger) {
                panic!("worker blew up on batch {}", batch.seq);
            }
            Ok(BatchResult {
                per_item: batch
                    .items
                    .iter()
                    .map(|item| ItemResult {
                        id: item.id.clone(),
                        success: true,
                        status: "ok".to_string(),
                    })
                    .collect(),
            })
        }
    }

    fn items(n: usize) -> Vec<Item> {
        (1..=n).map(|i| Item::new(i.to_string(), format!("item {}", i))).collect()
    }

    #[tokio::test]
    async fn test_happy_path_runs_ceil_n_over_b_batches() {
        let backend = ScriptedBackend::new();
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 50, 10);
        let input = items(237);

        let pass = dispatcher
            .run(&input, &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert_eq!(backend.call_count(), 5);
        assert_eq!(pass.batches_executed, 5);
        assert_eq!(pass.completed_ids.len(), 237);
        assert!(!pass.had_transient_error);
        let mut sizes: Vec<usize> = backend.calls().iter().map(|c| c.ids.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![37, 50, 50, 50, 50]);
    }

    #[tokio::test]
    async fn test_transient_batch_contributes_nothing() {
        let backend = ScriptedBackend::new();
        backend.fail_batch_containing("51", "Connection reset by peer", 1);
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 50, 10);

        let pass = dispatcher
            .run(&items(100), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert!(pass.had_transient_error);
        assert_eq!(pass.completed_ids.len(), 50);
        assert!(pass.completed_ids.contains(&ItemId::from("1")));
        assert!(!pass.completed_ids.contains(&ItemId::from("51")));
    }

    #[tokio::test]
    async fn test_transient_failure_stops_new_batches() {
        let backend = ScriptedBackend::new();
        backend.fail_batch_containing("1", "Read timed out", 1);
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 10, 1);

        let pass = dispatcher
            .run(&items(50), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert!(pass.had_transient_error);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(pass.batches_skipped, 4);
        assert!(pass.completed_ids.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_fails_whole_batch() {
        let backend = ScriptedBackend::new();
        backend.fail_batch_containing("3", "Invalid price: -1", 1);
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 2, 4);

        let pass = dispatcher
            .run(&items(6), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert!(!pass.had_transient_error);
        assert_eq!(pass.completed_ids.len(), 6);
        assert_eq!(pass.failed(), 2);
        let failed: Vec<&str> = pass
            .outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.status.as_str())
            .collect();
        assert_eq!(failed, vec!["Invalid price: -1", "Invalid price: -1"]);
    }

    #[tokio::test]
    async fn test_missing_response_entries_fail() {
        let backend = ScriptedBackend::new();
        backend.omit_item("2");
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 5, 1);

        let pass = dispatcher
            .run(&items(3), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        let missing = pass
            .outcomes
            .iter()
            .find(|o| o.item_id == ItemId::from("2"))
            .unwrap();
        assert!(!missing.success);
        assert_eq!(missing.status, MISSING_FROM_RESPONSE);
        assert_eq!(pass.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let backend = ScriptedBackend::new();
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 5, 2);
        let cancel = CancellationToken::new();
        cancel.set_cancelled();

        let pass = dispatcher
            .run(&items(20), &cancel, &NoopReporter, ProgressBase::default())
            .await;

        assert!(pass.cancelled);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(pass.batches_skipped, 4);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let backend = ScriptedBackend::new().with_latency(std::time::Duration::from_millis(20));
        let dispatcher = Dispatcher::new(Arc::new(backend.clone()), 1, 3);

        dispatcher
            .run(&items(12), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert_eq!(backend.call_count(), 12);
        assert!(backend.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn test_panicking_worker_counts_as_transient() {
        let client = PanickingClient {
            trigger: ItemId::from("3"),
        };
        let dispatcher = Dispatcher::new(Arc::new(client), 2, 4);

        let pass = dispatcher
            .run(&items(6), &CancellationToken::new(), &NoopReporter, ProgressBase::default())
            .await;

        assert!(pass.had_transient_error);
        assert_eq!(pass.batches_executed, 3);
        assert!(!pass.completed_ids.contains(&ItemId::from("3")));
        assert!(!pass.completed_ids.contains(&ItemId::from("4")));
        let mut completed: Vec<&str> = pass.completed_ids.iter().map(|id| id.0.as_str()).collect();
        completed.sort_unstable();
        assert_eq!(completed, vec!["1", "2", "5", "6"]);
        assert_eq!(pass.failed(), 0);
    }
}
