//! Programmable in-memory backend.
//!
//! Serves fixed item lists per group and answers batch calls from a small rule
//! set instead of a network. Every call is recorded so tests can assert on
//! batch membership, concurrency and session resets.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    FetchError, ItemPage, ItemSource, OperationClient, OperationError, Session, SessionError,
};
use crate::models::{Batch, BatchResult, GroupDirectory, GroupTask, Item, ItemId, ItemResult};
use crate::services::CancellationToken;

/// Record of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    /// 1-based order in which the call started.
    pub call: usize,
    pub batch_seq: usize,
    pub ids: Vec<ItemId>,
}

/// A whole-batch failure raised for any batch containing `trigger`.
#[derive(Debug, Clone)]
struct BatchFailure {
    trigger: ItemId,
    message: String,
    /// How many more times the rule fires; `None` fires forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Script {
    groups: Vec<(GroupTask, Vec<Item>)>,
    fetch_failures: HashMap<String, String>,
    batch_failures: Vec<BatchFailure>,
    rejected: HashMap<ItemId, String>,
    omitted: HashSet<ItemId>,
    reset_failures: usize,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// In-memory implementation of [`ItemSource`], [`OperationClient`] and
/// [`Session`].
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<ScriptedCall>>>,
    page_size: usize,
    latency: Duration,
    pages_fetched: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            page_size: 100,
            latency: Duration::ZERO,
            pages_fetched: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Delay applied to every `execute` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Register a group and the items its fetch returns.
    pub fn add_group(&self, name: &str, id: &str, items: Vec<Item>) -> GroupTask {
        let task = GroupTask::new(name, id);
        lock(&self.script).groups.push((task.clone(), items));
        task
    }

    /// Register a group of `count` items with ids `{prefix}-{n}`.
    pub fn add_numbered_group(&self, name: &str, id: &str, prefix: &str, count: usize) -> GroupTask {
        let items = (1..=count)
            .map(|n| Item::new(format!("{}-{}", prefix, n), format!("{} item {}", prefix, n)))
            .collect();
        self.add_group(name, id, items)
    }

    /// Directory over every registered group.
    pub fn directory(&self) -> GroupDirectory {
        GroupDirectory::new(
            lock(&self.script)
                .groups
                .iter()
                .map(|(task, _)| (task.group_name.clone(), task.group_id.clone())),
        )
    }

    /// Make item fetches for `group_name` fail with `message`.
    pub fn fail_fetch(&self, group_name: &str, message: &str) {
        lock(&self.script)
            .fetch_failures
            .insert(group_name.to_string(), message.to_string());
    }

    /// Fail the next `times` batches containing `trigger` with `message`.
    pub fn fail_batch_containing(&self, trigger: &str, message: &str, times: usize) {
        lock(&self.script).batch_failures.push(BatchFailure {
            trigger: ItemId::from(trigger),
            message: message.to_string(),
            remaining: Some(times),
        });
    }

    /// Fail every batch containing `trigger` with `message`.
    pub fn always_fail_batch_containing(&self, trigger: &str, message: &str) {
        lock(&self.script).batch_failures.push(BatchFailure {
            trigger: ItemId::from(trigger),
            message: message.to_string(),
            remaining: None,
        });
    }

    /// Report `id` as individually rejected inside an otherwise successful batch.
    pub fn reject_item(&self, id: &str, status: &str) {
        lock(&self.script)
            .rejected
            .insert(ItemId::from(id), status.to_string());
    }

    /// Leave `id` out of the per-item response.
    pub fn omit_item(&self, id: &str) {
        lock(&self.script).omitted.insert(ItemId::from(id));
    }

    /// Make the next `times` session resets fail.
    pub fn fail_resets(&self, times: usize) {
        lock(&self.script).reset_failures = times;
    }

    /// Cancel `token` once `calls` executes have started.
    pub fn cancel_after_calls(&self, calls: usize, token: CancellationToken) {
        lock(&self.script).cancel_after = Some((calls, token));
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Ids of every item sent in any call, in call order.
    pub fn executed_ids(&self) -> Vec<ItemId> {
        lock(&self.calls)
            .iter()
            .flat_map(|c| c.ids.iter().cloned())
            .collect()
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    /// Highest number of `execute` calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, batch: &Batch) -> Option<String> {
        let mut script = lock(&self.script);
        for rule in script.batch_failures.iter_mut() {
            if !batch.ids().any(|id| *id == rule.trigger) {
                continue;
            }
            match rule.remaining {
                None => return Some(rule.message.clone()),
                Some(0) => continue,
                Some(ref mut n) => {
                    *n -= 1;
                    return Some(rule.message.clone());
                }
            }
        }
        None
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemSource for ScriptedBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(
        &self,
        group: &GroupTask,
        offset: usize,
        limit: usize,
    ) -> Result<ItemPage, FetchError> {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.script);
        if let Some(message) = script.fetch_failures.get(&group.group_name) {
            return Err(FetchError::Backend {
                group: group.group_name.clone(),
                message: message.clone(),
            });
        }
        let items: Vec<Item> = script
            .groups
            .iter()
            .find(|(task, _)| task.group_name == group.group_name)
            .map(|(_, items)| items.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(items.into())
    }
}

#[async_trait]
impl OperationClient for ScriptedBackend {
    async fn execute(&self, batch: &Batch) -> Result<BatchResult, OperationError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        let call = {
            let mut calls = lock(&self.calls);
            let next = calls.len() + 1;
            calls.push(ScriptedCall {
                call: next,
                batch_seq: batch.seq,
                ids: batch.ids().cloned().collect(),
            });
            calls.len()
        };

        let cancel_after = lock(&self.script).cancel_after.clone();
        if let Some((after, token)) = cancel_after {
            if call >= after {
                token.set_cancelled();
            }
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(message) = self.scripted_failure(batch) {
            return Err(OperationError::new(message));
        }

        let script = lock(&self.script);
        let per_item = batch
            .items
            .iter()
            .filter(|item| !script.omitted.contains(&item.id))
            .map(|item| match script.rejected.get(&item.id) {
                Some(status) => ItemResult {
                    id: item.id.clone(),
                    success: false,
                    status: status.clone(),
                },
                None => ItemResult {
                    id: item.id.clone(),
                    success: true,
                    status: "ok".to_string(),
                },
            })
            .collect();
        Ok(BatchResult { per_item })
    }
}

#[async_trait]
impl Session for ScriptedBackend {
    async fn reset(&self) -> Result<(), SessionError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        if script.reset_failures > 0 {
            script.reset_failures -= 1;
            return Err(SessionError("scripted reset failure".to_string()));
        }
        Ok(())
    }
}
