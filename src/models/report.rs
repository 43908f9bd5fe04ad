//! Per-group run state and the run-level report.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::item::{Item, ItemId, ItemOutcome};

/// Mutable bookkeeping for one group, owned by the coordinating task.
///
/// `remaining` keeps fetch order so batch membership stays a function of the
/// input order. Items move from `remaining` to `completed` only together with
/// an outcome in `results`.
#[derive(Debug, Default)]
pub struct RunState {
    remaining: Vec<Item>,
    completed: HashSet<ItemId>,
    results: Vec<ItemOutcome>,
}

impl RunState {
    /// Create state for a working set. Repeated ids keep their first occurrence.
    pub fn new(items: Vec<Item>) -> Self {
        let mut seen = HashSet::with_capacity(items.len());
        let remaining = items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        Self {
            remaining,
            completed: HashSet::new(),
            results: Vec::new(),
        }
    }

    pub fn remaining(&self) -> &[Item] {
        &self.remaining
    }

    pub fn completed(&self) -> &HashSet<ItemId> {
        &self.completed
    }

    pub fn results(&self) -> &[ItemOutcome] {
        &self.results
    }

    pub fn is_done(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Fold one pass into the state.
    ///
    /// Only outcomes whose item is still remaining are recorded, so an id can
    /// never land in `results` twice.
    pub fn apply(&mut self, completed_ids: &HashSet<ItemId>, outcomes: Vec<ItemOutcome>) {
        let remaining_ids: HashSet<&ItemId> = self.remaining.iter().map(|i| &i.id).collect();
        for outcome in outcomes {
            if completed_ids.contains(&outcome.item_id)
                && remaining_ids.contains(&outcome.item_id)
                && !self.completed.contains(&outcome.item_id)
            {
                self.completed.insert(outcome.item_id.clone());
                self.results.push(outcome);
            }
        }
        let completed = &self.completed;
        self.remaining.retain(|item| !completed.contains(&item.id));
    }

    /// Whether the remaining and completed sides are disjoint and every
    /// completed id has exactly one outcome.
    pub fn is_consistent(&self) -> bool {
        let disjoint = self
            .remaining
            .iter()
            .all(|item| !self.completed.contains(&item.id));
        let mut seen = HashSet::with_capacity(self.results.len());
        let unique = self.results.iter().all(|o| seen.insert(&o.item_id));
        disjoint && unique && seen.len() == self.completed.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|o| !o.success).count()
    }

    pub fn into_results(self) -> Vec<ItemOutcome> {
        self.results
    }
}

/// How a group's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Completed,
    Cancelled,
    FetchFailed,
    RecoveryExhausted,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::FetchFailed => "fetch_failed",
            Self::RecoveryExhausted => "recovery_exhausted",
        }
    }
}

/// Outcome of one group within a run.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group_name: String,
    pub group_id: String,
    pub status: GroupStatus,
    /// Items returned by the item source.
    pub fetched: usize,
    /// Items dropped by the exclusion filter, the per-group limit or de-duplication.
    pub excluded: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items still remaining when processing stopped.
    pub unprocessed: usize,
    /// Dispatcher passes run.
    pub passes: u32,
    /// Session recoveries performed.
    pub recoveries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub outcomes: Vec<ItemOutcome>,
}

impl GroupSummary {
    pub fn fetch_failed(group_name: &str, group_id: &str, error: String) -> Self {
        Self {
            group_name: group_name.to_string(),
            group_id: group_id.to_string(),
            status: GroupStatus::FetchFailed,
            fetched: 0,
            excluded: 0,
            succeeded: 0,
            failed: 0,
            unprocessed: 0,
            passes: 0,
            recoveries: 0,
            error: Some(error),
            outcomes: Vec::new(),
        }
    }
}

/// Aggregate result handed back to the caller of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups_processed: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub total_unprocessed: usize,
    pub cancelled: bool,
    pub per_group: Vec<GroupSummary>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            groups_processed: 0,
            total_succeeded: 0,
            total_failed: 0,
            total_skipped: 0,
            total_unprocessed: 0,
            cancelled: false,
            per_group: Vec::new(),
        }
    }

    pub fn push(&mut self, summary: GroupSummary) {
        self.groups_processed += 1;
        self.total_succeeded += summary.succeeded;
        self.total_failed += summary.failed;
        self.total_skipped += summary.excluded;
        self.total_unprocessed += summary.unprocessed;
        self.per_group.push(summary);
    }

    pub fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn group(&self, name: &str) -> Option<&GroupSummary> {
        self.per_group.iter().find(|g| g.group_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter().map(|id| Item::new(*id, *id)).collect()
    }

    #[test]
    fn test_new_state_dedupes_by_id() {
        let state = RunState::new(items(&["a", "b", "a", "c"]));
        let ids: Vec<&str> = state.remaining().iter().map(|i| i.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_apply_moves_items_and_stays_disjoint() {
        let mut state = RunState::new(items(&["a", "b", "c"]));
        let completed: HashSet<ItemId> = ["a", "b"].iter().map(|s| ItemId::from(*s)).collect();
        state.apply(
            &completed,
            vec![
                ItemOutcome::succeeded("a".into(), "ok"),
                ItemOutcome::failed("b".into(), "rejected"),
            ],
        );

        assert_eq!(state.remaining().len(), 1);
        assert_eq!(state.succeeded(), 1);
        assert_eq!(state.failed(), 1);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_apply_ignores_repeat_outcomes() {
        let mut state = RunState::new(items(&["a", "b"]));
        let completed: HashSet<ItemId> = [ItemId::from("a")].into_iter().collect();
        state.apply(&completed, vec![ItemOutcome::succeeded("a".into(), "ok")]);
        state.apply(&completed, vec![ItemOutcome::failed("a".into(), "again")]);

        assert_eq!(state.results().len(), 1);
        assert!(state.results()[0].success);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_report_push_accumulates_totals() {
        let mut report = RunReport::new(Uuid::new_v4());
        let mut summary = GroupSummary::fetch_failed("g", "1", "boom".into());
        summary.status = GroupStatus::Completed;
        summary.succeeded = 4;
        summary.failed = 1;
        summary.excluded = 2;
        report.push(summary);
        report.finish(false);

        assert_eq!(report.groups_processed, 1);
        assert_eq!(report.total_succeeded, 4);
        assert_eq!(report.total_failed, 1);
        assert_eq!(report.total_skipped, 2);
        assert!(report.finished_at.is_some());
    }
}
