//! Runs groups one after another through the dispatch/recovery loop.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancel::CancellationToken;
use super::dispatch::{Dispatcher, ProgressBase};
use super::events::{EngineEvent, NoopReporter, ProgressReporter};
use super::filter::{ExclusionFilter, Filtered};
use super::recovery::SessionRecovery;
use crate::backend::{FetchError, ItemSource, OperationClient, Session};
use crate::config::{ConfigError, EngineConfig};
use crate::models::{
    FetchParams, GroupDirectory, GroupSelection, GroupStatus, GroupSummary, GroupTask, RunReport,
    RunState,
};

/// Errors that stop a run before any group is processed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No groups to process")]
    EmptyGroupList,

    #[error("Unknown group(s): {}", .0.join(", "))]
    UnknownGroups(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// What a group would look like if it were run now.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub group: GroupTask,
    pub fetched: usize,
    #[serde(flatten)]
    pub filtered: Filtered,
}

/// Drives a whole run across groups.
pub struct GroupOrchestrator {
    config: EngineConfig,
    source: Arc<dyn ItemSource>,
    dispatcher: Dispatcher,
    recovery: SessionRecovery,
    directory: Arc<GroupDirectory>,
    fetch_params: FetchParams,
    filter: ExclusionFilter,
    limit: Option<usize>,
    cancel: CancellationToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl GroupOrchestrator {
    /// Create an orchestrator over separate source, client and session handles.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ItemSource>,
        client: Arc<dyn OperationClient>,
        session: Arc<dyn Session>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(client, config.batch_size, config.parallel_count),
            recovery: SessionRecovery::new(session, config.cooldown, config.max_recoveries),
            config,
            source,
            directory: Arc::new(GroupDirectory::default()),
            fetch_params: FetchParams::new(),
            filter: ExclusionFilter::new(),
            limit: None,
            cancel: CancellationToken::new(),
            reporter: Arc::new(NoopReporter),
        })
    }

    /// Create an orchestrator over one backend implementing every contract.
    pub fn for_backend<B>(config: EngineConfig, backend: Arc<B>) -> Result<Self, EngineError>
    where
        B: ItemSource + OperationClient + Session + 'static,
    {
        Self::new(config, backend.clone(), backend.clone(), backend)
    }

    pub fn with_directory(mut self, directory: Arc<GroupDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Filter parameters attached to groups resolved from the directory.
    pub fn with_fetch_params(mut self, params: FetchParams) -> Self {
        self.fetch_params = params;
        self
    }

    pub fn with_filter(mut self, filter: ExclusionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Cap on items processed per group, applied after exclusion.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Handle for cancelling this orchestrator's runs.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve `selection` through the group directory and run it.
    pub async fn run_selection(&self, selection: &GroupSelection) -> Result<RunReport, EngineError> {
        let groups = self
            .directory
            .resolve(selection, &self.fetch_params)
            .map_err(EngineError::UnknownGroups)?;
        self.run(groups).await
    }

    /// Process `groups` in order and return the aggregate report.
    ///
    /// Per-item and per-batch failures end up in the report; only an empty
    /// group list is an error.
    pub async fn run(&self, groups: Vec<GroupTask>) -> Result<RunReport, EngineError> {
        if groups.is_empty() {
            return Err(EngineError::EmptyGroupList);
        }
        Ok(self.execute(Uuid::new_v4(), groups).await)
    }

    #[tracing::instrument(name = "run", skip_all, fields(run_id = %run_id))]
    async fn execute(&self, run_id: Uuid, groups: Vec<GroupTask>) -> RunReport {
        let total = groups.len();
        let mut report = RunReport::new(run_id);
        info!("Starting run over {} group(s)", total);
        self.reporter.report(EngineEvent::RunStarted {
            run_id,
            groups: total,
        });

        let mut cancelled = false;
        for (index, group) in groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Run cancelled before group {}", group.group_name);
                cancelled = true;
                break;
            }

            self.reporter.report(EngineEvent::GroupStarted {
                index: index + 1,
                total,
                group_name: group.group_name.clone(),
            });
            info!("[{}/{}] {}", index + 1, total, group.group_name);

            let summary = self.process_group(group).await;
            if summary.status == GroupStatus::Cancelled {
                cancelled = true;
            }
            self.reporter.on_group_finished(&summary);
            self.reporter.on_group_progress(index + 1, total, &summary.group_name);
            report.push(summary);

            let is_last = index + 1 == total;
            if is_last || cancelled {
                break;
            }
            if !self.cancel.sleep(self.config.inter_group_delay).await {
                info!("Run cancelled during inter-group delay");
            }
        }

        report.finish(cancelled);
        info!(
            "Run finished: {} group(s), {} succeeded, {} failed, {} skipped",
            report.groups_processed,
            report.total_succeeded,
            report.total_failed,
            report.total_skipped
        );
        self.reporter.report(EngineEvent::RunFinished {
            cancelled: report.cancelled,
        });
        report
    }

    async fn fetch_filtered(&self, group: &GroupTask) -> Result<(usize, Filtered), FetchError> {
        let cancel = self.cancel.clone();
        let stop_check = move || cancel.is_cancelled();
        let items = self.source.fetch_all(group, &stop_check).await?;
        let fetched = items.len();
        Ok((fetched, self.filter.apply(items, self.limit)))
    }

    async fn process_group(&self, group: &GroupTask) -> GroupSummary {
        let (fetched, filtered) = match self.fetch_filtered(group).await {
            Ok(result) => result,
            Err(e) => {
                error!("{}", e);
                return GroupSummary::fetch_failed(&group.group_name, &group.group_id, e.to_string());
            }
        };

        let kept = filtered.kept.len();
        let mut state = RunState::new(filtered.kept);
        let duplicates = kept - state.remaining().len();
        if duplicates > 0 {
            warn!("{}: dropped {} duplicate item(s)", group.group_name, duplicates);
        }
        let skipped = filtered.excluded.len() + filtered.over_limit + duplicates;
        let total = state.remaining().len();

        info!(
            "{}: {} fetched, {} to process, {} skipped",
            group.group_name, fetched, total, skipped
        );
        self.reporter.report(EngineEvent::GroupFetched {
            group_name: group.group_name.clone(),
            fetched,
            kept: total,
            skipped,
        });

        let mut status = GroupStatus::Completed;
        let mut passes: u32 = 0;
        let mut recoveries: u32 = 0;

        while !state.is_done() {
            if self.cancel.is_cancelled() {
                status = GroupStatus::Cancelled;
                break;
            }

            passes += 1;
            let remaining = state.remaining().len();
            debug!("{}: pass {} over {} item(s)", group.group_name, passes, remaining);
            self.reporter.report(EngineEvent::PassStarted {
                group_name: group.group_name.clone(),
                pass: passes,
                remaining,
                batches: self.dispatcher.batch_count(remaining),
            });

            let progress = ProgressBase {
                done: state.completed().len(),
                total,
            };
            let pass = self
                .dispatcher
                .run(state.remaining(), &self.cancel, self.reporter.as_ref(), progress)
                .await;
            state.apply(&pass.completed_ids, pass.outcomes);
            debug_assert!(state.is_consistent());

            if !pass.had_transient_error || state.is_done() {
                continue;
            }
            if self.cancel.is_cancelled() {
                status = GroupStatus::Cancelled;
                break;
            }
            if !self.recovery.allows(recoveries) {
                warn!(
                    "{}: giving up after {} session recoveries, {} item(s) left",
                    group.group_name,
                    recoveries,
                    state.remaining().len()
                );
                status = GroupStatus::RecoveryExhausted;
                break;
            }

            recoveries += 1;
            warn!(
                "{}: connection trouble, resetting session ({} item(s) left)",
                group.group_name,
                state.remaining().len()
            );
            self.reporter.report(EngineEvent::SessionRecovering {
                group_name: group.group_name.clone(),
                recovery: recoveries,
                cooldown: self.recovery.cooldown(),
            });
            if !self.recovery.recover(&self.cancel).await {
                status = GroupStatus::Cancelled;
                break;
            }
        }

        let summary = GroupSummary {
            group_name: group.group_name.clone(),
            group_id: group.group_id.clone(),
            status,
            fetched,
            excluded: skipped,
            succeeded: state.succeeded(),
            failed: state.failed(),
            unprocessed: state.remaining().len(),
            passes,
            recoveries,
            error: None,
            outcomes: state.into_results(),
        };
        info!(
            "{}: {} ({} succeeded, {} failed, {} unprocessed)",
            summary.group_name,
            summary.status.as_str(),
            summary.succeeded,
            summary.failed,
            summary.unprocessed
        );
        summary
    }

    /// Fetch and filter one group without dispatching anything.
    pub async fn preview(&self, group_name: &str) -> Result<Preview, EngineError> {
        let unknown = || EngineError::UnknownGroups(vec![group_name.to_string()]);
        let group = self
            .directory
            .resolve(
                &GroupSelection::Named(vec![group_name.to_string()]),
                &self.fetch_params,
            )
            .map_err(|_| unknown())?
            .into_iter()
            .next()
            .ok_or_else(unknown)?;

        let (fetched, filtered) = self.fetch_filtered(&group).await?;
        Ok(Preview {
            group,
            fetched,
            filtered,
        })
    }
}
