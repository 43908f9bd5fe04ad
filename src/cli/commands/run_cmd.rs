//! Run the operation over groups.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;

use crate::cli::helpers::{build_backend, load_directory, load_filter, merge_fetch_params};
use crate::cli::progress::{progress_println, RunProgress};
use crate::config::Settings;
use crate::models::{GroupSelection, GroupStatus, RunReport};
use crate::services::{ChannelReporter, EngineEvent, ErrorKind, GroupOrchestrator};

/// Capacity of the engine event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

pub struct RunArgs {
    pub groups: Vec<String>,
    pub all: bool,
    pub filters: Vec<(String, String)>,
    pub progress: bool,
    pub report: Option<PathBuf>,
}

pub async fn cmd_run(settings: &Settings, args: RunArgs) -> anyhow::Result<()> {
    let selection = match (args.all, args.groups.is_empty()) {
        (true, _) => GroupSelection::All,
        (false, false) => GroupSelection::Named(args.groups),
        (false, true) => anyhow::bail!("Name at least one group or pass --all"),
    };

    let engine = settings.engine_config()?;
    let backend = build_backend(settings)?;
    let directory = load_directory(&backend).await?;
    let filter = load_filter(settings.exclude_file.as_deref()).await?;

    let total_groups = match selection {
        GroupSelection::All => directory.len(),
        GroupSelection::Named(ref names) => names.len(),
    };

    println!(
        "{} {} group(s), batch size {}, {} workers",
        style("→").cyan(),
        total_groups,
        engine.batch_size,
        engine.parallel_count
    );
    if !filter.is_empty() {
        println!(
            "  {} {} exclusion entries",
            style("→").dim(),
            filter.len()
        );
    }

    let (reporter, mut event_rx) = ChannelReporter::channel(EVENT_QUEUE_CAPACITY);
    let orchestrator = GroupOrchestrator::for_backend(engine, backend)?
        .with_directory(directory)
        .with_fetch_params(merge_fetch_params(&settings.fetch_params, &args.filters))
        .with_filter(filter)
        .with_limit(settings.limit)
        .with_reporter(Arc::new(reporter));

    // Ctrl-C stops new work; in-flight batches still finish
    let cancel = orchestrator.cancellation();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            progress_println(&format!(
                "{} Cancelling after in-flight batches finish...",
                style("!").yellow()
            ));
            cancel.set_cancelled();
        }
    });

    let progress_display = if args.progress {
        Some(Arc::new(RunProgress::new(total_groups)))
    } else {
        None
    };

    // Spawn event handler task (UI layer)
    let progress_clone = progress_display.clone();
    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_event(progress_clone.as_deref(), event);
        }
    });

    let result = orchestrator.run_selection(&selection).await;
    // Dropping the orchestrator closes the event queue
    drop(orchestrator);
    ctrl_c.abort();

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }
    if let Some(ref progress) = progress_display {
        progress.finish();
    }

    let report = result?;
    print_summary(&report);

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write report to '{}'", path.display()))?;
        println!(
            "{} Report written to {}",
            style("✓").green(),
            path.display()
        );
    }

    Ok(())
}

fn handle_event(progress: Option<&RunProgress>, event: EngineEvent) {
    match event {
        EngineEvent::GroupStarted {
            index,
            total,
            group_name,
        } => match progress {
            Some(p) => p.start_group(index, total, &group_name),
            None => println!(
                "{} [{}/{}] {}",
                style("→").cyan(),
                index,
                total,
                group_name
            ),
        },
        EngineEvent::GroupFetched {
            fetched,
            kept,
            skipped,
            ..
        } => match progress {
            Some(p) => p.set_items(kept),
            None => println!(
                "  {} fetched, {} to process, {} skipped",
                fetched, kept, skipped
            ),
        },
        EngineEvent::PassStarted {
            pass, remaining, ..
        } if pass > 1 => {
            let message = format!("retry pass {} ({} left)", pass, remaining);
            match progress {
                Some(p) => p.set_item_message(message),
                None => println!("  {} {}", style("↻").cyan(), message),
            }
        }
        EngineEvent::ItemProgress { current, total } => {
            if let Some(p) = progress {
                p.set_item_position(current, total);
            }
        }
        EngineEvent::BatchFailed { seq, kind, error } => {
            let label = match kind {
                ErrorKind::Transient => style("connection error").yellow(),
                ErrorKind::Permanent => style("failed").red(),
            };
            progress_println(&format!("  {} batch {} {}: {}", style("✗").red(), seq, label, error));
        }
        EngineEvent::SessionRecovering {
            recovery, cooldown, ..
        } => {
            let message = format!(
                "resetting session (#{}), waiting {:.1}s",
                recovery,
                cooldown.as_secs_f64()
            );
            match progress {
                Some(p) => p.set_item_message(message),
                None => println!("  {} {}", style("!").yellow(), message),
            }
        }
        EngineEvent::GroupProgress { current, .. } => {
            if let Some(p) = progress {
                p.finish_group(current);
            }
        }
        EngineEvent::GroupFinished {
            group_name,
            status,
            succeeded,
            failed,
        } => {
            let marker = match status {
                GroupStatus::Completed => style("✓").green(),
                GroupStatus::Cancelled => style("!").yellow(),
                GroupStatus::FetchFailed | GroupStatus::RecoveryExhausted => style("✗").red(),
            };
            progress_println(&format!(
                "{} {}: {} succeeded, {} failed ({})",
                marker,
                group_name,
                succeeded,
                failed,
                status.as_str()
            ));
        }
        EngineEvent::RunStarted { .. }
        | EngineEvent::PassStarted { .. }
        | EngineEvent::RunFinished { .. } => {}
    }
}

fn print_summary(report: &RunReport) {
    println!();
    if report.cancelled {
        println!("{} Run cancelled", style("!").yellow());
    }
    println!(
        "{} {} group(s) processed",
        style("✓").green(),
        report.groups_processed
    );
    println!("  {} succeeded", style(report.total_succeeded).green());
    if report.total_failed > 0 {
        println!("  {} failed", style(report.total_failed).red());
    }
    if report.total_skipped > 0 {
        println!("  {} skipped", style(report.total_skipped).dim());
    }
    if report.total_unprocessed > 0 {
        println!(
            "  {} left unprocessed",
            style(report.total_unprocessed).yellow()
        );
    }
    for group in &report.per_group {
        if let Some(ref error) = group.error {
            println!("  {} {}: {}", style("✗").red(), group.group_name, error);
        }
    }
}
