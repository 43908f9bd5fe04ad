//! Preview one group without dispatching.

use console::style;

use crate::cli::helpers::{build_backend, load_directory, load_filter, merge_fetch_params};
use crate::config::Settings;
use crate::services::GroupOrchestrator;

/// Excluded items listed before the rest are summarised.
const MAX_LISTED: usize = 20;

pub async fn cmd_preview(
    settings: &Settings,
    group: &str,
    filters: &[(String, String)],
    json: bool,
) -> anyhow::Result<()> {
    let backend = build_backend(settings)?;
    let directory = load_directory(&backend).await?;
    let filter = load_filter(settings.exclude_file.as_deref()).await?;

    let orchestrator = GroupOrchestrator::for_backend(settings.engine_config()?, backend)?
        .with_directory(directory)
        .with_fetch_params(merge_fetch_params(&settings.fetch_params, filters))
        .with_filter(filter)
        .with_limit(settings.limit);

    let preview = orchestrator.preview(group).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    println!(
        "{} {} ({})",
        style("Preview").bold(),
        preview.group.group_name,
        preview.group.group_id
    );
    println!("  {} fetched", preview.fetched);
    println!(
        "  {} excluded by list",
        style(preview.filtered.excluded.len()).yellow()
    );
    if preview.filtered.over_limit > 0 {
        println!(
            "  {} beyond limit",
            style(preview.filtered.over_limit).yellow()
        );
    }
    println!(
        "  {} would be processed",
        style(preview.filtered.kept.len()).green()
    );

    if !preview.filtered.excluded.is_empty() {
        println!();
        println!("{}", style("Excluded items:").dim());
        for item in preview.filtered.excluded.iter().take(MAX_LISTED) {
            println!("  {} {} {}", style("-").dim(), item.name, style(&item.id).dim());
        }
        let rest = preview.filtered.excluded.len().saturating_sub(MAX_LISTED);
        if rest > 0 {
            println!("  {} and {} more", style("…").dim(), rest);
        }
    }
    Ok(())
}
