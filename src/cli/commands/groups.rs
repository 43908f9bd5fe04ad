//! List backend groups.

use console::style;

use crate::cli::helpers::{build_backend, load_directory};
use crate::config::Settings;

pub async fn cmd_groups(settings: &Settings) -> anyhow::Result<()> {
    let backend = build_backend(settings)?;
    let directory = load_directory(&backend).await?;

    if directory.is_empty() {
        println!("{} The backend returned no groups", style("!").yellow());
        return Ok(());
    }

    println!("{} {} groups", style("→").cyan(), directory.len());
    for name in directory.names() {
        let id = directory.id_of(name).unwrap_or_default();
        println!("  {} {}", style(name).bold(), style(format!("({})", id)).dim());
    }
    Ok(())
}
