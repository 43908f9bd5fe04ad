//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod groups;
mod preview;
mod run_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::helpers::parse_key_val;
use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "batchsweep")]
#[command(about = "Resilient batch operations over grouped marketplace items")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// List the backend's groups in processing order
    Groups,

    /// Show what a run would do to one group without changing anything
    Preview {
        /// Group name
        group: String,
        /// Exclusion list file (one product name per line, `id:<id>` for ids)
        #[arg(short, long)]
        exclude_file: Option<PathBuf>,
        /// Process at most this many items (0 = unlimited)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Extra fetch filter, repeatable
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
        /// Print the preview as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the operation over one or more groups
    Run {
        /// Group names to process, in order
        groups: Vec<String>,
        /// Process every group
        #[arg(short, long, conflicts_with = "groups")]
        all: bool,
        /// Exclusion list file (one product name per line, `id:<id>` for ids)
        #[arg(short, long)]
        exclude_file: Option<PathBuf>,
        /// Process at most this many items per group (0 = unlimited)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Items per batch (overrides config)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Concurrent batches (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Extra fetch filter, repeatable
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
        /// Show progress bars
        #[arg(short = 'P', long)]
        progress: bool,
        /// Write the run report as JSON to this path
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

/// Normalise a CLI limit: `0` means no limit.
fn limit_arg(limit: Option<usize>) -> Option<Option<usize>> {
    limit.map(|l| if l == 0 { None } else { Some(l) })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (mut settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Groups => groups::cmd_groups(&settings).await,
        Commands::Preview {
            group,
            exclude_file,
            limit,
            filters,
            json,
        } => {
            if let Some(path) = exclude_file {
                settings.exclude_file = Some(path);
            }
            if let Some(limit) = limit_arg(limit) {
                settings.limit = limit;
            }
            preview::cmd_preview(&settings, &group, &filters, json).await
        }
        Commands::Run {
            groups,
            all,
            exclude_file,
            limit,
            batch_size,
            workers,
            filters,
            progress,
            report,
        } => {
            if let Some(path) = exclude_file {
                settings.exclude_file = Some(path);
            }
            if let Some(limit) = limit_arg(limit) {
                settings.limit = limit;
            }
            if let Some(size) = batch_size {
                settings.batch_size = size;
            }
            if let Some(workers) = workers {
                settings.parallel_count = workers;
            }
            run_cmd::cmd_run(
                &settings,
                run_cmd::RunArgs {
                    groups,
                    all,
                    filters,
                    progress,
                    report,
                },
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "batchsweep",
            "run",
            "1. Spring",
            "2. Summer",
            "--limit",
            "0",
            "--filter",
            "market=ST11",
            "-P",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                groups,
                all,
                limit,
                filters,
                progress,
                ..
            } => {
                assert_eq!(groups, vec!["1. Spring", "2. Summer"]);
                assert!(!all);
                assert_eq!(limit_arg(limit), Some(None));
                assert_eq!(filters, vec![("market".to_string(), "ST11".to_string())]);
                assert!(progress);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_all_conflicts_with_names() {
        assert!(Cli::try_parse_from(["batchsweep", "run", "--all", "1. Spring"]).is_err());
    }
}
