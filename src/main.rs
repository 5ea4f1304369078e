//! Edit Sync CLI
//!
//! Command-line interface replaying save/upload sessions.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edit_sync::cli::commands::{self, RunOptions};
use edit_sync::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let fallback = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Edit Sync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Edit Sync v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Run {
            scenario,
            config,
            policy,
            interactive,
            chunk_size,
            report,
        } => commands::run_scenario(
            &scenario,
            RunOptions {
                config: config.as_deref(),
                policy,
                interactive,
                chunk_size,
                report: report.as_deref(),
            },
        ),
        Commands::Plan {
            objects,
            strategy,
            chunk_size,
            max_changeset_size,
        } => commands::plan(objects, strategy, chunk_size, max_changeset_size),
    }
}
