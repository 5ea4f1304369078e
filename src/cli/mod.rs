//! CLI Module
//!
//! Command-line interface replaying save/upload sessions against the
//! simulated server.

pub mod commands;
pub mod scenario;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::upload::{OverflowChoice, DEFAULT_CHUNK_SIZE};

/// Edit Sync - save and upload orchestration for edited data layers
#[derive(Parser, Debug)]
#[command(name = "edit-sync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a session described by a scenario file
    #[command(name = "run")]
    Run {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Settings file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Answer to give when a changeset is full
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Ask on the terminal when a changeset is full
        #[arg(long, conflicts_with = "policy")]
        interactive: bool,

        /// Override the chunk size (implies chunked uploads)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Write the session summary as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show how objects would be split into requests
    #[command(name = "plan")]
    Plan {
        /// Number of objects to upload
        #[arg(short, long)]
        objects: usize,

        #[arg(short, long, value_enum, default_value = "chunked")]
        strategy: StrategyArg,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Server limit of objects per changeset
        #[arg(long)]
        max_changeset_size: Option<usize>,
    },
}

/// Overflow answers accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Abort,
    Reopen,
    Return,
}

impl From<PolicyArg> for OverflowChoice {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Abort => OverflowChoice::Abort,
            PolicyArg::Reopen => OverflowChoice::ReopenAndContinue,
            PolicyArg::Return => OverflowChoice::ReturnToCaller,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Single,
    Chunked,
    PerObject,
}
