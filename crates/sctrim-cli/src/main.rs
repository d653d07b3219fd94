//! sctrim - seccomp profile minimizer for containerized services.
//!
//! Greedily removes syscalls from a permissive baseline seccomp profile,
//! trialing each removal against a live instance of the target service,
//! and persists the minimal profile that still starts, stays alive, and
//! serves its workload.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// sctrim - seccomp profile minimizer
#[derive(Parser, Debug)]
#[command(name = "sctrim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to run configuration file
    #[arg(short, long, default_value = "sctrim.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Minimize a baseline profile against the configured service
    Run {
        /// Baseline (maximally permissive) seccomp profile
        baseline: PathBuf,

        /// Resume an interrupted run from the working profile, if present
        #[arg(long)]
        resume: bool,
    },

    /// Print the sorted, deduplicated syscall set of a profile
    Syscalls {
        /// Profile document to flatten
        profile: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run { baseline, resume } => commands::run(&cli.config, &baseline, resume),
        Commands::Syscalls { profile } => commands::syscalls(&profile),
    }
}
