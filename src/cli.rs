// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `streamsheets`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "streamsheets",
    version,
    about = "Run reactive streamsheet machines.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STREAMSHEETS_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one machine in this process; stdin lines are published as
    /// messages, outbox results are printed to stdout.
    Run(RunArgs),
    /// Run one machine as a supervised worker speaking JSON lines on stdio.
    Worker(WorkerArgs),
    /// Spawn and control one worker process per config file.
    Supervise(SuperviseArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the machine config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Streamsheets.toml")]
    pub config: PathBuf,

    /// Queue source that stdin lines are published to.
    #[arg(long, value_name = "NAME", default_value = "stdin")]
    pub source: String,

    /// Parse + validate, print the machine, but don't run it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Path to the machine config file (TOML).
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SuperviseArgs {
    /// Machine config files; one worker is spawned per file.
    #[arg(long = "config", value_name = "PATH", required = true, num_args = 1..)]
    pub configs: Vec<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
