// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stagedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagedag",
    version,
    about = "Run the staged patent and trend analysis pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file at the default location means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Stagedag.toml")]
    pub config: String,

    /// What to analyse.
    #[arg(long, value_name = "TEXT", required_unless_present = "dry_run")]
    pub query: Option<String>,

    /// Extra context passed to planning and drafting.
    #[arg(long, value_name = "TEXT")]
    pub context: Option<String>,

    /// Caller identity used for memory lookups.
    #[arg(long, value_name = "ID")]
    pub user: Option<String>,

    /// Report id; also used as the run id.
    #[arg(long, value_name = "ID")]
    pub report_id: Option<String>,

    /// Override `[engine].max_iterations` for this run.
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Make the simulated reviewer reject the first N drafts.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub reject_drafts: u32,

    /// Print the final report as JSON instead of markdown.
    #[arg(long)]
    pub json: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the stage graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
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
