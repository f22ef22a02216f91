//! Thin operator entrypoint (§4.9): just enough `clap` to pick a subcommand
//! and a config path. Argument-parsing *semantics* beyond that — interactive
//! wizards, shell completion, validation messages — are out of scope; the
//! config file and environment variables remain the source of truth.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "xvenue-arb", about = "Cross-venue prediction-market arbitrage engine", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file or directory (see `AppConfig::load_from`).
    #[arg(long, global = true, default_value = "config")]
    pub config: String,

    /// Override `runtime.dry_run` regardless of what the config file says.
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the full engine: scanner, task executors, exposure monitor, dashboard.
    Run,
    /// One-shot scanner pass against the matched market pairs: prints opportunities and exits.
    Scan,
    /// Print the recovered task store's contents and exit.
    Status,
}
