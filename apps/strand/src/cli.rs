//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use strand_config::fixed_names::DEFAULT_POOL_KEY;
use strand_types::{LogFormat, ThreadPoolKey};

/// strand - run work on circuit-breaker thread pools with trace context propagation
#[derive(Parser)]
#[command(name = "strand")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run work on circuit-breaker thread pools with trace context propagation")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging to the strand log directory
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit units of work to a thread pool and report where each one ran
    Run {
        /// Thread pool key; per-key overrides come from `[pools.<key>]`
        #[arg(long, default_value = DEFAULT_POOL_KEY, value_parser = ThreadPoolKey::from_str)]
        pool: ThreadPoolKey,

        /// Number of units to submit
        #[arg(short = 'n', long, default_value_t = 4)]
        tasks: usize,

        /// Make every Nth unit fail
        #[arg(long, value_name = "N")]
        fail_every: Option<usize>,

        /// Use the undecorated strategy even if tracing is enabled
        #[arg(long)]
        no_propagation: bool,
    },

    /// Show the effective configuration
    Config,
}
