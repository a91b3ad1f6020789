//! strand - run work on circuit-breaker thread pools with trace context propagation
//!
//! The host decides at startup whether the propagating strategy is
//! registered, based on the `[tracing] enabled` setting.

mod cli;
mod display;
mod error;
mod runner;

use crate::cli::{Cli, Commands, GlobalArgs};
use crate::display::OutputRenderer;
use crate::error::CliError;
use crate::runner::{run_units, RunPlan, RunReport};
use clap::Parser;
use std::process;
use std::sync::Arc;
use strand_concurrency::DefaultConcurrencyStrategy;
use strand_config::Config;
use strand_propagation::{PropagatingConcurrencyStrategy, TracingPropagator};
use strand_types::LogFormat;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    // Configuration decides the log filter, so it is loaded before tracing starts
    let config = match load_config(&cli.global).await {
        Ok(config) => config,
        Err(e) => {
            if !json_mode {
                eprintln!("Error: {e}");
            }
            process::exit(1);
        }
    };

    init_tracing(&cli.global, &config);

    if let Err(e) = run(cli, config).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Load configuration: file (or defaults), then environment overrides
async fn load_config(global: &GlobalArgs) -> Result<Config, CliError> {
    let mut config = Config::load_or_default(global.config.as_deref()).await?;
    config.merge_env()?;
    if let Some(format) = global.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

/// Main application logic
async fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    info!("Starting strand v{}", env!("CARGO_PKG_VERSION"));
    let renderer = OutputRenderer::new(cli.global.json);

    match cli.command {
        Commands::Run {
            pool,
            tasks,
            fail_every,
            no_propagation,
        } => {
            let plan = RunPlan {
                sizing: config.sizing_for(&pool),
                key: pool,
                tasks,
                fail_every,
            };
            let propagate = config.tracing.enabled && !no_propagation;
            let report =
                tokio::task::spawn_blocking(move || execute_run(&plan, propagate)).await??;
            renderer.render_run(&report)?;
        }
        Commands::Config => renderer.render_config(&config)?,
    }

    info!("Command completed successfully");
    Ok(())
}

/// Build the strategy chosen at startup and run the plan on it
fn execute_run(plan: &RunPlan, propagate: bool) -> Result<RunReport, CliError> {
    let report = if propagate {
        let strategy = PropagatingConcurrencyStrategy::from_optional(
            Arc::new(TracingPropagator),
            None::<Arc<DefaultConcurrencyStrategy>>,
        );
        run_units(&strategy, plan, true)?
    } else {
        run_units(&DefaultConcurrencyStrategy, plan, false)?
    };
    Ok(report)
}

fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
}

/// Initialize tracing/logging
fn init_tracing(global: &GlobalArgs, config: &Config) {
    if global.debug {
        // Debug mode: structured JSON logs to file
        let log_dir = Config::log_dir();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            if !global.json {
                eprintln!("Warning: Failed to create log directory: {e}");
            }
        }

        let log_file = log_dir.join(format!(
            "strand-{}.log",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ));

        match std::fs::File::create(&log_file) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(file)
                    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                        EnvFilter::new(
                            "info,strand=debug,strand_concurrency=trace,strand_propagation=trace",
                        )
                    }))
                    .init();

                if !global.json {
                    eprintln!("Debug logging enabled: {}", log_file.display());
                }
                return;
            }
            Err(e) => {
                if !global.json {
                    eprintln!("Warning: Failed to create log file: {e}");
                }
            }
        }
    }

    if global.json {
        // JSON mode: suppress all console output to avoid contaminating JSON
        tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .with_env_filter("off")
            .init();
        return;
    }

    // Normal mode: configured filter and format on stderr
    match config.logging.format {
        LogFormat::Plain => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter(config))
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter(config))
            .init(),
    }
}
