//! CLI command definitions for serverless-watchdog.
//!
//! `run` executes one watchdog invocation against the configured
//! collaborators. The other commands inspect or steer a running fleet through
//! the shared counter store.

use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::total_depth;
use crate::config::{ConfigError, WatchdogConfig};
use crate::host::{Collaborators, FixedBudget, HandlerOutcome};
use crate::intercom::WatchdogCounters;
use crate::metrics::{export_metrics, init_metrics};
use crate::watchdog::{ShutdownFlag, ShutdownSignal};

/// Autoscaling watchdog for short-lived serverless task workers.
#[derive(Parser)]
#[command(name = "serverless-watchdog")]
#[command(about = "Drain a task queue by invoking exactly enough serverless workers")]
#[command(version)]
#[command(
    long_about = "serverless-watchdog watches a task queue and invokes one short-lived worker per pending task, retrying stragglers and handing off to a successor before its time budget runs out.\n\nCollaborators are configured through WATCHDOG_* environment variables; each locator may be set to \"disabled\".\n\nExample usage:\n  serverless-watchdog run --time-budget-secs 300 --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one watchdog invocation until the queue drains or time runs out.
    Run(RunArgs),

    /// Show counters, active workers and queue depth.
    Status(StatusArgs),

    /// Ask every watchdog of the scope to stop, or let them run again.
    Shutdown(ShutdownArgs),

    /// Zero the started and fulfilled counters.
    Reset,

    /// Register a worker as started (for shell-driven workers).
    WorkerStarted(WorkerArgs),

    /// Register a worker as finished (for shell-driven workers).
    WorkerFinished(WorkerArgs),
}

/// Arguments for `serverless-watchdog run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Output the handler response as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Execution budget of this invocation in seconds.
    #[arg(long, env = "WATCHDOG_TIME_BUDGET_SECS")]
    pub time_budget_secs: Option<u64>,
}

/// Arguments for `serverless-watchdog status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `serverless-watchdog shutdown`.
#[derive(Parser, Debug)]
pub struct ShutdownArgs {
    /// Clear the shutdown flag instead of setting it.
    #[arg(long)]
    pub clear: bool,
}

/// Arguments for the worker registration commands.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Worker id, as received in the invocation payload.
    pub worker_id: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = WatchdogConfig::from_env()?;
    config.validate()?;

    match cli.command {
        Commands::Run(args) => run_watchdog_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
        Commands::Shutdown(args) => run_shutdown_command(config, args).await,
        Commands::Reset => run_reset_command(config).await,
        Commands::WorkerStarted(args) => run_worker_started_command(config, args).await,
        Commands::WorkerFinished(args) => run_worker_finished_command(config, args).await,
    }
}

// ============================================================================
// Watchdog run
// ============================================================================

/// Exit status after a second Ctrl-C, as shells report SIGINT.
const INTERRUPT_EXIT_CODE: i32 = 130;

/// Applies `run` flags on top of the loaded configuration and validates the
/// result again.
fn apply_run_overrides(config: &mut WatchdogConfig, args: &RunArgs) -> Result<(), ConfigError> {
    if let Some(secs) = args.time_budget_secs {
        config.time_budget = Duration::from_secs(secs);
    }
    config.validate()
}

async fn run_watchdog_command(mut config: WatchdogConfig, args: RunArgs) -> anyhow::Result<()> {
    apply_run_overrides(&mut config, &args)?;
    if args.metrics {
        init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {}", e))?;
    }

    let context = FixedBudget::new(config.time_budget);
    let collaborators = Collaborators::connect(&config).await?;

    let interrupt = ShutdownFlag::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupt received, stopping the watchdog (press Ctrl-C again to exit now)");
            interrupt.request();

            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Second interrupt received, exiting without releasing the lock");
                std::process::exit(INTERRUPT_EXIT_CODE);
            }
        });
    }

    let handler = collaborators.handler(&config, Some(interrupt));
    let outcome = handler.handle(&context).await?;
    let response = outcome.response();

    if args.json {
        let json_output = serde_json::to_string_pretty(&response)
            .map_err(|e| anyhow::anyhow!("Failed to serialize response JSON: {}", e))?;
        println!("{}", json_output);
    } else {
        print_outcome(&config, &outcome);
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

fn print_outcome(config: &WatchdogConfig, outcome: &HandlerOutcome) {
    println!("Watchdog: {}", config.name);
    match outcome {
        HandlerOutcome::Fulfilled { workers_started } => {
            println!("Outcome:  queue drained ({} workers started)", workers_started);
        }
        HandlerOutcome::ContinuationScheduled { receipt } => {
            let sent = if receipt.was_sent() { "requested" } else { "disabled" };
            println!("Outcome:  time budget exhausted, continuation {}", sent);
        }
        HandlerOutcome::ShutdownExecuted => println!("Outcome:  shutdown executed"),
        HandlerOutcome::AlreadyRunning => println!("Outcome:  another watchdog holds the lock"),
    }
    println!("Status:   {}", outcome.status_code());
}

// ============================================================================
// Fleet inspection and control
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct StatusOutput {
    watchdog: String,
    queues: Vec<String>,
    queue_depth: u64,
    workers_started: i64,
    workers_fulfilled: i64,
    workers_not_served: u64,
    active_workers: u64,
    shutdown_requested: bool,
}

async fn run_status_command(config: WatchdogConfig, args: StatusArgs) -> anyhow::Result<()> {
    let collaborators = Collaborators::connect(&config).await?;
    let counters = WatchdogCounters::new(collaborators.store.clone(), &config.name);

    let snapshot = counters.snapshot().await?;
    let active_workers = collaborators.worker_registry(&config).active_workers().await?;
    let queue_depth = total_depth(collaborators.queue.as_ref(), &config.queues).await?;
    let shutdown_requested = collaborators
        .shutdown_signal(&config)
        .is_requested()
        .await?;

    let status = StatusOutput {
        watchdog: config.name.clone(),
        queues: config.queues.clone(),
        queue_depth,
        workers_started: snapshot.started,
        workers_fulfilled: snapshot.fulfilled,
        workers_not_served: snapshot.not_served(),
        active_workers,
        shutdown_requested,
    };

    if args.json {
        let json_output = serde_json::to_string_pretty(&status)
            .map_err(|e| anyhow::anyhow!("Failed to serialize status JSON: {}", e))?;
        println!("{}", json_output);
    } else {
        println!("Watchdog:           {}", status.watchdog);
        println!("Queues:             {}", status.queues.join(", "));
        println!("Queue depth:        {}", status.queue_depth);
        println!("Workers started:    {}", status.workers_started);
        println!("Workers fulfilled:  {}", status.workers_fulfilled);
        println!("Workers not served: {}", status.workers_not_served);
        println!("Active workers:     {}", status.active_workers);
        println!("Shutdown requested: {}", status.shutdown_requested);
    }

    Ok(())
}

async fn run_shutdown_command(config: WatchdogConfig, args: ShutdownArgs) -> anyhow::Result<()> {
    let collaborators = Collaborators::connect(&config).await?;
    let signal = collaborators.shutdown_signal(&config);

    if args.clear {
        signal.clear().await?;
        println!("Shutdown flag cleared: {}", signal.key());
    } else {
        signal.request().await?;
        println!("Shutdown requested: {}", signal.key());
    }
    Ok(())
}

async fn run_reset_command(config: WatchdogConfig) -> anyhow::Result<()> {
    let collaborators = Collaborators::connect(&config).await?;
    WatchdogCounters::new(collaborators.store.clone(), &config.name)
        .reset()
        .await?;
    info!(watchdog = %config.name, "Counters reset");
    println!("Counters reset for {}", config.name);
    Ok(())
}

async fn run_worker_started_command(config: WatchdogConfig, args: WorkerArgs) -> anyhow::Result<()> {
    let collaborators = Collaborators::connect(&config).await?;
    let started = collaborators
        .worker_registry(&config)
        .register_started(&args.worker_id)
        .await?;
    println!("{}", started);
    Ok(())
}

async fn run_worker_finished_command(
    config: WatchdogConfig,
    args: WorkerArgs,
) -> anyhow::Result<()> {
    let collaborators = Collaborators::connect(&config).await?;
    let counted = collaborators
        .worker_registry(&config)
        .register_fulfilled(&args.worker_id)
        .await?;
    if !counted {
        warn!(worker_id = %args.worker_id, "Worker was not registered, fulfillment not counted");
    }
    println!("{}", counted);
    Ok(())
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
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "serverless-watchdog",
            "--log-level",
            "debug",
            "run",
            "--json",
            "--metrics",
            "--time-budget-secs",
            "120",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert!(args.json);
                assert!(args.metrics);
                assert_eq!(args.time_budget_secs, Some(120));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_budget_flag_is_validated_against_lock_ttl() {
        let args = RunArgs {
            json: false,
            metrics: false,
            time_budget_secs: Some(3600),
        };
        let mut config = WatchdogConfig::disabled();
        let err = apply_run_overrides(&mut config, &args).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));

        let args = RunArgs {
            time_budget_secs: Some(300),
            ..args
        };
        let mut config = WatchdogConfig::disabled();
        apply_run_overrides(&mut config, &args).unwrap();
        assert_eq!(config.time_budget, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_worker_commands() {
        let cli = Cli::try_parse_from(["serverless-watchdog", "worker-started", "abc"]).unwrap();
        assert!(matches!(cli.command, Commands::WorkerStarted(ref a) if a.worker_id == "abc"));

        let cli = Cli::try_parse_from(["serverless-watchdog", "shutdown", "--clear"]).unwrap();
        assert!(matches!(cli.command, Commands::Shutdown(ShutdownArgs { clear: true })));
    }
}
