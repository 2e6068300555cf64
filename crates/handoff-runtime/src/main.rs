//! # handoffd
//!
//! ```text
//! handoffd serve [--config FILE] [--port N] [--bind ADDR] [--strategy S] [--debug]
//! handoffd worker [--read-timeout-ms N] [--max-read N] [--strategy S] [--debug]
//! ```
//!
//! `serve` owns the listening socket and spawns one `worker` per accepted
//! connection. Workers exit 0 after serving, 2 when the connection could
//! not be rebuilt and 1 on any other failure.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use handoff::{exit_code_for, run_worker, DuplicationStrategy, StrategyChoice, WorkerOptions};
use handoff_runtime::{serve, EchoService, RuntimeConfig};
use handoff_telemetry::{init_logging, init_telemetry, TelemetryConfig};

/// Hands accepted TCP connections to isolated worker processes
#[derive(Parser, Debug)]
#[command(name = "handoffd", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and hand each one to a new worker
    Serve(ServeArgs),
    /// Receive one handed-off connection and echo it (spawned by `serve`)
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Duplication strategy: auto, inherited or explicit
    #[arg(long)]
    strategy: Option<StrategyChoice>,

    /// Force debug logging
    #[arg(long)]
    debug: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(strategy) = self.strategy {
            config.handoff.strategy = strategy;
        }
    }
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Idle time after which the connection is closed
    #[arg(long, default_value_t = 5_000)]
    read_timeout_ms: u64,

    /// Largest single read
    #[arg(long, default_value_t = 64 * 1024)]
    max_read: usize,

    /// Override the strategy carried by the token
    #[arg(long)]
    strategy: Option<DuplicationStrategy>,

    /// Force debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Worker(args) => {
            let code = run_worker_process(args).await;
            std::process::exit(code);
        }
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env().with_debug(args.debug))?;

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.apply_env()?;
    args.apply(&mut config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    let stats = serve(config, shutdown_rx).await?;
    info!(
        accepted = stats.accepted,
        handed_off = stats.handed_off,
        failed = stats.failed,
        "handoffd stopped"
    );
    Ok(())
}

async fn run_worker_process(args: WorkerArgs) -> i32 {
    let telemetry = TelemetryConfig::from_env().with_debug(args.debug).for_worker();
    if let Err(e) = init_logging(&telemetry) {
        eprintln!("handoffd worker: {e}");
    }

    let service = EchoService::new(Duration::from_millis(args.read_timeout_ms), args.max_read);
    let options = WorkerOptions {
        strategy: args.strategy,
        ..WorkerOptions::default()
    };

    let result = run_worker(&service, &options).await;
    match &result {
        Ok(served) => info!(served, "worker finished"),
        Err(e) => error!(error = %e, kind = e.kind(), "worker failed"),
    }
    exit_code_for(&result)
}
