// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chainwatch Node
//!
//! Entry point for the `chainwatch-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and runs the follower against a
//! JSON-RPC chain node.
//!
//! The binary supports three subcommands:
//!
//! - `run`: follow the remote chain and serve `/metrics` and `/status`
//! - `inspect`: print the persisted listener state as JSON
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod rpc;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use chainwatch_core::{
    Follower, Listener, ListenerService, PollOutcome, Repository, SledEventStore,
};

use api::{AppState, ListenerView};
use cli::{ChainwatchCli, Commands};
use logging::LogFormat;
use metrics::ListenerMetrics;
use rpc::{BasicAuth, JsonRpcProvider};

/// Grace period for the follower to finish its current poll after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ChainwatchCli::parse();

    match cli.command {
        Commands::Run(args) => run_listener(args).await,
        Commands::Inspect(args) => inspect(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the event store, connects the RPC provider, and follows the chain
/// until SIGINT/SIGTERM.
async fn run_listener(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format());

    let config = args.listener_config();
    config.validate().context("invalid listener configuration")?;

    tracing::info!(
        aggregate_id = %config.aggregate_id,
        metrics_port = args.metrics_port,
        data_dir = %args.listener.data_dir.display(),
        max_size = config.max_size,
        batch_size = config.batch_size,
        "starting chainwatch-node"
    );

    // --- Event store ---
    let store = open_store(&args.listener.data_dir)?;

    // --- Provider ---
    let auth = match (&args.rpc_user, &args.rpc_password) {
        (Some(user), Some(password)) => Some(BasicAuth::new(user, password)),
        (None, None) => None,
        _ => anyhow::bail!("--rpc-user and --rpc-password must be given together"),
    };
    let provider = JsonRpcProvider::new(
        &args.rpc_url,
        auth,
        Duration::from_millis(args.rpc_timeout_ms),
    )
    .context("invalid RPC url")?;
    tracing::info!(rpc_url = %provider.url(), "rpc provider configured");

    let service = ListenerService::open(store.clone(), provider, config)
        .context("failed to load listener from the event store")?;

    // --- Metrics & status ---
    let metrics = ListenerMetrics::new().context("failed to register metrics")?;
    let app_state = AppState::new(metrics, service.listener());

    let router = api::create_router(app_state.clone());
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Follower ---
    let observer_state = app_state.clone();
    let observer = move |outcome: &PollOutcome, listener: &Listener| {
        observer_state.metrics.observe(outcome, listener);
        observer_state.publish(listener);
    };
    let mut follower = Follower::new(service).with_observer(Box::new(observer));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut follower_task = tokio::spawn(async move { follower.run(shutdown_rx).await });

    // --- Serve ---
    let result = tokio::select! {
        res = axum::serve(metrics_listener, router) => {
            res.context("metrics server failed")
        }
        res = &mut follower_task => {
            match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("follower stopped")),
                Err(e) => Err(anyhow::Error::new(e).context("follower task panicked")),
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping follower");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    if !follower_task.is_finished() {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut follower_task).await {
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "follower exited with error"),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("follower did not stop within grace period, aborting");
                follower_task.abort();
            }
        }
    }

    store.flush().context("failed to flush event store")?;
    tracing::info!("chainwatch-node stopped");
    result
}

/// Loads the listener from the store and prints a JSON summary to stdout.
fn inspect(args: cli::InspectArgs) -> Result<()> {
    logging::init_logging("warn", LogFormat::Pretty);

    let store = open_store(&args.listener.data_dir)?;
    let listener = Repository::new(store)
        .load(&args.listener.aggregate_id, args.listener.max_size)
        .context("failed to load listener")?;

    let view = ListenerView::from_listener(&listener);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn open_store(data_dir: &std::path::Path) -> Result<SledEventStore> {
    let db_path = data_dir.join("events");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create data directory: {}", db_path.display()))?;
    let store = SledEventStore::open(&db_path)
        .with_context(|| format!("failed to open event store at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "event store opened");
    Ok(store)
}

/// Prints version information to stdout.
fn print_version() {
    println!("chainwatch-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that branch never resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
