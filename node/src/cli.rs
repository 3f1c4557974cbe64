//! # CLI Interface
//!
//! Defines the command-line argument structure for `chainwatch-node` using
//! `clap` derive. Supports three subcommands: `run`, `inspect`, and
//! `version`. Every listener setting can also come from a `CHAINWATCH_*`
//! environment variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use chainwatch_core::config::{
    DEFAULT_AGGREGATE_ID, DEFAULT_BATCH_SIZE, DEFAULT_MAX_SIZE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SNAPSHOT_INTERVAL,
};
use chainwatch_core::ListenerConfig;

use crate::logging::LogFormat;

/// chainwatch listener daemon.
///
/// Follows a remote chain over JSON-RPC, keeps a bounded window of recent
/// blocks, and records every batch and reorganisation as an event.
#[derive(Parser, Debug)]
#[command(
    name = "chainwatch-node",
    about = "Event-sourced chain listener",
    version,
    propagate_version = true
)]
pub struct ChainwatchCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the remote chain until interrupted.
    Run(RunArgs),
    /// Print the persisted listener state as JSON and exit.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Settings shared by every subcommand that opens the event store.
#[derive(Args, Debug, Clone)]
pub struct ListenerArgs {
    /// Directory holding the event store. Created on first run.
    #[arg(long, short = 'd', env = "CHAINWATCH_DATA_DIR", default_value = "./chainwatch-data")]
    pub data_dir: PathBuf,

    /// Listener identity; events and snapshots are keyed by it.
    #[arg(long, env = "CHAINWATCH_AGGREGATE_ID", default_value = DEFAULT_AGGREGATE_ID)]
    pub aggregate_id: String,

    /// Number of recent blocks kept in the window.
    #[arg(long, env = "CHAINWATCH_MAX_SIZE", default_value_t = DEFAULT_MAX_SIZE)]
    pub max_size: usize,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub listener: ListenerArgs,

    /// JSON-RPC endpoint of the chain node to follow.
    #[arg(long, env = "CHAINWATCH_RPC_URL", default_value = "http://127.0.0.1:8332")]
    pub rpc_url: String,

    /// RPC username for HTTP basic auth.
    #[arg(long, env = "CHAINWATCH_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password for HTTP basic auth.
    #[arg(long, env = "CHAINWATCH_RPC_PASSWORD", hide_env_values = true)]
    pub rpc_password: Option<String>,

    /// Per-request RPC timeout in milliseconds.
    #[arg(long, env = "CHAINWATCH_RPC_TIMEOUT_MS", default_value_t = 10_000)]
    pub rpc_timeout_ms: u64,

    /// Port for the metrics and status endpoints.
    #[arg(long, env = "CHAINWATCH_METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "CHAINWATCH_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Maximum blocks fetched per poll.
    #[arg(long, env = "CHAINWATCH_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Events between snapshots.
    #[arg(long, env = "CHAINWATCH_SNAPSHOT_INTERVAL", default_value_t = DEFAULT_SNAPSHOT_INTERVAL)]
    pub snapshot_interval: u64,

    /// Delay between polls once caught up, in milliseconds.
    #[arg(long, env = "CHAINWATCH_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// First height to fetch when the window is empty.
    #[arg(long, env = "CHAINWATCH_START_HEIGHT", default_value_t = 0)]
    pub start_height: u64,
}

impl RunArgs {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            aggregate_id: self.listener.aggregate_id.clone(),
            max_size: self.listener.max_size,
            batch_size: self.batch_size,
            snapshot_interval: self.snapshot_interval,
            poll_interval_ms: self.poll_interval_ms,
            start_height: self.start_height,
        }
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub listener: ListenerArgs,
}
