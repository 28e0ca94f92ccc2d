//! # CLI Interface
//!
//! Command-line argument structure for `meridian-node` using `clap`
//! derive. Three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Meridian validator node.
///
/// Participates in per-register consensus, validates and admits
/// transactions, serves the HTTP ingress API, and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "meridian-node",
    about = "Meridian validator node",
    version,
    propagate_version = true
)]
pub struct MeridianNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the validator node.
    Run(RunArgs),
    /// Initialize a new node data directory.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory (validator store, keys).
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "MERIDIAN_DATA_DIR", default_value = "~/.meridian")]
    pub data_dir: PathBuf,

    /// This node's validator identifier within its registers.
    #[arg(long, env = "MERIDIAN_VALIDATOR_ID", default_value = "validator-1")]
    pub validator_id: String,

    /// Registers this node serves, comma-separated.
    #[arg(long, env = "MERIDIAN_REGISTERS", value_delimiter = ',', default_value = "default")]
    pub registers: Vec<String>,

    /// Listen address for the HTTP ingress API.
    #[arg(long, env = "MERIDIAN_API_ADDR", default_value = "127.0.0.1:9760")]
    pub api_addr: String,

    /// Listen address for the Prometheus metrics endpoint.
    #[arg(long, env = "MERIDIAN_METRICS_ADDR", default_value = "127.0.0.1:9762")]
    pub metrics_addr: String,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace).
    #[arg(long, env = "MERIDIAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "MERIDIAN_LOG_JSON")]
    pub log_json: bool,

    /// Dev mode: in-memory services, self as sole validator, ephemeral
    /// keys. Nothing survives a restart.
    #[arg(long)]
    pub dev: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "MERIDIAN_DATA_DIR", default_value = "~/.meridian")]
    pub data_dir: PathBuf,

    /// Overwrite an already-initialized data directory.
    #[arg(long)]
    pub force: bool,
}

/// Expand a leading `~` to the user's home directory.
pub fn resolve_data_dir(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Whether a log-level string is one tracing understands.
pub fn validate_log_level(level: &str) -> bool {
    matches!(level, "error" | "warn" | "info" | "debug" | "trace")
}
