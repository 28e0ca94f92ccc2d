// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Meridian Validator Node
//!
//! Entry point for the `meridian-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the validator core to its
//! services, starts the orchestrator, and serves the HTTP ingress API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the validator node
//! - `init`    — initialize the data directory
//! - `version` — print build version information

mod api;
mod cli;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use meridian_ledger::blueprint::{BlueprintCache, VersionResolver};
use meridian_ledger::consensus::{
    ConsensusEngine, ConsensusFailureHandler, ControlDocketProcessor, DocketBuilder,
    LeaderElection, LeaderElectionConfig, PendingDocketStore, SignatureCollector,
};
use meridian_ledger::events::EventBus;
use meridian_ledger::mempool::verified_queue::{VerifiedQueue, VerifiedQueueConfig};
use meridian_ledger::mempool::{MemPool, MemPoolConfig};
use meridian_ledger::model::ValidatorRegistration;
use meridian_ledger::orchestrator::Orchestrator;
use meridian_ledger::registry::{
    RegisterConfigStore, RegistrationMode, RegistryConfig, ValidatorRegistry,
};
use meridian_ledger::services::{
    BlueprintService, Ed25519Wallet, InMemoryBlueprintService, InMemoryRegisterStore,
    KeyValueStore, MemoryKvStore, NullPeerService, PeerService, RegisterStore, SledKvStore,
    WalletClient,
};
use meridian_ledger::validation::rights::{RightsEnforcement, RosterProvider};
use meridian_ledger::validation::{TransactionReceiver, ValidationConfig, ValidationEngine};

use cli::{Commands, MeridianNodeCli};
use metrics::NodeMetrics;

/// Orchestrator tick cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the CLI log level is applied to
/// both Meridian crates and everything else stays at `warn`. Logs go to
/// stderr — stdout belongs to subcommand output. Call once, before any
/// other startup work.
fn init_tracing(level: &str, json: bool) {
    let level = if cli::validate_log_level(level) {
        level
    } else {
        "info"
    };
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!("warn,meridian_node={level},meridian_ledger={level}")
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(directives))
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MeridianNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — full validator startup sequence
// ---------------------------------------------------------------------------

/// Starts the validator: service wiring, orchestrator, API server, and
/// metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let data_dir = cli::resolve_data_dir(&args.data_dir);
    init_tracing(&args.log_level, args.log_json);

    tracing::info!(
        api_addr = %args.api_addr,
        metrics_addr = %args.metrics_addr,
        data_dir = %data_dir.display(),
        validator = %args.validator_id,
        registers = ?args.registers,
        dev = args.dev,
        "starting meridian-node"
    );

    // --- Persistence ---
    let kv: Arc<dyn KeyValueStore> = if args.dev {
        Arc::new(MemoryKvStore::new())
    } else {
        let kv_dir = data_dir.join("kv");
        std::fs::create_dir_all(&kv_dir)
            .with_context(|| format!("failed to create kv directory: {}", kv_dir.display()))?;
        Arc::new(
            SledKvStore::open(&kv_dir)
                .map_err(|e| anyhow::anyhow!("failed to open kv store: {e}"))?,
        )
    };

    // --- External service clients ---
    // Register storage, the wallet, blueprints, and the peer transport
    // are deployment concerns. The embedded implementations below serve
    // dev mode and single-node operation; a clustered deployment swaps
    // them at this seam.
    let store: Arc<dyn RegisterStore> = Arc::new(InMemoryRegisterStore::new());
    let wallet: Arc<dyn WalletClient> = Arc::new(Ed25519Wallet::new());
    let blueprint_service: Arc<dyn BlueprintService> = Arc::new(InMemoryBlueprintService::new());
    let peers: Arc<dyn PeerService> = Arc::new(NullPeerService::new());

    let events = EventBus::new();

    // --- Registry & configuration ---
    let registry = Arc::new(ValidatorRegistry::new(
        Arc::clone(&kv),
        RegistryConfig {
            mode: if args.dev {
                RegistrationMode::Public
            } else {
                RegistrationMode::Consent
            },
            ..RegistryConfig::default()
        },
        events.clone(),
    ));
    let config_store = Arc::new(RegisterConfigStore::new(Arc::clone(&kv), "config"));

    // Dev mode: this node is the sole, immediately-active validator of
    // every served register.
    if args.dev {
        let wallet_id = wallet
            .create_or_retrieve_system_wallet(&args.validator_id)
            .await
            .map_err(|e| anyhow::anyhow!("system wallet: {e}"))?;
        let signed = wallet
            .sign(&wallet_id, b"registration-probe")
            .await
            .map_err(|e| anyhow::anyhow!("system wallet probe: {e}"))?;
        for register in &args.registers {
            match registry.register(
                register,
                ValidatorRegistration {
                    validator_id: args.validator_id.clone(),
                    public_key: signed.public_key.clone(),
                    rpc_endpoint: format!("http://{}", args.api_addr),
                    metadata: Default::default(),
                },
            ) {
                Ok(info) => tracing::info!(register = %register, slot = info.order_index,
                    "registered self as dev validator"),
                Err(e) => tracing::warn!(register = %register, error = %e,
                    "dev self-registration failed"),
            }
        }
    }

    // --- Validation pipeline ---
    let blueprints = Arc::new(BlueprintCache::new(Arc::clone(&blueprint_service)));
    let versions = Arc::new(VersionResolver::new(Arc::clone(&store)));
    let validation = Arc::new(ValidationEngine::new(
        Arc::clone(&blueprints),
        Arc::clone(&store),
        Arc::clone(&wallet),
        RightsEnforcement::new(Arc::clone(&registry) as Arc<dyn RosterProvider>),
        ValidationConfig::default(),
    ));

    // --- Mempool & ingress ---
    let mempool = Arc::new(MemPool::new(MemPoolConfig::default()));
    let verified_queue = Arc::new(VerifiedQueue::new(VerifiedQueueConfig::default()));
    let receiver = Arc::new(TransactionReceiver::new(
        Arc::clone(&validation),
        verified_queue,
        Arc::clone(&mempool),
    ));

    // --- Consensus ---
    let pending = Arc::new(PendingDocketStore::new());
    let builder = Arc::new(DocketBuilder::new(
        Arc::clone(&store),
        Arc::clone(&mempool),
        Arc::clone(&wallet),
        Arc::clone(&config_store),
        args.validator_id.clone(),
        "",
    ));
    let engine = Arc::new(ConsensusEngine::new(
        Arc::clone(&peers),
        Arc::clone(&wallet),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&validation),
        Arc::clone(&pending),
        Arc::clone(&config_store),
        args.validator_id.clone(),
    ));
    let failure = Arc::new(ConsensusFailureHandler::new(
        SignatureCollector::new(
            Arc::clone(&peers),
            Arc::clone(&wallet),
            args.validator_id.clone(),
        ),
        Arc::clone(&mempool),
        Arc::clone(&registry),
        Arc::clone(&config_store),
        Arc::clone(&pending),
    ));
    let control = Arc::new(ControlDocketProcessor::new(
        Arc::clone(&registry),
        Arc::clone(&config_store),
        Arc::clone(&blueprints),
        Arc::clone(&versions),
        events.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&mempool),
        builder,
        Arc::clone(&engine),
        failure,
        control,
        Arc::clone(&store),
        Arc::clone(&peers),
    ));

    for register in &args.registers {
        let election = Arc::new(LeaderElection::new(
            register.clone(),
            args.validator_id.clone(),
            Arc::clone(&registry),
            Arc::clone(&peers),
            events.clone(),
            LeaderElectionConfig::default(),
        ));
        orchestrator.add_register(register.clone(), election);
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: if args.dev { "devnet" } else { "mainnet" }.to_string(),
        validator_id: args.validator_id.clone(),
        registers: args.registers.clone(),
        started_at: chrono::Utc::now(),
        receiver,
        mempool: Arc::clone(&mempool),
        metrics: Arc::clone(&node_metrics),
    };

    // --- Shutdown plumbing ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Orchestrator task ---
    let orchestrator_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            orchestrator.run(shutdown_rx, TICK_INTERVAL).await;
        })
    };

    // --- Mempool gauge refresher ---
    {
        let mempool = Arc::clone(&mempool);
        let registers = args.registers.clone();
        let node_metrics = Arc::clone(&node_metrics);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let total: usize = registers.iter().map(|r| mempool.count(r)).sum();
                        node_metrics.transactions_in_mempool.set(total as i64);
                    }
                    _ = shutdown_rx.changed() => return,
                }
            }
        });
    }

    // --- API & metrics servers ---
    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(&args.api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", args.api_addr))?;
    tracing::info!("API server listening on {}", args.api_addr);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", args.metrics_addr))?;
    tracing::info!("metrics server listening on {}", args.metrics_addr);

    print_startup_banner(
        &args.validator_id,
        &args.api_addr,
        &args.metrics_addr,
        &args.registers,
        args.dev,
    );

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
        }
    }

    // --- Graceful shutdown ---
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), orchestrator_handle).await;

    tracing::info!("meridian-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// init — data directory initialization
// ---------------------------------------------------------------------------

/// Initializes a node data directory:
///
/// ```text
/// {data_dir}/
///     kv/         — embedded validator/roster store
///     node.json   — node identity record
/// ```
fn init_node(args: cli::InitArgs) -> Result<()> {
    init_tracing("info", false);

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    let marker = data_dir.join("node.json");
    if marker.exists() && !args.force {
        anyhow::bail!(
            "data directory already initialized at {}. Use --force to overwrite.",
            data_dir.display()
        );
    }

    let kv_dir = data_dir.join("kv");
    std::fs::create_dir_all(&kv_dir)
        .with_context(|| format!("failed to create kv directory: {}", kv_dir.display()))?;

    let identity = serde_json::json!({
        "node_id": uuid::Uuid::new_v4().to_string(),
        "initialized_at": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    std::fs::write(&marker, serde_json::to_vec_pretty(&identity)?)
        .with_context(|| format!("failed to write {}", marker.display()))?;

    tracing::info!(data_dir = %data_dir.display(), "node initialized");

    println!();
    println!("Node initialized successfully.");
    println!();
    println!("  Data directory : {}", data_dir.display());
    println!("  KV store       : {}", kv_dir.display());
    println!("  Identity       : {}", marker.display());
    println!();
    println!(
        "Run `meridian-node run -d {}` to start the node.",
        data_dir.display()
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

/// Prints version information to stdout.
fn print_version() {
    println!("meridian-node {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit    {}", commit);
    }
    if let Some(ts) = option_env!("BUILD_TIMESTAMP") {
        println!("built     {}", ts);
    }
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

/// Prints the startup summary: one header line, then the handful of
/// facts an operator checks first.
fn print_startup_banner(
    validator_id: &str,
    api_addr: &str,
    metrics_addr: &str,
    registers: &[String],
    dev: bool,
) {
    let mode = if dev { "validator (dev)" } else { "validator" };
    println!();
    println!(
        "meridian-node v{} starting as {mode}",
        env!("CARGO_PKG_VERSION")
    );
    println!("    validator id   {validator_id}");
    println!("    ingress api    http://{api_addr}");
    println!("    metrics        http://{metrics_addr}/metrics");
    println!("    registers      {}", registers.join(", "));
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_directory_structure() {
        // Create the structure the same way init_node does — calling
        // init_node here would race on global logging initialization.
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("meridian-init-test");
        let kv_dir = data_dir.join("kv");
        std::fs::create_dir_all(&kv_dir).unwrap();

        let identity = serde_json::json!({
            "node_id": uuid::Uuid::new_v4().to_string(),
            "initialized_at": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        });
        std::fs::write(
            data_dir.join("node.json"),
            serde_json::to_vec_pretty(&identity).unwrap(),
        )
        .unwrap();

        assert!(kv_dir.exists());
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(data_dir.join("node.json")).unwrap()).unwrap();
        assert!(written.get("node_id").is_some());
    }

    #[test]
    fn banner_does_not_panic() {
        print_startup_banner(
            "validator-1",
            "127.0.0.1:9760",
            "127.0.0.1:9762",
            &["default".to_string(), "trade".to_string()],
            true,
        );
    }
}
