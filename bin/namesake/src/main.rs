//! Namesake - CNS domain registry mirror.
//!
//! # Usage
//!
//! ```bash
//! # Mirror the mainnet registry with default settings
//! namesake --rpc-url https://mainnet.infura.io/v3/<key>
//!
//! # Mirror the Polygon registry
//! BLOCKCHAIN=MATIC NETWORK_ID=137 REGISTRY_ADDRESS=0x... namesake
//!
//! # Inspect a mirrored domain
//! namesake --show-domain brad.crypto
//!
//! # List .crypto domains owned by an address
//! namesake --list-owner 0x8aad44321a86b170879d7a244c1e8d360c99dda8 --tld crypto
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use namesake_core::error::IndexerError;
use namesake_core::metrics::init_metrics;
use namesake_core::models::{Address, Blockchain};
use namesake_core::ports::ChainEventSource;
use namesake_core::services::{DomainLookup, SyncConfig, SyncService};
use namesake_evm::{EvmClient, EvmClientConfig};
use namesake_storage::{Database, DatabaseConfig, PgRepositories};

/// Namesake CLI - CNS registry mirror.
#[derive(Parser, Debug)]
#[command(name = "namesake")]
#[command(about = "Namesake - mirrors a CNS domain registry into PostgreSQL")]
#[command(version)]
struct Cli {
    /// EVM node HTTP JSON-RPC URL.
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/namesake"
    )]
    database_url: String,

    /// Chain hosting the registry (ETH, MATIC or ZIL).
    #[arg(long, env = "BLOCKCHAIN", default_value = "ETH")]
    blockchain: Blockchain,

    /// EIP-155 chain id of the node.
    #[arg(long, env = "NETWORK_ID", default_value = "1")]
    network_id: u64,

    /// Registry contract address.
    #[arg(
        long,
        env = "REGISTRY_ADDRESS",
        default_value = "0xd1e5b0ff1287aa9f9a268759062e4ab08b9dacbe",
        value_parser = parse_address
    )]
    registry_address: Address,

    /// First block to mirror when the database is empty (registry deployment block).
    #[arg(long, env = "START_BLOCK", default_value = "0")]
    start_block: u64,

    /// Blocks behind the head considered final.
    #[arg(long, env = "CONFIRMATION_BLOCKS", default_value = "3")]
    confirmation_blocks: u64,

    /// Maximum blocks fetched per chunk.
    #[arg(long, env = "BLOCK_FETCH_LIMIT", default_value = "500")]
    block_fetch_limit: u64,

    /// Seconds between sync cycles.
    #[arg(long, env = "FETCH_INTERVAL_SECS", default_value = "5")]
    fetch_interval_secs: u64,

    /// Attempts on a failing single-block chunk before the cycle gives up.
    #[arg(long, env = "MAX_RETRIES", default_value = "5")]
    max_retries: u32,

    /// Upper bound in seconds for processing one chunk.
    #[arg(long, env = "CHUNK_TIMEOUT_SECS", default_value = "300")]
    chunk_timeout_secs: u64,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all mirrored data from the database and exit.
    ///
    /// This will delete all domains, resolutions and registry events, and
    /// reset the sync cursor. Schema/migrations are preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Print a mirrored domain as JSON and exit.
    #[arg(long, value_name = "NAME")]
    show_domain: Option<String>,

    /// Print domains owned by this address as JSON and exit (repeatable).
    #[arg(long, value_name = "ADDRESS", value_parser = parse_address)]
    list_owner: Vec<Address>,

    /// Restrict --list-owner to these TLDs (repeatable).
    #[arg(long, value_name = "TLD", requires = "list_owner")]
    tld: Vec<String>,

    /// Maximum domains printed by --list-owner.
    #[arg(long, default_value = "100")]
    limit: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Parse a 0x-prefixed contract address.
fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_hex(s).map_err(|e| format!("Invalid address '{}': {}", s, e))
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            confirmation_blocks: self.confirmation_blocks,
            block_fetch_limit: self.block_fetch_limit,
            fetch_interval: Duration::from_secs(self.fetch_interval_secs),
            start_block: self.start_block,
            max_retries: self.max_retries,
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled =
        match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
            Ok(metrics_addr) => {
                match PrometheusBuilder::new()
                    .with_http_listener(metrics_addr)
                    .install()
                {
                    Ok(()) => {
                        init_metrics();
                        true
                    }
                    Err(e) => {
                        warn!(
                            "⚠️  Failed to start metrics exporter: {}. Continuing without metrics.",
                            e
                        );
                        false
                    }
                }
            }
            Err(e) => {
                warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
                false
            }
        };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Namesake mirror");
    debug!(rpc_url = %mask_password(&cli.rpc_url), "RPC endpoint");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    if cli.show_domain.is_some() || !cli.list_owner.is_empty() {
        return handle_lookup(&cli).await;
    }

    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 CHAIN CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to {} node...", cli.blockchain);
    let client = EvmClient::connect(EvmClientConfig {
        rpc_url: cli.rpc_url.clone(),
        blockchain: cli.blockchain,
        network_id: cli.network_id,
        registry_address: cli.registry_address,
    })
    .await
    .context("Failed to connect to chain node")?;

    let client = Arc::new(client);
    let head = client.current_block_height().await?;

    info!(
        chain = %cli.blockchain,
        network_id = cli.network_id,
        registry = %cli.registry_address,
        head,
        "🔗 Chain connected"
    );

    let sync = SyncService::new(cli.sync_config(), client, repositories);

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_handle = tokio::spawn(
        async move {
            match sync.run(shutdown_rx).await {
                Ok(()) | Err(IndexerError::ShutdownRequested) => {}
                Err(e) => error!(error = ?e, "❌ Sync worker error"),
            }
        }
        .instrument(info_span!("sync")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Namesake ready");
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    // A chunk in flight may need up to its own timeout to commit
    let grace = Duration::from_secs(cli.chunk_timeout_secs.max(30));
    match tokio::time::timeout(grace, sync_handle).await {
        Ok(_) => debug!("Sync worker stopped"),
        Err(_) => warn!("⚠️  Sync worker shutdown timed out"),
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in a URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --show-domain and --list-owner commands.
async fn handle_lookup(cli: &Cli) -> Result<()> {
    let db = Database::connect(&DatabaseConfig::for_reader(&cli.database_url))
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(db);
    let lookup = DomainLookup::new(Arc::new(PgRepositories::new(db.clone())));

    if let Some(name) = cli.show_domain.as_deref() {
        match lookup.report(name).await.context("Failed to load domain")? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => warn!(name, "Domain is not mirrored"),
        }
    }

    if !cli.list_owner.is_empty() {
        let domains = lookup
            .owned_by(&cli.list_owner, &cli.tld, cli.limit)
            .await
            .context("Failed to list domains")?;
        println!("{}", serde_json::to_string_pretty(&domains)?);
    }

    db.close().await;
    Ok(())
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL mirrored data!");
    warn!("   - All domains, resolutions and registry events");
    warn!("   - The sync cursor will be reset");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   🌐 Domains removed: {}", stats.domains_removed);
    info!("   🔗 Resolutions removed: {}", stats.resolutions_removed);
    info!("   📣 Events removed: {}", stats.events_removed);
    info!("   The mirror will start from the configured start block on next run");

    Ok(())
}
