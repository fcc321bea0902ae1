//! Skynet Discovery Server
//!
//! Rendezvous registry for the Skynet network. Peers register a signed
//! endpoint, and every registered peer can ask for the peers nearest to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SKYNET DISCOVERY                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP API (8080)          ←── register / unregister / peers │
//! │  Peer Store (RocksDB)     ←── one row per public key        │
//! │  Geo Resolver (MaxMind)   ←── IP → coordinates              │
//! │  Ranking Engine           ←── distance + recency score      │
//! │  Liveness Sweeper         ←── probes GET /ping every 5m     │
//! │  Console                  ←── peers / help / exit           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

mod api;
mod config;
mod console;
mod crypto;
mod geo;
mod registry;
mod sweeper;
mod types;

#[cfg(test)]
mod tests;

use api::{ApiState, Metrics, RateLimiter};
use config::DiscoveryConfig;
use geo::{CompositeGeoResolver, GeoResolver, MaxMindGeoResolver, StaticGeoResolver};
use registry::{PeerStore, Registry, RocksPeerStore};
use sweeper::HttpProber;

/// Skynet Discovery - rendezvous registry for peer discovery
#[derive(Parser, Debug)]
#[command(name = "skynet-discovery")]
#[command(author = "Skynet Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rendezvous registry ranking peers by distance and recency", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "discovery.toml")]
    config: PathBuf,

    /// Host the HTTP API binds to
    #[arg(long)]
    host: Option<String>,

    /// HTTP API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer store location
    #[arg(long)]
    db: Option<PathBuf>,

    /// GeoIP2 City database
    #[arg(long)]
    geoip_db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🛰️  Skynet Discovery v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        DiscoveryConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        DiscoveryConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_host(args.host)
        .with_port(args.port)
        .with_db_path(args.db)
        .with_geoip_database(args.geoip_db);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Listen: {}", config.listen_addr());
    info!("   Peer store: {:?}", config.db_path);
    info!("   Max peers per answer: {}", config.max_peers);
    info!("   Sweep interval: {}s", config.sweep_interval_secs);

    let shared_config = Arc::new(config);

    // Open peer store
    let store: Arc<dyn PeerStore> = Arc::new(RocksPeerStore::open(&shared_config.db_path)?);
    info!("📦 Peer store opened at {:?}", shared_config.db_path);

    let resolver = build_resolver(&shared_config);

    let registry = Arc::new(Registry::new(store.clone(), resolver, &shared_config));

    let metrics = Arc::new(Metrics::new());
    let rate_limiter = Arc::new(RwLock::new(RateLimiter::new(
        shared_config.rate_limit_per_minute,
        shared_config.max_violations_before_ban,
        shared_config.ban_duration_secs,
    )));

    let prober = Arc::new(HttpProber::new(
        Duration::from_secs(shared_config.probe_timeout_secs),
        &shared_config.probe_path,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start all services concurrently
    let state = Arc::new(ApiState {
        config: shared_config.clone(),
        registry: registry.clone(),
        metrics: metrics.clone(),
        rate_limiter: rate_limiter.clone(),
    });
    let mut api_handle = tokio::spawn(api::run_api_server(state, shutdown_rx.clone()));

    let sweeper_handle = tokio::spawn(sweeper::run_sweeper(
        shared_config.clone(),
        store.clone(),
        prober,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let maintenance_handle = tokio::spawn(run_maintenance(
        shared_config.clone(),
        registry.clone(),
        rate_limiter.clone(),
        metrics.clone(),
    ));

    let console_handle = if args.no_console {
        None
    } else {
        Some(tokio::spawn(console::run_console(store.clone(), shutdown_rx.clone())))
    };
    let console_exit = async move {
        match console_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    info!("✅ All services started");
    info!("   Press Ctrl+C or type `exit` to shut down");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = console_exit => {
            match result {
                Ok(Ok(true)) => info!("🛑 Exit requested from console"),
                other => error!("Console exited: {:?}", other),
            }
        }
        result = &mut api_handle => {
            error!("HTTP API exited: {:?}", result);
        }
        result = sweeper_handle => {
            error!("Liveness sweeper exited: {:?}", result);
        }
        result = maintenance_handle => {
            error!("Maintenance task exited: {:?}", result);
        }
    }

    let _ = shutdown_tx.send(true);

    // Let in-flight requests finish
    let grace = Duration::from_secs(shared_config.shutdown_grace_secs);
    if !api_handle.is_finished() && tokio::time::timeout(grace, api_handle).await.is_err() {
        warn!("HTTP API did not stop within {}s", shared_config.shutdown_grace_secs);
    }

    // Graceful shutdown: flush store
    store.flush().await?;
    info!("📦 Peer store flushed to disk");

    info!("👋 Skynet Discovery shutting down");
    Ok(())
}

/// Static overrides first, then the GeoIP database when present
fn build_resolver(config: &DiscoveryConfig) -> Arc<dyn GeoResolver> {
    let overrides = StaticGeoResolver::from_overrides(&config.geo_overrides);
    if !overrides.is_empty() {
        info!("🌍 {} static geolocation override(s)", overrides.len());
    }

    let mut resolver = CompositeGeoResolver::new().push(Arc::new(overrides));

    if config.geoip_database.exists() {
        match MaxMindGeoResolver::open(&config.geoip_database) {
            Ok(maxmind) => resolver = resolver.push(Arc::new(maxmind)),
            Err(e) => warn!("Failed to open GeoIP database {:?}: {}", config.geoip_database, e),
        }
    } else {
        warn!(
            "GeoIP database {:?} not found, only static overrides will resolve",
            config.geoip_database
        );
    }

    Arc::new(resolver)
}

/// Periodic maintenance tasks
async fn run_maintenance(
    config: Arc<DiscoveryConfig>,
    registry: Arc<Registry>,
    rate_limiter: Arc<RwLock<RateLimiter>>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.maintenance_interval_secs));

    loop {
        interval.tick().await;

        // Forget idle clients
        {
            let mut limiter = rate_limiter.write().await;
            let removed = limiter.cleanup();
            if removed > 0 {
                info!("🧹 Dropped {} idle rate-limit entries", removed);
            }
        }

        // Log current status periodically
        match registry.stats().await {
            Ok(stats) => {
                metrics.set_peer_counts(stats.total_peers, stats.online_peers);
                info!(
                    "📊 Status: {} known peers, {} online",
                    stats.total_peers, stats.online_peers
                );
            }
            Err(e) => warn!("Could not read peer stats: {}", e),
        }
    }
}
