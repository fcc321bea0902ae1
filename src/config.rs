//! Discovery Server Configuration
//!
//! Built once at startup from an optional TOML file plus command-line
//! overrides, then shared read-only by every component.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::registry::scoring::MAX_PEERS;

/// Main configuration for the discovery server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    // === Network ===

    /// Host the HTTP API binds to
    pub host: String,

    /// Port for the HTTP API
    pub port: u16,

    // === Storage ===

    /// Location of the peer store (RocksDB directory)
    pub db_path: PathBuf,

    // === Geolocation ===

    /// GeoIP2 / GeoLite2 City database
    pub geoip_database: PathBuf,

    // === Ranking ===

    /// Maximum peers returned by a discovery request
    pub max_peers: usize,

    /// Elapsed time after which recency stops mattering (seconds)
    pub recency_horizon_secs: u64,

    /// Include peers marked offline in discovery results
    pub include_offline_peers: bool,

    // === Liveness ===

    /// Interval between liveness sweeps (seconds)
    pub sweep_interval_secs: u64,

    /// Timeout of a single liveness probe (seconds)
    pub probe_timeout_secs: u64,

    /// Probes in flight at once during a sweep
    pub probe_concurrency: usize,

    /// HTTP path probed on every peer
    pub probe_path: String,

    /// Interval for maintenance tasks (seconds)
    pub maintenance_interval_secs: u64,

    // === Security ===

    /// Accepted distance between a signed request timestamp and now (seconds)
    pub max_clock_skew_secs: u64,

    /// Proxies whose `X-Forwarded-For` header is trusted for rate limiting
    pub trusted_proxies: Vec<IpAddr>,

    /// Maximum register/unregister requests per IP per minute
    pub rate_limit_per_minute: u32,

    /// Maximum violations before ban
    pub max_violations_before_ban: u32,

    /// Ban duration for misbehaving IPs (seconds)
    pub ban_duration_secs: u64,

    // === Shutdown ===

    /// Time given to in-flight requests on shutdown (seconds)
    pub shutdown_grace_secs: u64,

    // Kept last: serialized as an array of tables

    /// Fixed coordinates, consulted before the GeoIP database
    pub geo_overrides: Vec<GeoOverride>,
}

/// A fixed IP → coordinate mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoOverride {
    pub ip: IpAddr,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            // Network
            host: "localhost".to_string(),
            port: 8080,

            // Storage
            db_path: PathBuf::from("peers.db"),

            // Geolocation
            geoip_database: PathBuf::from("GeoIP2-City.mmdb"),

            // Ranking
            max_peers: MAX_PEERS,
            recency_horizon_secs: 86_400, // 1 day
            include_offline_peers: false,

            // Liveness
            sweep_interval_secs: 300, // 5 minutes
            probe_timeout_secs: 5,
            probe_concurrency: 16,
            probe_path: "/ping".to_string(),
            maintenance_interval_secs: 60,

            // Security
            max_clock_skew_secs: 300, // 5 minutes
            trusted_proxies: vec![],
            rate_limit_per_minute: 30,
            max_violations_before_ban: 5,
            ban_duration_secs: 3600, // 1 hour

            shutdown_grace_secs: 10,

            geo_overrides: vec![],
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_host(mut self, host: Option<String>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.db_path = path;
        }
        self
    }

    pub fn with_geoip_database(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.geoip_database = path;
        }
        self
    }

    /// Address string the HTTP API binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("host must not be empty");
        }

        if self.max_peers == 0 || self.max_peers > MAX_PEERS {
            anyhow::bail!(
                "max_peers ({}) must be between 1 and {}",
                self.max_peers,
                MAX_PEERS
            );
        }

        if self.recency_horizon_secs == 0 {
            anyhow::bail!("recency_horizon_secs must be greater than 0");
        }

        if self.sweep_interval_secs == 0 || self.maintenance_interval_secs == 0 {
            anyhow::bail!("sweep and maintenance intervals must be greater than 0");
        }

        if self.probe_timeout_secs == 0 || self.probe_timeout_secs >= self.sweep_interval_secs {
            anyhow::bail!(
                "probe_timeout_secs ({}) must be between 1 and sweep_interval_secs ({})",
                self.probe_timeout_secs,
                self.sweep_interval_secs
            );
        }

        if self.max_clock_skew_secs == 0 {
            anyhow::bail!("max_clock_skew_secs must be greater than 0");
        }

        if self.probe_concurrency == 0 {
            anyhow::bail!("probe_concurrency must be greater than 0");
        }

        if !self.probe_path.starts_with('/') {
            anyhow::bail!("probe_path ({}) must start with '/'", self.probe_path);
        }

        for geo in &self.geo_overrides {
            if !(-90.0..=90.0).contains(&geo.latitude) || !(-180.0..=180.0).contains(&geo.longitude) {
                anyhow::bail!("geo override for {} is out of range", geo.ip);
            }
        }

        Ok(())
    }
}
