//! Metrics Collection
//!
//! Counters and gauges for monitoring the discovery server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::sweeper::SweepReport;

/// Metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Registrations stored
    pub registrations_accepted: AtomicU64,

    /// Registrations refused (validation, signature or store errors)
    pub registrations_rejected: AtomicU64,

    /// Peers removed by unregister
    pub unregistrations: AtomicU64,

    /// Discovery requests served
    pub list_requests: AtomicU64,

    /// Peers handed out by discovery requests
    pub peers_returned: AtomicU64,

    /// Rate-limited requests
    pub rate_limited_requests: AtomicU64,

    /// Sweeps that ran to completion
    pub sweeps_completed: AtomicU64,

    /// Sweeps skipped because the store was unavailable
    pub sweeps_skipped: AtomicU64,

    /// Probes that failed
    pub probes_failed: AtomicU64,

    /// Peers in the store
    pub known_peers: AtomicU64,

    /// Peers currently online
    pub online_peers: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_registrations_accepted(&self) {
        self.registrations_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_registrations_rejected(&self) {
        self.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unregistrations(&self) {
        self.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a discovery request and the size of its answer
    pub fn record_list(&self, returned: usize) {
        self.list_requests.fetch_add(1, Ordering::Relaxed);
        self.peers_returned.fetch_add(returned as u64, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, report: &SweepReport) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        self.probes_failed
            .fetch_add(report.marked_offline as u64, Ordering::Relaxed);
    }

    pub fn inc_sweeps_skipped(&self) {
        self.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Update peer gauges
    pub fn set_peer_counts(&self, known: usize, online: usize) {
        self.known_peers.store(known as u64, Ordering::Relaxed);
        self.online_peers.store(online as u64, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let entries: [(&str, &str, &str, u64); 12] = [
            ("uptime_seconds", "gauge", "Uptime in seconds", self.uptime_secs()),
            ("registrations_accepted", "counter", "Registrations stored", load(&self.registrations_accepted)),
            ("registrations_rejected", "counter", "Registrations refused", load(&self.registrations_rejected)),
            ("unregistrations", "counter", "Peers removed by unregister", load(&self.unregistrations)),
            ("list_requests", "counter", "Discovery requests served", load(&self.list_requests)),
            ("peers_returned", "counter", "Peers handed out by discovery requests", load(&self.peers_returned)),
            ("rate_limited", "counter", "Rate-limited requests", load(&self.rate_limited_requests)),
            ("sweeps_completed", "counter", "Liveness sweeps completed", load(&self.sweeps_completed)),
            ("sweeps_skipped", "counter", "Liveness sweeps skipped", load(&self.sweeps_skipped)),
            ("probes_failed", "counter", "Failed liveness probes", load(&self.probes_failed)),
            ("known_peers", "gauge", "Peers in the registry", load(&self.known_peers)),
            ("online_peers", "gauge", "Peers currently online", load(&self.online_peers)),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in entries {
            output.push_str(&format!(
                "# HELP skynet_discovery_{name} {help}\n\
                 # TYPE skynet_discovery_{name} {kind}\n\
                 skynet_discovery_{name} {value}\n\n"
            ));
        }
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "registrations": {
                "accepted": load(&self.registrations_accepted),
                "rejected": load(&self.registrations_rejected),
                "unregistered": load(&self.unregistrations),
            },
            "discovery": {
                "requests": load(&self.list_requests),
                "peers_returned": load(&self.peers_returned),
            },
            "rate_limited": load(&self.rate_limited_requests),
            "liveness": {
                "sweeps_completed": load(&self.sweeps_completed),
                "sweeps_skipped": load(&self.sweeps_skipped),
                "probes_failed": load(&self.probes_failed),
            },
            "peers": {
                "known": load(&self.known_peers),
                "online": load(&self.online_peers),
            },
        })
    }
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
