//! Liveness Sweeper
//!
//! Periodically probes every known peer and records who answered.
//! A failed probe marks the peer offline; a successful one marks it online
//! and refreshes `last_seen_at`. Rows are never deleted here.

mod probe;

pub use probe::{HttpProber, PeerProber, ProbeError};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::Metrics;
use crate::config::DiscoveryConfig;
use crate::registry::{PeerStore, StoreError};
use crate::types::{current_timestamp, short_key, Peer};

/// Outcome of one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Peers probed
    pub probed: usize,

    /// Peers that answered
    pub online: usize,

    /// Peers that failed their probe
    pub marked_offline: usize,

    /// Status updates the store rejected
    pub write_failures: usize,

    /// Peers unregistered while their probe was in flight
    pub vanished: usize,
}

enum ProbeOutcome {
    Online,
    Offline,
    WriteFailed,
    Vanished,
}

/// Run one sweep over every stored peer.
///
/// Fails only when the peer list cannot be read; per-peer probe or write
/// failures are counted in the report.
pub async fn sweep_once(
    store: &dyn PeerStore,
    prober: &dyn PeerProber,
    concurrency: usize,
) -> Result<SweepReport, StoreError> {
    let peers = store.all().await?;

    let probes: Vec<_> = peers
        .iter()
        .map(|peer| probe_and_record(store, prober, peer))
        .collect();
    let outcomes: Vec<ProbeOutcome> = stream::iter(probes)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = SweepReport {
        probed: peers.len(),
        ..SweepReport::default()
    };
    for outcome in outcomes {
        match outcome {
            ProbeOutcome::Online => report.online += 1,
            ProbeOutcome::Offline => report.marked_offline += 1,
            ProbeOutcome::WriteFailed => report.write_failures += 1,
            ProbeOutcome::Vanished => report.vanished += 1,
        }
    }

    Ok(report)
}

async fn probe_and_record(store: &dyn PeerStore, prober: &dyn PeerProber, peer: &Peer) -> ProbeOutcome {
    let (online, last_seen_at) = match prober.probe(peer).await {
        Ok(()) => (true, current_timestamp()),
        Err(e) => {
            debug!(
                "Probe of {} at {} failed: {}",
                short_key(&peer.public_key),
                peer.socket_addr(),
                e
            );
            (false, peer.last_seen_at)
        }
    };

    match store.set_online(&peer.public_key, online, last_seen_at).await {
        Ok(false) => {
            debug!("Peer {} left during the sweep", short_key(&peer.public_key));
            ProbeOutcome::Vanished
        }
        Ok(true) if online => ProbeOutcome::Online,
        Ok(true) => {
            if peer.is_online {
                info!("📴 Peer {} went offline", short_key(&peer.public_key));
            }
            ProbeOutcome::Offline
        }
        Err(e) => {
            warn!(
                "Failed to record status of {}: {}",
                short_key(&peer.public_key),
                e
            );
            ProbeOutcome::WriteFailed
        }
    }
}

/// Sweep on a fixed interval until shutdown is signalled
pub async fn run_sweeper(
    config: Arc<DiscoveryConfig>,
    store: Arc<dyn PeerStore>,
    prober: Arc<dyn PeerProber>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        "🔍 Liveness sweeper started (every {}s, probe timeout {}s)",
        config.sweep_interval_secs, config.probe_timeout_secs
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        match sweep_once(store.as_ref(), prober.as_ref(), config.probe_concurrency).await {
            Ok(report) => {
                metrics.record_sweep(&report);
                info!(
                    "🔍 Sweep done: {} probed, {} online, {} offline, {} gone, {} write failures",
                    report.probed,
                    report.online,
                    report.marked_offline,
                    report.vanished,
                    report.write_failures
                );
            }
            Err(e) => {
                metrics.inc_sweeps_skipped();
                warn!("Skipping sweep, peer store unavailable: {}", e);
            }
        }
    }

    info!("🔍 Liveness sweeper stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RocksPeerStore, UpsertOutcome};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::net::IpAddr;
    use std::sync::Mutex;

    /// Prober answering from a fixed set of reachable keys
    struct ScriptedProber {
        reachable: Mutex<HashSet<u8>>,
    }

    impl ScriptedProber {
        fn new(reachable: &[u8]) -> Self {
            Self {
                reachable: Mutex::new(reachable.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl PeerProber for ScriptedProber {
        async fn probe(&self, peer: &Peer) -> Result<(), ProbeError> {
            if self.reachable.lock().unwrap().contains(&peer.public_key[0]) {
                Ok(())
            } else {
                Err(ProbeError::Unreachable("connection refused".to_string()))
            }
        }
    }

    /// Store whose reads always fail
    struct BrokenStore;

    #[async_trait]
    impl PeerStore for BrokenStore {
        async fn upsert_by_key(&self, _: Peer) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::WriteFailed("disk gone".to_string()))
        }
        async fn find_by_address(&self, _: IpAddr) -> Result<Option<Peer>, StoreError> {
            Err(StoreError::ReadFailed("disk gone".to_string()))
        }
        async fn find_by_key(&self, _: &[u8; 32]) -> Result<Option<Peer>, StoreError> {
            Err(StoreError::ReadFailed("disk gone".to_string()))
        }
        async fn all(&self) -> Result<Vec<Peer>, StoreError> {
            Err(StoreError::ReadFailed("disk gone".to_string()))
        }
        async fn set_online(&self, _: &[u8; 32], _: bool, _: u64) -> Result<bool, StoreError> {
            Err(StoreError::WriteFailed("disk gone".to_string()))
        }
        async fn remove_by_key(&self, _: &[u8; 32]) -> Result<bool, StoreError> {
            Err(StoreError::WriteFailed("disk gone".to_string()))
        }
        async fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn create_test_peer(id: u8, last_seen_at: u64) -> Peer {
        let mut public_key = [0u8; 32];
        public_key[0] = id;
        Peer {
            public_key,
            hostname: None,
            ip_address: format!("10.0.0.{}", id).parse().unwrap(),
            port: 30333,
            signature: [0u8; 64],
            registered_at: last_seen_at,
            last_seen_at,
            is_online: true,
            signed_at: last_seen_at,
        }
    }

    async fn seeded_store(dir: &std::path::Path, ids: &[u8]) -> RocksPeerStore {
        let store = RocksPeerStore::open(dir).unwrap();
        for id in ids {
            store.upsert_by_key(create_test_peer(*id, 1000)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_sweep_marks_unreachable_offline() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[1, 2, 3]).await;
        let prober = ScriptedProber::new(&[1, 3]);

        let report = sweep_once(&store, &prober, 4).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                probed: 3,
                online: 2,
                marked_offline: 1,
                write_failures: 0,
                vanished: 0,
            }
        );

        let down = store.find_by_key(&create_test_peer(2, 0).public_key).await.unwrap().unwrap();
        assert!(!down.is_online);
        assert_eq!(down.last_seen_at, 1000);

        let up = store.find_by_key(&create_test_peer(1, 0).public_key).await.unwrap().unwrap();
        assert!(up.is_online);
        assert!(up.last_seen_at > 1000);
    }

    #[tokio::test]
    async fn test_second_failed_probe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[1]).await;
        let prober = ScriptedProber::new(&[]);
        let key = create_test_peer(1, 0).public_key;

        sweep_once(&store, &prober, 1).await.unwrap();
        let after_first = store.find_by_key(&key).await.unwrap().unwrap();

        sweep_once(&store, &prober, 1).await.unwrap();
        let after_second = store.find_by_key(&key).await.unwrap().unwrap();

        assert!(!after_first.is_online);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_successful_probe_brings_peer_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[1]).await;
        let key = create_test_peer(1, 0).public_key;

        sweep_once(&store, &ScriptedProber::new(&[]), 1).await.unwrap();
        assert!(!store.find_by_key(&key).await.unwrap().unwrap().is_online);

        sweep_once(&store, &ScriptedProber::new(&[1]), 1).await.unwrap();
        assert!(store.find_by_key(&key).await.unwrap().unwrap().is_online);
    }

    /// Prober that unregisters the peer before answering
    struct LeavingProber {
        store: Arc<RocksPeerStore>,
    }

    #[async_trait]
    impl PeerProber for LeavingProber {
        async fn probe(&self, peer: &Peer) -> Result<(), ProbeError> {
            self.store.remove_by_key(&peer.public_key).await.unwrap();
            Err(ProbeError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_peer_removed_mid_sweep_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(seeded_store(dir.path(), &[1, 2]).await);
        let prober = LeavingProber {
            store: store.clone(),
        };

        let report = sweep_once(store.as_ref(), &prober, 1).await.unwrap();

        assert_eq!(report.probed, 2);
        assert_eq!(report.vanished, 2);
        assert_eq!(report.online, 0);
        assert_eq!(report.marked_offline, 0);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[1, 2, 3, 4]).await;

        sweep_once(&store, &ScriptedProber::new(&[]), 2).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_store_skips_cycle() {
        let result = sweep_once(&BrokenStore, &ScriptedProber::new(&[]), 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_sweeper_stops_on_shutdown() {
        let mut config = DiscoveryConfig::default();
        config.sweep_interval_secs = 3600;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_sweeper(
            Arc::new(config),
            Arc::new(BrokenStore),
            Arc::new(ScriptedProber::new(&[])),
            Arc::new(Metrics::new()),
            rx,
        ));

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
