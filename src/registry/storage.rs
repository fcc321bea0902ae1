//! Peer Store (RocksDB)
//!
//! Persistent storage for peer records, keyed by public key.
//! Every operation runs under one lock, so each call is atomic on its own;
//! nothing spans calls.

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{short_key, Peer, PublicKey, Timestamp};

/// Key prefix for peer rows
const PREFIX_PEER: &[u8] = b"peer:";

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open peer store: {0}")]
    OpenFailed(String),

    #[error("peer store read failed: {0}")]
    ReadFailed(String),

    #[error("peer store write failed: {0}")]
    WriteFailed(String),

    #[error("peer row could not be encoded: {0}")]
    Serialization(String),
}

/// Result of an upsert
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// Row as stored after the call
    pub peer: Peer,

    /// True if the key was not known before
    pub created: bool,
}

/// Key-indexed table of peers
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Insert a peer, or update the mutable fields of an existing one.
    ///
    /// An existing row keeps its `registered_at`, and its `last_seen_at`
    /// never moves backwards.
    async fn upsert_by_key(&self, peer: Peer) -> Result<UpsertOutcome, StoreError>;

    /// Most recently seen peer registered at `ip`
    async fn find_by_address(&self, ip: IpAddr) -> Result<Option<Peer>, StoreError>;

    async fn find_by_key(&self, key: &PublicKey) -> Result<Option<Peer>, StoreError>;

    /// Every known peer, ordered by key
    async fn all(&self) -> Result<Vec<Peer>, StoreError>;

    /// Update liveness. Returns false if the key is unknown.
    async fn set_online(
        &self,
        key: &PublicKey,
        online: bool,
        last_seen_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Delete a peer. Returns false if the key is unknown.
    async fn remove_by_key(&self, key: &PublicKey) -> Result<bool, StoreError>;

    /// Flush buffered writes to disk
    async fn flush(&self) -> Result<(), StoreError>;
}

/// Merge an incoming registration into an existing row
fn merge(existing: &Peer, incoming: Peer) -> Peer {
    Peer {
        registered_at: existing.registered_at,
        last_seen_at: existing.last_seen_at.max(incoming.last_seen_at),
        ..incoming
    }
}

/// Peer store backed by RocksDB, with an in-memory index
pub struct RocksPeerStore {
    /// RocksDB instance
    db: DB,

    /// Index of every stored row
    cache: RwLock<BTreeMap<PublicKey, Peer>>,
}

impl RocksPeerStore {
    /// Open or create a peer store at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;

        // Load existing peers into the index
        let mut cache = BTreeMap::new();
        let iter = db.iterator(IteratorMode::From(PREFIX_PEER, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;

            if !key.starts_with(PREFIX_PEER) {
                break;
            }

            match bincode::deserialize::<Peer>(&value) {
                Ok(peer) => {
                    cache.insert(peer.public_key, peer);
                }
                Err(e) => warn!("Skipping unreadable peer row: {}", e),
            }
        }

        info!("📦 Loaded {} peers from {:?}", cache.len(), path);

        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    /// Number of stored peers
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    fn persist(&self, peer: &Peer) -> Result<(), StoreError> {
        let value =
            bincode::serialize(peer).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.db
            .put(peer_key(&peer.public_key), value)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))
    }
}

#[async_trait]
impl PeerStore for RocksPeerStore {
    async fn upsert_by_key(&self, peer: Peer) -> Result<UpsertOutcome, StoreError> {
        let mut cache = self.cache.write().await;

        let (stored, created) = match cache.get(&peer.public_key) {
            Some(existing) => (merge(existing, peer), false),
            None => (peer, true),
        };

        // Disk first: a failed write leaves the index untouched
        self.persist(&stored)?;
        cache.insert(stored.public_key, stored.clone());

        debug!(
            "Stored peer {} at {} (created={})",
            short_key(&stored.public_key),
            stored.socket_addr(),
            created
        );

        Ok(UpsertOutcome {
            peer: stored,
            created,
        })
    }

    async fn find_by_address(&self, ip: IpAddr) -> Result<Option<Peer>, StoreError> {
        let cache = self.cache.read().await;
        let ip = ip.to_canonical();

        // `max_by_key` returns the last maximum; walk keys in reverse so ties
        // resolve to the lowest key
        Ok(cache
            .values()
            .rev()
            .filter(|p| p.ip_address.to_canonical() == ip)
            .max_by_key(|p| p.last_seen_at)
            .cloned())
    }

    async fn find_by_key(&self, key: &PublicKey) -> Result<Option<Peer>, StoreError> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn all(&self) -> Result<Vec<Peer>, StoreError> {
        Ok(self.cache.read().await.values().cloned().collect())
    }

    async fn set_online(
        &self,
        key: &PublicKey,
        online: bool,
        last_seen_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut cache = self.cache.write().await;

        let Some(existing) = cache.get(key) else {
            return Ok(false);
        };

        let updated = Peer {
            is_online: online,
            last_seen_at: existing.last_seen_at.max(last_seen_at),
            ..existing.clone()
        };

        if &updated == existing {
            return Ok(true);
        }

        self.persist(&updated)?;
        cache.insert(*key, updated);
        Ok(true)
    }

    async fn remove_by_key(&self, key: &PublicKey) -> Result<bool, StoreError> {
        let mut cache = self.cache.write().await;

        if !cache.contains_key(key) {
            return Ok(false);
        }

        self.db
            .delete(peer_key(key))
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        cache.remove(key);

        debug!("Removed peer {}", short_key(key));
        Ok(true)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::WriteFailed(e.to_string()))
    }
}

/// Create storage key for a peer
fn peer_key(key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_PEER.len() + 32);
    out.extend_from_slice(PREFIX_PEER);
    out.extend_from_slice(key);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_peer(id: u8, last_seen_at: Timestamp) -> Peer {
        let mut public_key = [0u8; 32];
        public_key[0] = id;

        Peer {
            public_key,
            hostname: Some(format!("node-{}", id)),
            ip_address: format!("192.168.1.{}", id).parse().unwrap(),
            port: 30333,
            signature: [id; 64],
            registered_at: last_seen_at,
            last_seen_at,
            is_online: true,
            signed_at: last_seen_at,
        }
    }

    #[tokio::test]
    async fn test_store_open() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();
        assert_eq!(store.len().await, 0);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_get_peer() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();

        let peer = create_test_peer(1, 1000);
        let outcome = store.upsert_by_key(peer.clone()).await.unwrap();

        assert!(outcome.created);
        assert_eq!(store.find_by_key(&peer.public_key).await.unwrap(), Some(peer.clone()));
        assert_eq!(
            store.find_by_address(peer.ip_address).await.unwrap(),
            Some(peer)
        );
    }

    #[tokio::test]
    async fn test_upsert_keeps_registration_time() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();

        store.upsert_by_key(create_test_peer(1, 1000)).await.unwrap();

        let mut moved = create_test_peer(1, 2000);
        moved.ip_address = "10.0.0.9".parse().unwrap();
        moved.port = 4000;
        let outcome = store.upsert_by_key(moved).await.unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.peer.registered_at, 1000);
        assert_eq!(outcome.peer.last_seen_at, 2000);
        assert_eq!(outcome.peer.port, 4000);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_back() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();
        let peer = create_test_peer(1, 2000);
        let key = peer.public_key;

        store.upsert_by_key(peer).await.unwrap();
        let outcome = store.upsert_by_key(create_test_peer(1, 1500)).await.unwrap();
        assert_eq!(outcome.peer.last_seen_at, 2000);

        store.set_online(&key, false, 1000).await.unwrap();
        let stored = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(stored.last_seen_at, 2000);
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn test_set_online_unknown_key() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();
        assert!(!store.set_online(&[9u8; 32], false, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_address_prefers_recent() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();

        let shared_ip: IpAddr = "203.0.113.5".parse().unwrap();
        let mut older = create_test_peer(1, 1000);
        older.ip_address = shared_ip;
        let mut newer = create_test_peer(2, 5000);
        newer.ip_address = shared_ip;
        let mut tied = create_test_peer(3, 5000);
        tied.ip_address = shared_ip;

        store.upsert_by_key(older).await.unwrap();
        store.upsert_by_key(tied).await.unwrap();
        store.upsert_by_key(newer.clone()).await.unwrap();

        // Most recent wins, lowest key on ties
        let found = store.find_by_address(shared_ip).await.unwrap().unwrap();
        assert_eq!(found.public_key, newer.public_key);
    }

    #[tokio::test]
    async fn test_find_by_address_ignores_v4_mapping() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();

        let plain = create_test_peer(1, 1000);
        let mut mapped = create_test_peer(2, 1000);
        mapped.ip_address = "::ffff:10.1.1.1".parse().unwrap();
        store.upsert_by_key(plain.clone()).await.unwrap();
        store.upsert_by_key(mapped.clone()).await.unwrap();

        // Dual-stack listener reports IPv4 callers as mapped addresses
        let caller: IpAddr = "::ffff:192.168.1.1".parse().unwrap();
        let found = store.find_by_address(caller).await.unwrap().unwrap();
        assert_eq!(found.public_key, plain.public_key);

        // And a peer registered with a mapped address matches the plain form
        let found = store
            .find_by_address("10.1.1.1".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.public_key, mapped.public_key);
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();
        let peer = create_test_peer(1, 1000);

        store.upsert_by_key(peer.clone()).await.unwrap();
        assert!(store.remove_by_key(&peer.public_key).await.unwrap());
        assert!(!store.remove_by_key(&peer.public_key).await.unwrap());
        assert!(store.find_by_key(&peer.public_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_is_ordered_by_key() {
        let dir = tempdir().unwrap();
        let store = RocksPeerStore::open(dir.path()).unwrap();

        for id in [5u8, 1, 3] {
            store.upsert_by_key(create_test_peer(id, 1000)).await.unwrap();
        }

        let ids: Vec<u8> = store.all().await.unwrap().iter().map(|p| p.public_key[0]).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempdir().unwrap();

        // Add peer and close
        {
            let store = RocksPeerStore::open(dir.path()).unwrap();
            store.upsert_by_key(create_test_peer(1, 1000)).await.unwrap();
            store.upsert_by_key(create_test_peer(2, 1000)).await.unwrap();
            store.set_online(&create_test_peer(2, 0).public_key, false, 1000).await.unwrap();
            store.flush().await.unwrap();
        }

        // Reopen and verify
        {
            let store = RocksPeerStore::open(dir.path()).unwrap();
            assert_eq!(store.len().await, 2);
            let offline = store.find_by_key(&create_test_peer(2, 0).public_key).await.unwrap().unwrap();
            assert!(!offline.is_online);
        }
    }
}
