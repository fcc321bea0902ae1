//! Peer Registry Module
//!
//! Composes the peer store, the geolocation resolver and the ranking engine
//! into the four registry operations: register, unregister, get and list.

pub mod scoring;
mod storage;

pub use storage::{PeerStore, RocksPeerStore, StoreError, UpsertOutcome};

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::crypto::{self, SignatureError};
use crate::geo::GeoResolver;
use crate::types::{
    current_timestamp, short_key, Peer, PublicKey, RegisterRequest, RegistrationClaim,
    Timestamp, UnregisterRequest, UnregistrationClaim,
};
use scoring::{RankedPeer, RankingParams};

/// Longest accepted hostname (DNS limit)
const MAX_HOSTNAME_LEN: usize = 253;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(SignatureError),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl From<SignatureError> for RegistryError {
    fn from(e: SignatureError) -> Self {
        if e.is_malformed() {
            RegistryError::Validation(e.to_string())
        } else {
            RegistryError::Auth(e)
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total peers in the store
    pub total_peers: usize,

    /// Peers whose latest probe or registration succeeded
    pub online_peers: usize,
}

/// The peer registry
pub struct Registry {
    store: Arc<dyn PeerStore>,
    resolver: Arc<dyn GeoResolver>,
    ranking: RankingParams,
    include_offline: bool,
    max_clock_skew_secs: u64,
}

impl Registry {
    pub fn new(
        store: Arc<dyn PeerStore>,
        resolver: Arc<dyn GeoResolver>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            ranking: RankingParams {
                max_peers: config.max_peers,
                recency_horizon_secs: config.recency_horizon_secs,
            },
            include_offline: config.include_offline_peers,
            max_clock_skew_secs: config.max_clock_skew_secs,
        }
    }

    /// Reject signed timestamps outside the accepted clock skew
    fn check_freshness(&self, timestamp: Timestamp, now: Timestamp) -> Result<(), RegistryError> {
        if timestamp.abs_diff(now) > self.max_clock_skew_secs {
            return Err(RegistryError::Validation(format!(
                "request timestamp {} is more than {}s away from server time {}",
                timestamp, self.max_clock_skew_secs, now
            )));
        }
        Ok(())
    }

    /// Register (or re-register) a peer
    pub async fn register(&self, request: RegisterRequest) -> Result<UpsertOutcome, RegistryError> {
        self.register_at(request, current_timestamp()).await
    }

    pub async fn register_at(
        &self,
        request: RegisterRequest,
        now: Timestamp,
    ) -> Result<UpsertOutcome, RegistryError> {
        let claim = validate_registration(request)?;
        self.check_freshness(claim.timestamp, now)?;
        crypto::verify_registration(&claim)?;

        // Older than what we already accepted: a replayed request
        if let Some(existing) = self.store.find_by_key(&claim.public_key).await? {
            if claim.timestamp < existing.signed_at {
                return Err(RegistryError::Validation(format!(
                    "registration signed at {} predates the current one ({})",
                    claim.timestamp, existing.signed_at
                )));
            }
        }

        let outcome = self.store.upsert_by_key(claim.into_peer(now)).await?;

        if outcome.created {
            info!(
                "🆕 Registered peer {} at {}",
                short_key(&outcome.peer.public_key),
                outcome.peer.socket_addr()
            );
        } else {
            debug!(
                "Re-registered peer {} at {}",
                short_key(&outcome.peer.public_key),
                outcome.peer.socket_addr()
            );
        }

        Ok(outcome)
    }

    /// Remove a peer after checking it signed the request
    pub async fn unregister(&self, request: UnregisterRequest) -> Result<Peer, RegistryError> {
        self.unregister_at(request, current_timestamp()).await
    }

    pub async fn unregister_at(
        &self,
        request: UnregisterRequest,
        now: Timestamp,
    ) -> Result<Peer, RegistryError> {
        let claim = UnregistrationClaim {
            public_key: crypto::parse_public_key(&request.public_key)?,
            timestamp: request.timestamp,
            signature: crypto::parse_signature(&request.signature)?,
        };
        self.check_freshness(claim.timestamp, now)?;
        crypto::verify_unregistration(&claim)?;

        let peer = self
            .store
            .find_by_key(&claim.public_key)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("peer {}", request.public_key)))?;

        // Must be signed after the registration it removes
        if claim.timestamp <= peer.signed_at {
            return Err(RegistryError::Validation(format!(
                "unregistration signed at {} does not follow the registration signed at {}",
                claim.timestamp, peer.signed_at
            )));
        }

        // A concurrent unregister may have won the race
        if !self.store.remove_by_key(&claim.public_key).await? {
            return Err(RegistryError::NotFound(format!("peer {}", request.public_key)));
        }

        info!("👋 Unregistered peer {}", short_key(&claim.public_key));
        Ok(peer)
    }

    pub async fn get_peer(&self, public_key: &PublicKey) -> Result<Peer, RegistryError> {
        self.store
            .find_by_key(public_key)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("peer {}", hex::encode(public_key))))
    }

    /// Ranked peers for the registered peer at `requester_ip`
    pub async fn list_peers(&self, requester_ip: IpAddr) -> Result<Vec<RankedPeer>, RegistryError> {
        self.list_peers_at(requester_ip, current_timestamp()).await
    }

    pub async fn list_peers_at(
        &self,
        requester_ip: IpAddr,
        now: Timestamp,
    ) -> Result<Vec<RankedPeer>, RegistryError> {
        let requester = self
            .store
            .find_by_address(requester_ip)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("requester {}", requester_ip)))?;

        let candidates: Vec<Peer> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|p| self.include_offline || p.is_online)
            .collect();

        let ranked = scoring::rank(
            &requester,
            candidates,
            self.resolver.as_ref(),
            &self.ranking,
            now,
        )
        .await;

        debug!(
            "Ranked {} peers for {}",
            ranked.len(),
            short_key(&requester.public_key)
        );

        Ok(ranked)
    }

    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let peers = self.store.all().await?;
        Ok(RegistryStats {
            total_peers: peers.len(),
            online_peers: peers.iter().filter(|p| p.is_online).count(),
        })
    }
}

/// Check the shape of a registration request
fn validate_registration(request: RegisterRequest) -> Result<RegistrationClaim, RegistryError> {
    let public_key = crypto::parse_public_key(&request.public_key)?;
    let signature = crypto::parse_signature(&request.signature)?;

    let ip_address: IpAddr = request
        .ip
        .trim()
        .parse()
        .map_err(|_| RegistryError::Validation(format!("invalid ip address: {:?}", request.ip)))?;

    if ip_address.is_unspecified() {
        return Err(RegistryError::Validation(format!(
            "ip address {} is not reachable",
            ip_address
        )));
    }

    let port = u16::try_from(request.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| RegistryError::Validation(format!("invalid port: {}", request.port)))?;

    // Not trimmed: the hostname is part of the signed payload
    let hostname = match request.hostname {
        Some(h) if h.is_empty() => None,
        Some(h) if h.len() > MAX_HOSTNAME_LEN => {
            return Err(RegistryError::Validation(format!(
                "hostname longer than {} characters",
                MAX_HOSTNAME_LEN
            )));
        }
        other => other,
    };

    Ok(RegistrationClaim {
        public_key,
        hostname,
        ip_address,
        port,
        timestamp: request.timestamp,
        signature,
    })
}
