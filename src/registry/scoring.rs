//! Peer Ranking
//!
//! Orders candidate peers for a requester by a weighted score of
//! geographic distance and recency. Lower scores rank first.
//!
//! Both terms are scaled to `[0, 1]` before weighting:
//! - distance: kilometres divided by the largest possible distance
//! - recency: seconds since last seen, capped at a horizon, divided by it

use futures::future::join_all;
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::geo::{distance, GeoResolver, MAX_DISTANCE_KM};
use crate::types::{short_key, Peer, PeerSummary, Timestamp};

/// Maximum peers returned by a single discovery request
pub const MAX_PEERS: usize = 100;

/// Weight of the distance term
pub const DISTANCE_WEIGHT: f64 = 0.6;

/// Weight of the recency term
pub const LAST_SEEN_WEIGHT: f64 = 0.4;

/// Ranking parameters
#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    /// Output bound, never above `MAX_PEERS`
    pub max_peers: usize,

    /// Elapsed seconds at which the recency term saturates
    pub recency_horizon_secs: u64,
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            max_peers: MAX_PEERS,
            recency_horizon_secs: 86_400,
        }
    }
}

/// A candidate with its computed score
#[derive(Debug, Clone)]
pub struct RankedPeer {
    pub peer: Peer,
    pub distance_km: f64,
    pub score: f64,
}

impl RankedPeer {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            public_key: self.peer.public_key,
            hostname: self.peer.hostname.clone(),
            ip_address: self.peer.ip_address,
            port: self.peer.port,
            last_seen_at: self.peer.last_seen_at,
            is_online: self.peer.is_online,
            distance_km: self.distance_km,
        }
    }
}

/// Scale a distance to `[0, 1]`
pub fn normalized_distance(distance_km: f64) -> f64 {
    (distance_km / MAX_DISTANCE_KM).clamp(0.0, 1.0)
}

/// Scale time since last seen to `[0, 1]`
pub fn normalized_recency(peer: &Peer, now: Timestamp, horizon_secs: u64) -> f64 {
    let horizon = horizon_secs.max(1);
    peer.seconds_since_seen(now).min(horizon) as f64 / horizon as f64
}

/// Composite score, lower is better
pub fn score(distance_km: f64, peer: &Peer, now: Timestamp, horizon_secs: u64) -> f64 {
    DISTANCE_WEIGHT * normalized_distance(distance_km)
        + LAST_SEEN_WEIGHT * normalized_recency(peer, now, horizon_secs)
}

/// Rank `candidates` for `requester`.
///
/// The requester is never part of the output, candidates whose location
/// cannot be resolved are dropped, and the result holds at most
/// `params.max_peers` (and never more than `MAX_PEERS`) entries.
pub async fn rank(
    requester: &Peer,
    candidates: Vec<Peer>,
    resolver: &dyn GeoResolver,
    params: &RankingParams,
    now: Timestamp,
) -> Vec<RankedPeer> {
    let limit = params.max_peers.min(MAX_PEERS);

    let candidates: Vec<Peer> = candidates
        .into_iter()
        .filter(|p| p.public_key != requester.public_key)
        .collect();

    if candidates.is_empty() || limit == 0 {
        return Vec::new();
    }

    let origin = match resolver.resolve(requester.ip_address).await {
        Ok(c) => c,
        Err(e) => {
            warn!(
                "Cannot locate requester {}: {}",
                short_key(&requester.public_key),
                e
            );
            return Vec::new();
        }
    };

    let locations = join_all(candidates.iter().map(|p| resolver.resolve(p.ip_address))).await;

    let mut ranked: Vec<RankedPeer> = candidates
        .into_iter()
        .zip(locations)
        .filter_map(|(peer, location)| match location {
            Ok(coordinate) => {
                let distance_km = distance(origin, coordinate);
                let score = score(distance_km, &peer, now, params.recency_horizon_secs);
                Some(RankedPeer {
                    peer,
                    distance_km,
                    score,
                })
            }
            Err(e) => {
                debug!("Excluding peer {}: {}", short_key(&peer.public_key), e);
                None
            }
        })
        .collect();

    ranked.sort_by(compare);
    ranked.truncate(limit);
    ranked
}

/// Ascending score, ties by public key
fn compare(a: &RankedPeer, b: &RankedPeer) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.peer.public_key.cmp(&b.peer.public_key))
}
