//! Core types for the discovery registry
//!
//! Peer records as stored by the registry and the request/response bodies of
//! the HTTP API. Keys and signatures travel as hex strings.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Helper module for serializing [u8; 64] arrays
mod sig_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("signature must be 64 bytes"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

/// Helper module for serializing [u8; 32] arrays
mod key_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("public key must be 32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// 32-byte Ed25519 public key, the identity of a peer
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature
pub type Signature = [u8; 64];

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Get current Unix timestamp
pub fn current_timestamp() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Short printable form of a key for log lines
pub fn short_key(key: &PublicKey) -> String {
    hex::encode(&key[..8])
}

// =============================================================================
// PEER RECORD
// =============================================================================

/// A registered peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer identity (Ed25519 public key), primary key of the registry
    #[serde(with = "key_serde")]
    pub public_key: PublicKey,

    /// Optional display name
    pub hostname: Option<String>,

    /// Reachable address
    pub ip_address: IpAddr,

    /// Listening port
    pub port: u16,

    /// Signature presented with the latest registration
    #[serde(with = "sig_serde")]
    pub signature: Signature,

    /// First registration time, never changes
    pub registered_at: Timestamp,

    /// Last registration or successful liveness probe
    pub last_seen_at: Timestamp,

    /// Result of the latest registration or probe
    pub is_online: bool,

    /// Timestamp signed into the latest accepted registration
    pub signed_at: Timestamp,
}

impl Peer {
    /// Endpoint probed by the liveness sweeper
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Seconds elapsed since the peer was last seen
    pub fn seconds_since_seen(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_seen_at)
    }
}

/// Entry of the ranked list returned by `GET /peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    #[serde(with = "key_serde")]
    pub public_key: PublicKey,
    pub hostname: Option<String>,
    pub ip_address: IpAddr,
    pub port: u16,
    pub last_seen_at: Timestamp,
    pub is_online: bool,
    /// Great-circle distance to the requester (km)
    pub distance_km: f64,
}

// =============================================================================
// API REQUESTS
// =============================================================================

/// Body of `POST /peers/register`
///
/// Fields are kept as raw strings/numbers so malformed input is reported as a
/// validation error rather than a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub hostname: Option<String>,
    pub ip: String,
    pub port: i64,
    pub public_key: String,
    /// Unix time at which the client signed the request
    pub timestamp: Timestamp,
    pub signature: String,
}

/// Body of `POST /peers/unregister`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub public_key: String,
    pub timestamp: Timestamp,
    pub signature: String,
}

/// A registration request after validation
#[derive(Debug, Clone)]
pub struct RegistrationClaim {
    pub public_key: PublicKey,
    pub hostname: Option<String>,
    pub ip_address: IpAddr,
    pub port: u16,
    pub timestamp: Timestamp,
    pub signature: Signature,
}

impl RegistrationClaim {
    /// Get the data to be signed (all fields except signature)
    pub fn signing_data(&self) -> Vec<u8> {
        let hostname = self.hostname.as_deref().unwrap_or("");
        let ip = self.ip_address.to_string();

        let mut data = Vec::with_capacity(32 + 4 + hostname.len() + ip.len() + 2 + 8);
        data.extend_from_slice(&self.public_key);
        data.extend_from_slice(&(hostname.len() as u32).to_le_bytes());
        data.extend_from_slice(hostname.as_bytes());
        data.extend_from_slice(ip.as_bytes());
        data.extend_from_slice(&self.port.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data
    }

    /// Build the peer row for a registration happening at `now`
    pub fn into_peer(self, now: Timestamp) -> Peer {
        Peer {
            public_key: self.public_key,
            hostname: self.hostname,
            ip_address: self.ip_address,
            port: self.port,
            signature: self.signature,
            registered_at: now,
            last_seen_at: now,
            is_online: true,
            signed_at: self.timestamp,
        }
    }
}

/// An unregistration request after validation
#[derive(Debug, Clone)]
pub struct UnregistrationClaim {
    pub public_key: PublicKey,
    pub timestamp: Timestamp,
    pub signature: Signature,
}

impl UnregistrationClaim {
    pub fn signing_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 8);
        data.extend_from_slice(&self.public_key);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data
    }
}
