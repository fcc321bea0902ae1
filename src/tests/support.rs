// Shared fixtures for scenario tests

use ed25519_dalek::SigningKey;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::DiscoveryConfig;
use crate::crypto::{generate_keypair, keypair_to_public_key, sign_registration, sign_unregistration};
use crate::geo::{Coordinate, StaticGeoResolver};
use crate::registry::{Registry, RocksPeerStore};
use crate::types::{
    PublicKey, RegisterRequest, RegistrationClaim, Timestamp, UnregisterRequest,
    UnregistrationClaim,
};

pub const PARIS: Coordinate = Coordinate { latitude: 48.8566, longitude: 2.3522 };
pub const LONDON: Coordinate = Coordinate { latitude: 51.5074, longitude: -0.1278 };
pub const NEW_YORK: Coordinate = Coordinate { latitude: 40.7128, longitude: -74.0060 };

/// A peer with its own signing key
pub struct TestNode {
    pub keypair: SigningKey,
    pub ip: IpAddr,
    pub port: u16,
    pub hostname: Option<String>,
}

impl TestNode {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            keypair: generate_keypair(),
            ip: ip.parse().unwrap(),
            port,
            hostname: None,
        }
    }

    pub fn named(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub fn public_key(&self) -> PublicKey {
        keypair_to_public_key(&self.keypair)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Registration signed at `timestamp`
    pub fn register_request(&self, timestamp: Timestamp) -> RegisterRequest {
        let mut claim = RegistrationClaim {
            public_key: self.public_key(),
            hostname: self.hostname.clone(),
            ip_address: self.ip,
            port: self.port,
            timestamp,
            signature: [0u8; 64],
        };
        claim.signature = sign_registration(&self.keypair, &claim);

        RegisterRequest {
            hostname: self.hostname.clone(),
            ip: self.ip.to_string(),
            port: i64::from(self.port),
            public_key: self.public_key_hex(),
            timestamp,
            signature: hex::encode(claim.signature),
        }
    }

    pub fn unregister_request(&self, timestamp: Timestamp) -> UnregisterRequest {
        self.unregister_request_signed_by(&self.keypair, timestamp)
    }

    /// Unregister request for this node's key, signed with `signer`
    pub fn unregister_request_signed_by(
        &self,
        signer: &SigningKey,
        timestamp: Timestamp,
    ) -> UnregisterRequest {
        let claim = UnregistrationClaim {
            public_key: self.public_key(),
            timestamp,
            signature: [0u8; 64],
        };
        let signature = sign_unregistration(signer, &claim);

        UnregisterRequest {
            public_key: self.public_key_hex(),
            timestamp,
            signature: hex::encode(signature),
        }
    }
}

/// Registry over a throwaway RocksDB store
pub struct TestRegistry {
    pub store: Arc<RocksPeerStore>,
    pub registry: Arc<Registry>,
    _dir: tempfile::TempDir,
}

pub fn test_registry(config: &DiscoveryConfig, geo: StaticGeoResolver) -> TestRegistry {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksPeerStore::open(dir.path()).unwrap());
    let registry = Arc::new(Registry::new(store.clone(), Arc::new(geo), config));

    TestRegistry {
        store,
        registry,
        _dir: dir,
    }
}
