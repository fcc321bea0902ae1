//! Cryptographic utilities for the discovery registry
//!
//! Peers prove ownership of their public key by signing their registration
//! (and unregistration) with Ed25519. Signatures are domain separated so a
//! registration signature can never be replayed as an unregistration.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::types::{PublicKey, RegistrationClaim, Signature, UnregistrationClaim};

/// Domain separation prefix for registration signatures
const DOMAIN_REGISTER: &[u8] = b"SKYNET_DISCOVERY_REGISTER_V1:";

/// Domain separation prefix for unregistration signatures
const DOMAIN_UNREGISTER: &[u8] = b"SKYNET_DISCOVERY_UNREGISTER_V1:";

// =============================================================================
// KEYS
// =============================================================================

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Get public key bytes from keypair
pub fn keypair_to_public_key(keypair: &SigningKey) -> PublicKey {
    keypair.verifying_key().to_bytes()
}

/// Parse a hex-encoded public key
pub fn parse_public_key(hex_str: &str) -> Result<PublicKey, SignatureError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| SignatureError::MalformedPublicKey)?;
    let key: PublicKey = bytes
        .try_into()
        .map_err(|_| SignatureError::MalformedPublicKey)?;

    // Reject byte strings that are not curve points
    VerifyingKey::from_bytes(&key).map_err(|_| SignatureError::InvalidPublicKey)?;
    Ok(key)
}

/// Parse a hex-encoded signature
pub fn parse_signature(hex_str: &str) -> Result<Signature, SignatureError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| SignatureError::MalformedSignature)?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::MalformedSignature)
}

// =============================================================================
// REGISTRATION SIGNING & VERIFICATION
// =============================================================================

/// Create signature for a registration claim
pub fn sign_registration(keypair: &SigningKey, claim: &RegistrationClaim) -> Signature {
    let data = domain_separate(DOMAIN_REGISTER, &claim.signing_data());
    keypair.sign(&data).to_bytes()
}

/// Verify a registration signature against the claimed public key
pub fn verify_registration(claim: &RegistrationClaim) -> Result<(), SignatureError> {
    let data = domain_separate(DOMAIN_REGISTER, &claim.signing_data());
    verify(&claim.public_key, &data, &claim.signature)
}

/// Create signature for an unregistration claim
pub fn sign_unregistration(keypair: &SigningKey, claim: &UnregistrationClaim) -> Signature {
    let data = domain_separate(DOMAIN_UNREGISTER, &claim.signing_data());
    keypair.sign(&data).to_bytes()
}

/// Verify an unregistration signature against the claimed public key
pub fn verify_unregistration(claim: &UnregistrationClaim) -> Result<(), SignatureError> {
    let data = domain_separate(DOMAIN_UNREGISTER, &claim.signing_data());
    verify(&claim.public_key, &data, &claim.signature)
}

// =============================================================================
// HELPERS
// =============================================================================

fn verify(public_key: &PublicKey, data: &[u8], signature: &Signature) -> Result<(), SignatureError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SignatureError::InvalidPublicKey)?;

    let signature = DalekSignature::from_bytes(signature);

    verifying_key
        .verify(data, &signature)
        .map_err(|_| SignatureError::InvalidSignature)
}

/// Apply domain separation to prevent cross-protocol replay attacks
fn domain_separate(domain: &[u8], data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(domain.len() + data.len());
    result.extend_from_slice(domain);
    result.extend_from_slice(data);
    result
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("public key must be 64 hex characters")]
    MalformedPublicKey,

    #[error("signature must be 128 hex characters")]
    MalformedSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,
}

impl SignatureError {
    /// Whether the error comes from badly formed input rather than a failed check
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            SignatureError::MalformedPublicKey
                | SignatureError::MalformedSignature
                | SignatureError::InvalidPublicKey
        )
    }
}
