//! Ed25519 signing and verification for site pairing
//!
//! The server only ever verifies. [`SiteSigningKey`] exists for the admin CLI
//! and tests, which play the role of the paired device.

use ed25519_dalek::{
    Signature, Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;

use crate::crypto::hash::{compute_request_signing_hash, RequestSigningParams};
use crate::domain::{PublicKey32, Signature64};

/// Ed25519 secret key (32 bytes)
pub type SecretKey32 = [u8; SECRET_KEY_LENGTH];

/// Error type for signing operations
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("invalid secret key format")]
    InvalidSecretKeyFormat,

    #[error("signature verification failed")]
    VerificationFailed,
}

// ============================================================================
// Signing key (device side)
// ============================================================================

/// Keypair held by the paired device
#[derive(Clone)]
pub struct SiteSigningKey {
    signing_key: SigningKey,
}

impl SiteSigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &SecretKey32) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> SecretKey32 {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> SiteVerifyingKey {
        SiteVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn public_key_bytes(&self) -> PublicKey32 {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign raw bytes (a pairing nonce, or a precomputed hash)
    pub fn sign(&self, message: &[u8]) -> Signature64 {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a read request's canonical hash
    pub fn sign_request(&self, params: &RequestSigningParams) -> Signature64 {
        self.sign(&compute_request_signing_hash(params))
    }
}

impl std::fmt::Debug for SiteSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSigningKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Verifying key (server side)
// ============================================================================

/// Registered public key of a paired site
#[derive(Clone)]
pub struct SiteVerifyingKey {
    verifying_key: VerifyingKey,
}

impl SiteVerifyingKey {
    /// Parse public key bytes; rejects encodings that are not curve points
    pub fn from_bytes(bytes: &PublicKey32) -> Result<Self, SigningError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> PublicKey32 {
        self.verifying_key.to_bytes()
    }

    /// Strict verification: rejects weak keys and non-canonical signatures,
    /// so a signature's bytes identify it uniquely for replay tracking.
    pub fn verify(&self, message: &[u8], signature: &Signature64) -> Result<(), SigningError> {
        let sig = Signature::from_bytes(signature);
        self.verifying_key
            .verify_strict(message, &sig)
            .map_err(|_| SigningError::VerificationFailed)
    }

    pub fn verify_request(
        &self,
        params: &RequestSigningParams,
        signature: &Signature64,
    ) -> Result<(), SigningError> {
        self.verify(&compute_request_signing_hash(params), signature)
    }
}

impl std::fmt::Debug for SiteVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

// ============================================================================
// Hex helpers
// ============================================================================

fn decode_hex_array<const N: usize>(hex_str: &str, err: SigningError) -> Result<[u8; N], SigningError> {
    let hex_str = hex_str.trim();
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let Ok(bytes) = hex::decode(hex_str) else {
        return Err(err);
    };
    bytes.try_into().map_err(|_| err)
}

/// Convert signature bytes to hex string with 0x prefix
pub fn signature_to_hex(signature: &Signature64) -> String {
    format!("0x{}", hex::encode(signature))
}

/// Parse signature from hex string (with or without 0x prefix)
pub fn signature_from_hex(hex_str: &str) -> Result<Signature64, SigningError> {
    decode_hex_array(hex_str, SigningError::InvalidSignatureFormat)
}

/// Convert public key bytes to hex string with 0x prefix
pub fn public_key_to_hex(public_key: &PublicKey32) -> String {
    format!("0x{}", hex::encode(public_key))
}

/// Parse public key from hex string (with or without 0x prefix)
pub fn public_key_from_hex(hex_str: &str) -> Result<PublicKey32, SigningError> {
    decode_hex_array(hex_str, SigningError::InvalidPublicKeyFormat)
}

/// Parse secret key from hex string (with or without 0x prefix)
pub fn secret_key_from_hex(hex_str: &str) -> Result<SecretKey32, SigningError> {
    decode_hex_array(hex_str, SigningError::InvalidSecretKeyFormat)
}

const _: () = assert!(PUBLIC_KEY_LENGTH == 32);
