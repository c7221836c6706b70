//! Pairing challenges issued to a device that wants to lock a site.

use chrono::{DateTime, Duration, Utc};

use super::SiteId;

/// Nonce length in bytes (256 bits of entropy).
pub const NONCE_LEN: usize = 32;

/// URI scheme of the scannable pairing payload.
pub const PAIRING_URI_SCHEME: &str = "va-pair";

/// A single-use challenge the pairing device must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingChallenge {
    pub site_id: SiteId,
    pub nonce: [u8; NONCE_LEN],
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once a completion attempt has used this challenge, whatever its outcome.
    pub consumed: bool,
}

impl PairingChallenge {
    pub fn new(
        site_id: SiteId,
        nonce: [u8; NONCE_LEN],
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            site_id,
            nonce,
            issued_at,
            expires_at: issued_at + ttl,
            consumed: false,
        }
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at > self.expires_at
    }

    /// Usable for a completion attempt at `at`.
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        !self.consumed && !self.is_expired_at(at)
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce)
    }

    /// Payload rendered as a QR code by the pairing client.
    pub fn pairing_uri(&self) -> String {
        format!(
            "{}://{}?nonce={}&expires={}",
            PAIRING_URI_SCHEME,
            self.site_id,
            self.nonce_hex(),
            self.expires_at.timestamp()
        )
    }
}
