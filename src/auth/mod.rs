//! Pairing and request authentication
//!
//! A site starts public: anyone may read its statistics. Pairing registers a
//! single Ed25519 public key and locks the site; from then on every read must
//! carry a fresh, never-seen signature from that key.
//!
//! # Flow
//!
//! - `POST /pair/init` issues a single-use nonce ([`PairingManager`])
//! - `POST /pair/complete` verifies a signature over the nonce and locks the site
//! - Reads of a locked site pass through [`RequestAuthenticator`]: timestamp
//!   window, replay record ([`ReplayGuard`]), then signature verification
//!
//! # Rate Limiting
//!
//! Pairing endpoints can be throttled per client identity with [`RateLimiter`]
//! (`RATE_LIMIT_PER_MINUTE`).

mod middleware;
mod pairing;
mod replay;
mod request;

pub use middleware::*;
pub use pairing::*;
pub use replay::*;
pub use request::*;

/// Authentication error
///
/// The variant is for logs and metrics only; clients see a generic rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("no pending pairing challenge")]
    NoChallenge,

    #[error("signature verification failed")]
    BadSignature,

    #[error("request timestamp outside the allowed window")]
    StaleTimestamp,

    #[error("signature already used")]
    Replay,

    #[error("site is already locked")]
    AlreadyLocked,

    #[error("rate limit exceeded")]
    RateLimited,
}

impl AuthError {
    /// Stable label used in logs and metric names.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingAuth => "missing_auth",
            AuthError::NoChallenge => "no_challenge",
            AuthError::BadSignature => "bad_signature",
            AuthError::StaleTimestamp => "stale_timestamp",
            AuthError::Replay => "replay",
            AuthError::AlreadyLocked => "already_locked",
            AuthError::RateLimited => "rate_limited",
        }
    }
}

/// Outcome of a successful authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// The site is not paired; reads are open.
    Public,
    /// The request was signed by the site's registered key.
    Signed { timestamp: i64 },
}
