//! Shared request and response types for REST API handlers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PairingChallenge, Site, SiteId, StatsQuery};
use crate::infra::TrackOutcome;

// ============================================================================
// Tracking
// ============================================================================

/// Request body for `POST /track`.
#[derive(Debug, Default, Deserialize)]
pub struct TrackRequest {
    pub path: Option<String>,
    pub site_id: Option<String>,
}

/// Response for `POST /track`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackResponse {
    pub status: String,
    pub country: String,
    pub unique: bool,
    pub page: String,
}

impl From<TrackOutcome> for TrackResponse {
    fn from(outcome: TrackOutcome) -> Self {
        Self {
            status: "success".to_string(),
            country: outcome.country,
            unique: outcome.is_unique_today,
            page: outcome.path,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Query string for `GET /stats` and `GET /stats/summary`.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub site_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl StatsParams {
    pub fn range(&self) -> StatsQuery {
        StatsQuery {
            from: self.from,
            to: self.to,
        }
    }
}

/// Query string for endpoints addressing one site.
#[derive(Debug, Default, Deserialize)]
pub struct SiteParams {
    pub site_id: Option<String>,
}

// ============================================================================
// Pairing
// ============================================================================

/// Request body for `POST /pair/init`.
#[derive(Debug, Default, Deserialize)]
pub struct PairInitRequest {
    pub site_id: Option<String>,
}

/// Response for `POST /pair/init`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PairInitResponse {
    pub site_id: SiteId,
    /// Hex-encoded nonce the device signs
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Payload for the scannable pairing code
    pub pairing_uri: String,
}

impl From<PairingChallenge> for PairInitResponse {
    fn from(challenge: PairingChallenge) -> Self {
        Self {
            nonce: challenge.nonce_hex(),
            pairing_uri: challenge.pairing_uri(),
            issued_at: challenge.issued_at,
            expires_at: challenge.expires_at,
            site_id: challenge.site_id,
        }
    }
}

/// Request body for `POST /pair/complete`. Key and signature are hex.
#[derive(Debug, Deserialize)]
pub struct PairCompleteRequest {
    pub site_id: Option<String>,
    pub public_key: String,
    pub signature: String,
}

/// Response for `POST /pair/complete`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PairCompleteResponse {
    pub status: String,
    pub site_id: SiteId,
    pub locked_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Site status
// ============================================================================

/// Public lock status of a site. Never carries the registered key.
#[derive(Debug, Serialize, Deserialize)]
pub struct SiteStatusResponse {
    pub site_id: SiteId,
    pub locked: bool,
    /// `None` for a site nothing has been recorded for yet
    pub created_at: Option<DateTime<Utc>>,
}

impl SiteStatusResponse {
    /// Status of a site with no storage: public, never created.
    pub fn unknown(site_id: SiteId) -> Self {
        Self {
            site_id,
            locked: false,
            created_at: None,
        }
    }
}

impl From<&Site> for SiteStatusResponse {
    fn from(site: &Site) -> Self {
        Self {
            site_id: site.site_id.clone(),
            locked: site.is_locked(),
            created_at: Some(site.created_at),
        }
    }
}
