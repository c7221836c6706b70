//! Authorization of reads against a site's lock state.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::{AuthError, Permit, ReplayGuard};
use crate::crypto::{signature_from_hex, RequestSigningParams, SiteVerifyingKey};
use crate::domain::{Signature64, Site, SiteId};
use crate::infra::{Result, SiteRegistry};

/// Header carrying the hex-encoded Ed25519 request signature
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Header carrying the signing time in unix seconds
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// A read request as seen by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    /// Path and query exactly as received
    pub path: String,
    pub body: Vec<u8>,
    pub timestamp: i64,
    pub signature: Signature64,
}

impl SignedRequest {
    /// Build from request parts.
    ///
    /// `Ok(None)` when no signature header is present. Malformed headers are
    /// reported as the rejection they would cause on a locked site.
    pub fn from_parts(
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> std::result::Result<Option<Self>, AuthError> {
        let Some(signature) = headers.get(SIGNATURE_HEADER) else {
            return Ok(None);
        };
        let signature = signature
            .to_str()
            .ok()
            .and_then(|s| signature_from_hex(s).ok())
            .ok_or(AuthError::BadSignature)?;
        let timestamp = headers
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or(AuthError::StaleTimestamp)?;

        Ok(Some(Self {
            method: method.to_string(),
            path: path.to_string(),
            body: body.to_vec(),
            timestamp,
            signature,
        }))
    }

    pub fn signing_params(&self) -> RequestSigningParams<'_> {
        RequestSigningParams {
            method: &self.method,
            path: &self.path,
            timestamp: self.timestamp,
            body: &self.body,
        }
    }
}

/// Gate for reads of locked sites: freshness, replay, then signature.
pub struct RequestAuthenticator {
    registry: Arc<dyn SiteRegistry>,
    window: Duration,
    replay: ReplayGuard,
}

impl RequestAuthenticator {
    pub fn new(registry: Arc<dyn SiteRegistry>, window: Duration, replay_capacity: usize) -> Self {
        Self {
            registry,
            window,
            replay: ReplayGuard::new(window, replay_capacity),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    pub async fn load_site(&self, site_id: &SiteId) -> Result<Site> {
        self.registry.load_site(site_id).await
    }

    pub async fn authorize(&self, site_id: &SiteId, request: Option<&SignedRequest>) -> Result<Permit> {
        self.authorize_at(site_id, request, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        site_id: &SiteId,
        request: Option<&SignedRequest>,
        now: DateTime<Utc>,
    ) -> Result<Permit> {
        let site = self.registry.load_site(site_id).await?;
        Ok(self.authorize_site(&site, request, now)?)
    }

    /// Decide a request against an already loaded site record.
    ///
    /// Only signatures that verify are remembered, so garbage cannot fill the
    /// replay record. The final check-and-record is atomic: of two concurrent
    /// uses of one valid signature exactly one is permitted.
    pub fn authorize_site(
        &self,
        site: &Site,
        request: Option<&SignedRequest>,
        now: DateTime<Utc>,
    ) -> std::result::Result<Permit, AuthError> {
        let Some(public_key) = site.registered_key() else {
            return Ok(Permit::Public);
        };
        let request = request.ok_or(AuthError::MissingAuth)?;

        let max_skew = self.window.num_seconds().max(0) as u64;
        if now.timestamp().abs_diff(request.timestamp) > max_skew {
            return Err(AuthError::StaleTimestamp);
        }
        let request_time =
            DateTime::from_timestamp(request.timestamp, 0).ok_or(AuthError::StaleTimestamp)?;

        if self.replay.contains(&request.signature, now) {
            return Err(AuthError::Replay);
        }

        let verifying_key =
            SiteVerifyingKey::from_bytes(public_key).map_err(|_| AuthError::BadSignature)?;
        verifying_key
            .verify_request(&request.signing_params(), &request.signature)
            .map_err(|_| AuthError::BadSignature)?;

        self.replay
            .check_and_record(&request.signature, request_time, now)?;

        Ok(Permit::Signed {
            timestamp: request.timestamp,
        })
    }
}
