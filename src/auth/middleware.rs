//! Authentication middleware for Axum
//!
//! - [`signature_gate`] guards statistics reads of locked sites
//! - [`pairing_throttle`] rate-limits pairing attempts per client identity

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{AuthError, Permit, RequestAuthenticator, SignedRequest};
use crate::api::{client_address, ApiError, ErrorCode};
use crate::domain::SiteId;
use crate::infra::IdentityHasher;
use crate::metrics::MetricsRegistry;

/// Largest body buffered for signature verification
pub const MAX_SIGNED_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct SiteQuery {
    site_id: Option<String>,
}

fn site_id_from_uri(uri: &Uri) -> Result<SiteId, ApiError> {
    let Query(query) = Query::<SiteQuery>::try_from_uri(uri)
        .map_err(|e| ApiError::new(ErrorCode::InvalidFieldValue, e.body_text()))?;
    SiteId::parse_or_default(query.site_id.as_deref()).map_err(ApiError::from)
}

/// State for the read signature gate.
#[derive(Clone)]
pub struct SignatureGateState {
    pub authenticator: Arc<RequestAuthenticator>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Require a valid signature on reads of locked sites.
///
/// On success the [`Permit`] is inserted into request extensions.
pub async fn signature_gate(
    State(state): State<SignatureGateState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let site_id = match site_id_from_uri(request.uri()) {
        Ok(site_id) => site_id,
        Err(e) => return e.into_response(),
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            return ApiError::new(ErrorCode::PayloadTooLarge, "Request body too large")
                .into_response()
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let parsed = SignedRequest::from_parts(parts.method.as_str(), path, &parts.headers, &body);

    let site = match state.authenticator.load_site(&site_id).await {
        Ok(site) => site,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let decision = match parsed {
        Ok(signed) => state
            .authenticator
            .authorize_site(&site, signed.as_ref(), Utc::now()),
        // Malformed auth headers only matter where auth is required
        Err(e) if site.is_locked() => Err(e),
        Err(_) => Ok(Permit::Public),
    };

    match decision {
        Ok(permit) => {
            debug!(site_id = %site_id, ?permit, "Read authorized");
            let mut request = Request::from_parts(parts, Body::from(body));
            request.extensions_mut().insert(permit);
            next.run(request).await
        }
        Err(e) => {
            warn!(site_id = %site_id, reason = e.reason(), "Rejected read request");
            state.metrics.record_auth_rejection(e.reason()).await;
            ApiError::from(e).into_response()
        }
    }
}

/// State for the pairing rate limiter.
#[derive(Clone)]
pub struct PairingThrottleState {
    pub limiter: Arc<RateLimiter>,
    /// Clients are keyed by hashed address, never the raw address
    pub identity: IdentityHasher,
    pub trust_proxy_headers: bool,
    pub metrics: Arc<MetricsRegistry>,
}

/// Per-client rate limit on pairing endpoints.
pub async fn pairing_throttle(
    State(state): State<PairingThrottleState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let address = client_address(request.headers(), peer, state.trust_proxy_headers);
    let key = state.identity.identify(&address);

    if let Err(e) = state.limiter.check(key.as_str()) {
        warn!(reason = e.reason(), "Throttled pairing request");
        state.metrics.record_auth_rejection(e.reason()).await;
        return ApiError::from(e)
            .with_retry_after(state.limiter.window().as_secs())
            .into_response();
    }
    next.run(request).await
}

/// Fixed-window request counter keyed by client identity.
pub struct RateLimiter {
    requests_per_window: u32,
    window: Duration,
    max_keys: usize,
    counts: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    /// Limit of `requests_per_minute` per key.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            max_keys: 100_000,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `key`, rejecting it once the window's quota is spent.
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), AuthError> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());

        if counts.len() >= self.max_keys && !counts.contains_key(key) {
            let window = self.window;
            counts.retain(|_, (_, started)| now.duration_since(*started) < window);
            if counts.len() >= self.max_keys {
                return Err(AuthError::RateLimited);
            }
        }

        let entry = counts.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= self.window {
            *entry = (0, now);
        }
        if entry.0 >= self.requests_per_window {
            return Err(AuthError::RateLimited);
        }
        entry.0 += 1;
        Ok(())
    }

    /// Requests left for `key` in the current window.
    pub fn remaining(&self, key: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get(key) {
            Some((count, started)) if started.elapsed() < self.window => {
                self.requests_per_window.saturating_sub(*count)
            }
            _ => self.requests_per_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_quota() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert_eq!(limiter.check("a"), Err(AuthError::RateLimited));
        assert_eq!(limiter.remaining("a"), 0);

        // Keys are independent
        assert!(limiter.check("b").is_ok());
        assert_eq!(limiter.remaining("b"), 2);
    }

    #[test]
    fn test_rate_limiter_window_resets() {
        let limiter = RateLimiter::with_window(1, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.check_at("a", t0).is_ok());
        assert!(limiter.check_at("a", t0 + Duration::from_secs(5)).is_err());
        assert!(limiter.check_at("a", t0 + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_site_id_from_uri() {
        let uri: Uri = "/stats?site_id=blog&from=2024-01-01".parse().unwrap();
        assert_eq!(site_id_from_uri(&uri).unwrap().as_str(), "blog");

        let uri: Uri = "/stats".parse().unwrap();
        assert_eq!(site_id_from_uri(&uri).unwrap().as_str(), "default");

        let uri: Uri = "/stats?site_id=..%2Fetc".parse().unwrap();
        assert!(site_id_from_uri(&uri).is_err());
    }
}
