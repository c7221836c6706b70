//! Page-view ingestion.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::warn;

use crate::api::types::{TrackRequest, TrackResponse};
use crate::api::{client_address, parse_optional_json, resolve_site_id, ApiError};
use crate::domain::UserAgentHints;
use crate::metrics::metric_names;
use crate::server::AppState;

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Classification inputs carried by the request headers.
pub fn hints_from_headers(headers: &HeaderMap) -> UserAgentHints {
    UserAgentHints {
        user_agent: header_string(headers, header::USER_AGENT),
        referrer: header_string(headers, header::REFERER),
        host: header_string(headers, header::HOST),
    }
}

/// POST /track - Record one page view. Open to everyone, locked or not.
pub async fn track(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TrackResponse>, ApiError> {
    let request: TrackRequest = parse_optional_json(&body)?;
    let site_id = resolve_site_id(request.site_id.as_deref())?;

    let address = client_address(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let hints = hints_from_headers(&headers);

    let start = Instant::now();
    let result = state
        .ingest
        .track(&site_id, &address, request.path.as_deref(), &hints)
        .await;
    state
        .metrics
        .observe_histogram(metric_names::TRACK_LATENCY, start.elapsed().as_secs_f64())
        .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.inc_counter(metric_names::TRACK_FAILURES).await;
            if e.is_storage() {
                warn!(site_id = %site_id, error = %e, "Failed to record visit");
            }
            return Err(e.into());
        }
    };

    state.metrics.inc_counter(metric_names::VISITS_TRACKED).await;
    if outcome.is_unique_today {
        state.metrics.inc_counter(metric_names::UNIQUE_VISITS).await;
    }
    Ok(Json(outcome.into()))
}
