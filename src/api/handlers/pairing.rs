//! Device pairing: issue a challenge, then lock the site to the key that signs it.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::warn;

use crate::api::types::{
    PairCompleteRequest, PairCompleteResponse, PairInitRequest, PairInitResponse,
};
use crate::api::{
    decode_public_key, decode_signature, json_rejection, parse_optional_json, require_field,
    resolve_site_id, ApiError,
};
use crate::domain::SiteId;
use crate::infra::AnalyticsError;
use crate::metrics::metric_names;
use crate::server::AppState;

async fn rejected(state: &AppState, site_id: &SiteId, err: AnalyticsError) -> ApiError {
    if let AnalyticsError::Auth(reason) = &err {
        warn!(site_id = %site_id, reason = reason.reason(), "Rejected pairing request");
        state.metrics.record_auth_rejection(reason.reason()).await;
    }
    err.into()
}

async fn record_pending(state: &AppState) {
    state
        .metrics
        .set_gauge(
            metric_names::PENDING_CHALLENGES,
            state.pairing.pending_count() as u64,
        )
        .await;
}

/// POST /pair/init - Issue a pairing challenge for a public site.
pub async fn pair_init(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PairInitResponse>, ApiError> {
    let request: PairInitRequest = parse_optional_json(&body)?;
    let site_id = resolve_site_id(request.site_id.as_deref())?;

    let challenge = match state.pairing.initiate_pairing(&site_id).await {
        Ok(challenge) => challenge,
        Err(e) => return Err(rejected(&state, &site_id, e).await),
    };

    state.metrics.inc_counter(metric_names::PAIRINGS_INITIATED).await;
    record_pending(&state).await;
    Ok(Json(challenge.into()))
}

/// POST /pair/complete - Register the key that signed the pending nonce.
pub async fn pair_complete(
    State(state): State<AppState>,
    body: Result<Json<PairCompleteRequest>, JsonRejection>,
) -> Result<Json<PairCompleteResponse>, ApiError> {
    let Json(request) = body.map_err(json_rejection)?;
    let site_id = resolve_site_id(request.site_id.as_deref())?;
    let public_key = decode_public_key(require_field("public_key", &request.public_key)?)?;
    let signature = decode_signature(require_field("signature", &request.signature)?)?;

    let result = state
        .pairing
        .complete_pairing(&site_id, &public_key, &signature)
        .await;
    record_pending(&state).await;

    let site = match result {
        Ok(site) => site,
        Err(e) => return Err(rejected(&state, &site_id, e).await),
    };

    state.metrics.inc_counter(metric_names::PAIRINGS_COMPLETED).await;
    Ok(Json(PairCompleteResponse {
        status: "locked".to_string(),
        site_id: site.site_id,
        locked_at: site.locked_at,
    }))
}
