//! REST routes for the analytics service.
//!
//! Routers are returned unlayered; `server::build_router` attaches the
//! signature gate and the pairing throttle.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{
    get_site_status, get_stats, get_stats_summary, health_check, metrics, pair_complete,
    pair_init, readiness_check, track,
};
use crate::server::AppState;

/// Open ingestion.
pub fn tracking_router() -> Router<AppState> {
    Router::new().route("/track", post(track))
}

/// Aggregate reads, gated per site.
pub fn stats_router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/stats/summary", get(get_stats_summary))
}

/// Pairing endpoints, throttled per client when configured.
pub fn pairing_router() -> Router<AppState> {
    Router::new()
        .route("/pair/init", post(pair_init))
        .route("/pair/complete", post(pair_complete))
}

/// Public status and operational endpoints.
pub fn status_router() -> Router<AppState> {
    Router::new()
        .route("/site", get(get_site_status))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
}
