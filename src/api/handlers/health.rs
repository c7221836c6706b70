//! Health check handlers
//!
//! - `GET /health`: liveness, no I/O
//! - `GET /ready`: data directory, salt file and shutdown state
//! - `GET /metrics`: service counters as JSON (`?format=prometheus` for text)

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::api::{ApiError, ErrorCode};
use crate::metrics::metric_names;
use crate::server::AppState;

pub const SERVICE_NAME: &str = "visitor-analytics";

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Individual component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for the readiness endpoint
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub open_partitions: usize,
    pub components: Vec<ComponentStatus>,
}

/// Basic health check endpoint.
///
/// Use this for liveness probes.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn check_path(name: &'static str, path: &Path, want_dir: bool) -> ComponentStatus {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() == want_dir => ComponentStatus {
            name,
            status: HealthStatus::Healthy,
            message: None,
        },
        Ok(_) => ComponentStatus {
            name,
            status: HealthStatus::Unhealthy,
            message: Some("unexpected file type".to_string()),
        },
        Err(e) => ComponentStatus {
            name,
            status: HealthStatus::Unhealthy,
            message: Some(e.kind().to_string()),
        },
    }
}

/// Readiness check endpoint.
///
/// Ready once the data directory and salt exist and until shutdown begins.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let mut components = vec![
        check_path("data_dir", &state.data_dir, true).await,
        check_path("salt", &state.salt_path, false).await,
    ];
    components.push(ComponentStatus {
        name: "lifecycle",
        status: if state.shutdown.is_shutdown() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        },
        message: state
            .shutdown
            .is_shutdown()
            .then(|| "shutting down".to_string()),
    });

    let status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = ReadinessResponse {
        status,
        open_partitions: state.sites.open_count(),
        components,
    };
    (code, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    pub format: Option<String>,
}

/// Metrics endpoint.
pub async fn metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Response, ApiError> {
    let metrics = &state.metrics;
    metrics
        .set_gauge(metric_names::OPEN_PARTITIONS, state.sites.open_count() as u64)
        .await;
    metrics
        .set_gauge(
            metric_names::PENDING_CHALLENGES,
            state.pairing.pending_count() as u64,
        )
        .await;

    match params.format.as_deref() {
        None | Some("json") => Ok(Json(metrics.to_json().await).into_response()),
        Some("prometheus") => Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.to_prometheus().await,
        )
            .into_response()),
        Some(other) => Err(ApiError::new(
            ErrorCode::InvalidFieldValue,
            format!("unsupported metrics format {other:?}"),
        )
        .with_field("format")),
    }
}
