//! Aggregate reads. Both routes sit behind the signature gate and never
//! create storage for an unknown site.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Query, State};
use axum::Json;
use tracing::debug;

use crate::api::types::{SiteParams, StatsParams};
use crate::api::{invalid_range, no_data, query_rejection, resolve_site_id, ApiError};
use crate::auth::Permit;
use crate::domain::{SiteStats, StatsSummary};
use crate::metrics::metric_names;
use crate::server::AppState;

/// GET /stats - Totals, distinct visitors, countries and pages.
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(permit): Extension<Permit>,
    query: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Json<SiteStats>, ApiError> {
    let Query(params) = query.map_err(query_rejection)?;
    let site_id = resolve_site_id(params.site_id.as_deref())?;
    let range = params.range();
    range.validate().map_err(invalid_range)?;

    let stats = match state.sites.open_existing(&site_id).await? {
        Some(partition) => partition.read_aggregate(&range).await?,
        None => SiteStats {
            site_id: site_id.clone(),
            ..SiteStats::default()
        },
    };

    debug!(site_id = %site_id, ?permit, total = stats.total_visits, "Served stats");
    state.metrics.inc_counter(metric_names::STATS_SERVED).await;
    Ok(Json(stats))
}

/// GET /stats/summary - Averages, busiest weekday and weekly growth.
pub async fn get_stats_summary(
    State(state): State<AppState>,
    Extension(permit): Extension<Permit>,
    query: Result<Query<SiteParams>, QueryRejection>,
) -> Result<Json<StatsSummary>, ApiError> {
    let Query(params) = query.map_err(query_rejection)?;
    let site_id = resolve_site_id(params.site_id.as_deref())?;

    let days = match state.sites.open_existing(&site_id).await? {
        Some(partition) => partition.daily_stats().await?,
        None => Vec::new(),
    };
    let summary = StatsSummary::from_daily(&days).ok_or_else(no_data)?;

    debug!(site_id = %site_id, ?permit, days = days.len(), "Served stats summary");
    state.metrics.inc_counter(metric_names::STATS_SERVED).await;
    Ok(Json(summary))
}
