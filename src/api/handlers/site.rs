//! Public site status.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;

use crate::api::types::{SiteParams, SiteStatusResponse};
use crate::api::{query_rejection, resolve_site_id, ApiError};
use crate::server::AppState;

/// GET /site - Whether a site is locked. Discloses nothing else.
pub async fn get_site_status(
    State(state): State<AppState>,
    query: Result<Query<SiteParams>, QueryRejection>,
) -> Result<Json<SiteStatusResponse>, ApiError> {
    let Query(params) = query.map_err(query_rejection)?;
    let site_id = resolve_site_id(params.site_id.as_deref())?;

    let response = match state.sites.open_existing(&site_id).await? {
        Some(partition) => SiteStatusResponse::from(&partition.site().await?),
        None => SiteStatusResponse::unknown(site_id),
    };
    Ok(Json(response))
}
