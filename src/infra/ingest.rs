//! Tracking path: identity, classification and persistence of one page view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{normalize_path, Event, SiteId, UserAgentHints};

use super::{AnalyticsError, GeoLocator, IdentityHasher, Result, SiteStore, VisitClassifier};

/// Result of tracking one page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackOutcome {
    pub site_id: SiteId,
    /// First visit by this visitor on the current UTC day.
    pub is_unique_today: bool,
    pub country: String,
    pub path: String,
}

/// Accepts tracked events and writes them to the site's partition.
///
/// Never gated by pairing: sites accept writes whether or not they are locked.
pub struct IngestionPath {
    store: Arc<SiteStore>,
    identity: IdentityHasher,
    geo: Arc<dyn GeoLocator>,
    classifier: Arc<dyn VisitClassifier>,
}

impl IngestionPath {
    pub fn new(
        store: Arc<SiteStore>,
        identity: IdentityHasher,
        geo: Arc<dyn GeoLocator>,
        classifier: Arc<dyn VisitClassifier>,
    ) -> Self {
        Self {
            store,
            identity,
            geo,
            classifier,
        }
    }

    pub async fn track(
        &self,
        site_id: &SiteId,
        address: &str,
        path: Option<&str>,
        hints: &UserAgentHints,
    ) -> Result<TrackOutcome> {
        self.track_at(site_id, address, path, hints, Utc::now()).await
    }

    /// Track a page view as if it happened at `at`.
    pub async fn track_at(
        &self,
        site_id: &SiteId,
        address: &str,
        path: Option<&str>,
        hints: &UserAgentHints,
        at: DateTime<Utc>,
    ) -> Result<TrackOutcome> {
        let path = normalize_path(path).map_err(AnalyticsError::Validation)?;

        // The raw address is used for these two lookups only.
        let visitor_id = self.identity.identify(address);
        let country = self.geo.country(address);

        let classification = self.classifier.classify(hints);
        let partition = self.store.open_or_create(site_id).await?;

        let mut writer = partition.begin_write().await?;
        let is_unique = !writer.has_visit_on(&visitor_id, at.date_naive()).await?;

        let event = Event {
            site_id: site_id.clone(),
            visitor_id,
            path,
            occurred_at: at,
            country,
            device: classification.device,
            os: classification.os,
            browser: classification.browser,
            referrer: classification.referrer,
            is_unique,
        };
        writer.append(&event).await?;
        writer
            .record_activity(&event.visitor_id, at, classification.ua_score)
            .await?;
        writer.commit().await?;

        debug!(
            site_id = %site_id,
            path = %event.path,
            unique = is_unique,
            device = %event.device,
            "Tracked page view"
        );

        Ok(TrackOutcome {
            site_id: event.site_id,
            is_unique_today: is_unique,
            country: event.country,
            path: event.path,
        })
    }
}
