//! Trait seams between the analytics core and its collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{PublicKey32, Site, SiteId, UserAgentHints, VisitClassification};

use super::Result;

/// Access to the per-site record that carries the lock state and registered key.
///
/// Invariant: `lock_site` is the only operation that moves a site to `Locked`,
/// and it succeeds at most once per site.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// Load the site record. A site with no storage yet reads as public and
    /// is not created.
    async fn load_site(&self, site_id: &SiteId) -> Result<Site>;

    /// Register `public_key` and lock the site.
    ///
    /// Fails with `AuthError::AlreadyLocked` if the site is no longer public.
    async fn lock_site(
        &self,
        site_id: &SiteId,
        public_key: PublicKey32,
        at: DateTime<Utc>,
    ) -> Result<Site>;
}

/// Resolves a client address to an ISO country code.
///
/// Never fails: unknown, private or unparsable addresses map to `"Unknown"`.
#[cfg_attr(test, automock)]
pub trait GeoLocator: Send + Sync {
    fn country(&self, address: &str) -> String;
}

/// Classifies device, OS, browser and referrer of a visit.
#[cfg_attr(test, automock)]
pub trait VisitClassifier: Send + Sync {
    fn classify(&self, hints: &UserAgentHints) -> VisitClassification;
}
