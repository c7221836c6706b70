//! Registry of per-site partitions.
//!
//! Each site maps to `<data_dir>/sites/<site_id>.db`. Opening is guarded per
//! key: concurrent callers for the same site wait on one init cell and all get
//! handles to the same partition. A failed open leaves the cell empty so the
//! next caller retries. Only writes create partitions; reads of an unknown
//! site see nothing on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::Partition;
use crate::domain::{PublicKey32, Site, SiteId};
use crate::infra::{Result, SiteRegistry};

/// Directory under the data dir holding one database per site
pub const SITES_DIR: &str = "sites";

pub struct SiteStore {
    root: PathBuf,
    partitions: Mutex<HashMap<SiteId, Arc<OnceCell<Partition>>>>,
}

impl SiteStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join(SITES_DIR),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Database file backing `site_id`. The id is already restricted to a
    /// safe file stem.
    pub fn partition_path(&self, site_id: &SiteId) -> PathBuf {
        self.root.join(format!("{}.db", site_id.as_str()))
    }

    /// Open the site's partition, creating it on first use.
    pub async fn open_or_create(&self, site_id: &SiteId) -> Result<Partition> {
        self.init(site_id, true).await
    }

    /// Open the site's partition only if it already exists on disk.
    ///
    /// Reads go through here so that querying an unknown site creates neither
    /// a database file nor a registry entry.
    pub async fn open_existing(&self, site_id: &SiteId) -> Result<Option<Partition>> {
        if let Some(partition) = self.opened(site_id) {
            return Ok(Some(partition));
        }
        if !tokio::fs::try_exists(self.partition_path(site_id)).await? {
            return Ok(None);
        }
        self.init(site_id, false).await.map(Some)
    }

    fn opened(&self, site_id: &SiteId) -> Option<Partition> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.get(site_id).and_then(|c| c.get().cloned())
    }

    async fn init(&self, site_id: &SiteId, create: bool) -> Result<Partition> {
        let cell = {
            let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                partitions
                    .entry(site_id.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let path = self.partition_path(site_id);
        let partition = cell
            .get_or_try_init(|| async {
                if create {
                    Partition::open(site_id.clone(), path, Utc::now()).await
                } else {
                    Partition::open_existing(site_id.clone(), path, Utc::now()).await
                }
            })
            .await
            .map_err(|e| {
                warn!(site_id = %site_id, error = %e, "Failed to open site partition");
                e
            })?;
        Ok(partition.clone())
    }

    /// Number of partitions opened so far.
    pub fn open_count(&self) -> usize {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.values().filter(|c| c.initialized()).count()
    }

    /// Close every open pool. Used on shutdown.
    pub async fn close_all(&self) {
        let opened: Vec<Partition> = {
            let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
            partitions.values().filter_map(|c| c.get().cloned()).collect()
        };
        for partition in &opened {
            partition.close().await;
        }
        info!(count = opened.len(), "Closed site partitions");
    }
}

#[async_trait]
impl SiteRegistry for SiteStore {
    async fn load_site(&self, site_id: &SiteId) -> Result<Site> {
        match self.open_existing(site_id).await? {
            Some(partition) => partition.site().await,
            None => Ok(Site::new_public(site_id.clone(), Utc::now())),
        }
    }

    async fn lock_site(
        &self,
        site_id: &SiteId,
        public_key: PublicKey32,
        at: DateTime<Utc>,
    ) -> Result<Site> {
        self.open_or_create(site_id).await?.lock_site(public_key, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LockState;

    #[tokio::test]
    async fn test_partition_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        let site = SiteId::parse("blog").unwrap();

        store.open_or_create(&site).await.unwrap();
        assert!(dir.path().join("sites").join("blog.db").exists());
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_repeat_open_returns_same_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        let site = SiteId::parse("blog").unwrap();

        let a = store.open_or_create(&site).await.unwrap();
        let b = store.open_or_create(&site).await.unwrap();
        assert!(a.same_partition(&b));

        let other = store.open_or_create(&SiteId::parse("shop").unwrap()).await.unwrap();
        assert!(!a.same_partition(&other));
        assert_eq!(store.open_count(), 2);
    }

    #[tokio::test]
    async fn test_registry_lock_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        let site = SiteId::parse("blog").unwrap();

        assert_eq!(store.load_site(&site).await.unwrap().lock_state, LockState::Public);
        store.lock_site(&site, [1u8; 32], Utc::now()).await.unwrap();
        assert_eq!(store.load_site(&site).await.unwrap().lock_state, LockState::Locked);
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the sites directory should be blocks creation.
        std::fs::write(dir.path().join(SITES_DIR), b"not a directory").unwrap();
        let store = SiteStore::new(dir.path());
        let site = SiteId::parse("blog").unwrap();

        assert!(store.open_or_create(&site).await.is_err());
        assert_eq!(store.open_count(), 0);

        std::fs::remove_file(dir.path().join(SITES_DIR)).unwrap();
        assert!(store.open_or_create(&site).await.is_ok());
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_reads_of_unknown_site_leave_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        let ghost = SiteId::parse("ghost").unwrap();

        assert!(store.open_existing(&ghost).await.unwrap().is_none());
        let site = store.load_site(&ghost).await.unwrap();
        assert_eq!(site.lock_state, LockState::Public);

        assert!(!store.partition_path(&ghost).exists());
        assert_eq!(store.partitions.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_open_existing_shares_created_partition() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteId::parse("blog").unwrap();

        let created = SiteStore::new(dir.path());
        let a = created.open_or_create(&site).await.unwrap();
        let b = created.open_existing(&site).await.unwrap().unwrap();
        assert!(a.same_partition(&b));
        created.close_all().await;

        // A fresh registry finds the file left by the first one.
        let reopened = SiteStore::new(dir.path());
        assert!(reopened.open_existing(&site).await.unwrap().is_some());
        assert_eq!(reopened.open_count(), 1);
    }
}
