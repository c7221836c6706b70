//! A single site's SQLite database and its write lock.
//!
//! Every write (event append, counters, lock transition) runs while holding
//! the partition's async mutex and inside one transaction, so same-site
//! writers never interleave.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::auth::AuthError;
use crate::domain::{
    DailyStats, Event, LockState, PublicKey32, Site, SiteId, SiteStats, StatsQuery,
    VisitorActivity, VisitorId,
};
use crate::infra::{AnalyticsError, Result};

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DAY_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(site_id: &SiteId, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AnalyticsError::CorruptSiteRecord {
            site_id: site_id.clone(),
            message: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Handle to one site's isolated storage.
///
/// Cheap to clone; clones share the pool and the write lock.
#[derive(Debug, Clone)]
pub struct Partition {
    site_id: SiteId,
    path: PathBuf,
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl Partition {
    /// Open (creating if absent) the database at `path`, apply the schema and
    /// make sure the site row exists.
    pub async fn open(site_id: SiteId, path: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::connect(site_id, path, now, true).await
    }

    /// Open an existing database. Fails instead of creating a missing file.
    pub async fn open_existing(
        site_id: SiteId,
        path: impl AsRef<Path>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Self::connect(site_id, path.as_ref().to_path_buf(), now, false).await
    }

    async fn connect(
        site_id: SiteId,
        path: PathBuf,
        now: DateTime<Utc>,
        create_if_missing: bool,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO site (id, site_id, lock_state, created_at) VALUES (1, ?, 'public', ?)",
        )
        .bind(site_id.as_str())
        .bind(format_timestamp(now))
        .execute(&pool)
        .await?;

        if inserted.rows_affected() == 1 {
            info!(site_id = %site_id, "Created site partition");
        } else {
            debug!(site_id = %site_id, "Opened site partition");
        }

        let partition = Self {
            site_id,
            path,
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        // Fail the open, not a later request, if the stored row is unusable.
        partition.site().await?;
        Ok(partition)
    }

    pub fn site_id(&self) -> &SiteId {
        &self.site_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when both handles refer to the same opened partition.
    pub fn same_partition(&self, other: &Partition) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Load the site record.
    pub async fn site(&self) -> Result<Site> {
        let row: Option<(String, String, Option<Vec<u8>>, String, Option<String>)> = sqlx::query_as(
            "SELECT site_id, lock_state, public_key, created_at, locked_at FROM site WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let corrupt = |message: String| AnalyticsError::CorruptSiteRecord {
            site_id: self.site_id.clone(),
            message,
        };

        let (stored_id, lock_state, public_key, created_at, locked_at) =
            row.ok_or_else(|| corrupt("site row missing".into()))?;

        if stored_id != self.site_id.as_str() {
            return Err(corrupt(format!("partition belongs to site {stored_id:?}")));
        }
        let lock_state = LockState::parse(&lock_state)
            .ok_or_else(|| corrupt(format!("unknown lock state {lock_state:?}")))?;
        let public_key = public_key
            .map(|bytes| {
                PublicKey32::try_from(bytes.as_slice())
                    .map_err(|_| corrupt(format!("public key has {} bytes", bytes.len())))
            })
            .transpose()?;
        let created_at = parse_timestamp(&self.site_id, &created_at)?;
        let locked_at = locked_at
            .map(|raw| parse_timestamp(&self.site_id, &raw))
            .transpose()?;

        Site::from_parts(self.site_id.clone(), lock_state, public_key, created_at, locked_at)
            .map_err(|msg| corrupt(msg.to_string()))
    }

    /// Acquire the write lock and open a transaction.
    pub async fn begin_write(&self) -> Result<PartitionWriter> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(PartitionWriter {
            _guard: guard,
            tx,
        })
    }

    /// Register `public_key` and flip the site from public to locked.
    ///
    /// The conditional update makes this succeed at most once; a loser gets
    /// `AuthError::AlreadyLocked`.
    pub async fn lock_site(&self, public_key: PublicKey32, at: DateTime<Utc>) -> Result<Site> {
        let mut writer = self.begin_write().await?;
        let result = sqlx::query(
            "UPDATE site SET lock_state = 'locked', public_key = ?, locked_at = ? \
             WHERE id = 1 AND lock_state = 'public'",
        )
        .bind(&public_key[..])
        .bind(format_timestamp(at))
        .execute(&mut *writer.tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping the writer rolls the transaction back.
            return Err(AuthError::AlreadyLocked.into());
        }
        writer.commit().await?;

        info!(site_id = %self.site_id, "Site locked to paired key");
        self.site().await
    }

    /// Aggregate counts over an inclusive day range, read from one snapshot.
    pub async fn read_aggregate(&self, query: &StatsQuery) -> Result<SiteStats> {
        query.validate().map_err(AnalyticsError::Validation)?;
        let from = query.from.map(format_day);
        let to = query.to.map(format_day);

        let mut tx = self.pool.begin().await?;

        let (total, unique): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT visitor_id) FROM events \
             WHERE (? IS NULL OR day >= ?) AND (? IS NULL OR day <= ?)",
        )
        .bind(&from)
        .bind(&from)
        .bind(&to)
        .bind(&to)
        .fetch_one(&mut *tx)
        .await?;

        let countries: Vec<(String, i64)> = sqlx::query_as(
            "SELECT country, COUNT(*) FROM events \
             WHERE (? IS NULL OR day >= ?) AND (? IS NULL OR day <= ?) \
             GROUP BY country",
        )
        .bind(&from)
        .bind(&from)
        .bind(&to)
        .bind(&to)
        .fetch_all(&mut *tx)
        .await?;

        let pages: Vec<(String, i64)> = sqlx::query_as(
            "SELECT path, COUNT(*) FROM events \
             WHERE (? IS NULL OR day >= ?) AND (? IS NULL OR day <= ?) \
             GROUP BY path",
        )
        .bind(&from)
        .bind(&from)
        .bind(&to)
        .bind(&to)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SiteStats {
            site_id: self.site_id.clone(),
            total_visits: total as u64,
            unique_visitors: unique as u64,
            countries: into_counts(countries),
            pages: into_counts(pages),
        })
    }

    /// Daily counters in ascending date order.
    pub async fn daily_stats(&self) -> Result<Vec<DailyStats>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT date, total_visits, unique_visitors FROM daily_stats ORDER BY date ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(date, total, unique)| {
                let date = NaiveDate::parse_from_str(&date, DAY_FORMAT).map_err(|e| {
                    AnalyticsError::CorruptSiteRecord {
                        site_id: self.site_id.clone(),
                        message: format!("bad daily_stats date {date:?}: {e}"),
                    }
                })?;
                Ok(DailyStats {
                    date,
                    total_visits: total as u64,
                    unique_visitors: unique as u64,
                })
            })
            .collect()
    }

    pub async fn visitor_activity(&self, visitor_id: &VisitorId) -> Result<Option<VisitorActivity>> {
        let row: Option<(String, String, i64, f64)> = sqlx::query_as(
            "SELECT first_seen, last_seen, request_count, ua_score \
             FROM visitor_activity WHERE ip_hash = ?",
        )
        .bind(visitor_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(first_seen, last_seen, request_count, ua_score)| {
            Ok(VisitorActivity {
                visitor_id: visitor_id.clone(),
                first_seen: parse_timestamp(&self.site_id, &first_seen)?,
                last_seen: parse_timestamp(&self.site_id, &last_seen)?,
                request_count: request_count as u64,
                ua_score,
            })
        })
        .transpose()
    }
}

fn into_counts(rows: Vec<(String, i64)>) -> BTreeMap<String, u64> {
    rows.into_iter().map(|(k, v)| (k, v as u64)).collect()
}

/// Exclusive write access to a partition. Dropping without `commit` rolls back.
pub struct PartitionWriter {
    _guard: OwnedMutexGuard<()>,
    tx: Transaction<'static, Sqlite>,
}

impl PartitionWriter {
    /// Whether `visitor_id` already has an event on `day`.
    pub async fn has_visit_on(&mut self, visitor_id: &VisitorId, day: NaiveDate) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM events WHERE visitor_id = ? AND day = ?)",
        )
        .bind(visitor_id.as_str())
        .bind(format_day(day))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists != 0)
    }

    /// Append an event and bump the day's counters.
    pub async fn append(&mut self, event: &Event) -> Result<i64> {
        let day = format_day(event.day());

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                visitor_id, path, occurred_at, day,
                country, device, os, browser, referrer, is_unique
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.visitor_id.as_str())
        .bind(&event.path)
        .bind(format_timestamp(event.occurred_at))
        .bind(&day)
        .bind(&event.country)
        .bind(event.device.as_str())
        .bind(&event.os)
        .bind(&event.browser)
        .bind(event.referrer.as_str())
        .bind(event.is_unique)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO daily_stats (date, total_visits, unique_visitors)
            VALUES (?, 1, ?)
            ON CONFLICT(date) DO UPDATE SET
                total_visits = total_visits + 1,
                unique_visitors = unique_visitors + excluded.unique_visitors
            "#,
        )
        .bind(&day)
        .bind(i64::from(event.is_unique))
        .execute(&mut *self.tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Upsert the visitor's activity row.
    pub async fn record_activity(
        &mut self,
        visitor_id: &VisitorId,
        at: DateTime<Utc>,
        ua_score: f64,
    ) -> Result<()> {
        let at = format_timestamp(at);
        sqlx::query(
            r#"
            INSERT INTO visitor_activity (ip_hash, first_seen, last_seen, request_count, ua_score)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(ip_hash) DO UPDATE SET
                last_seen = excluded.last_seen,
                request_count = request_count + 1,
                ua_score = MAX(ua_score, excluded.ua_score)
            "#,
        )
        .bind(visitor_id.as_str())
        .bind(&at)
        .bind(&at)
        .bind(ua_score)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceType, ReferrerKind};

    fn site(id: &str) -> SiteId {
        SiteId::parse(id).unwrap()
    }

    fn event(site_id: &SiteId, visitor: &str, path: &str, at: DateTime<Utc>, unique: bool) -> Event {
        Event {
            site_id: site_id.clone(),
            visitor_id: VisitorId::from_hex(visitor),
            path: path.to_string(),
            occurred_at: at,
            country: "NL".to_string(),
            device: DeviceType::Desktop,
            os: "Linux".to_string(),
            browser: "Firefox".to_string(),
            referrer: ReferrerKind::Direct,
            is_unique: unique,
        }
    }

    async fn open(dir: &tempfile::TempDir, id: &str) -> Partition {
        Partition::open(site(id), dir.path().join(format!("{id}.db")), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_partition_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;

        let site = p.site().await.unwrap();
        assert_eq!(site.site_id.as_str(), "s1");
        assert_eq!(site.lock_state, LockState::Public);
        assert!(site.public_key.is_none());
    }

    #[tokio::test]
    async fn test_open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.db");

        assert!(Partition::open_existing(site("ghost"), &path, Utc::now()).await.is_err());
        assert!(!path.exists());

        open(&dir, "ghost").await.close().await;
        let p = Partition::open_existing(site("ghost"), &path, Utc::now()).await.unwrap();
        assert_eq!(p.site().await.unwrap().site_id.as_str(), "ghost");
    }

    #[tokio::test]
    async fn test_reopen_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(&dir, "s1").await.site().await.unwrap();
        let second = open(&dir, "s1").await.site().await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_partition_rejects_foreign_site_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        Partition::open(site("a"), &path, Utc::now()).await.unwrap();

        let err = Partition::open(site("b"), &path, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::CorruptSiteRecord { .. }));
    }

    #[tokio::test]
    async fn test_lock_site_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;

        let locked = p.lock_site([3u8; 32], Utc::now()).await.unwrap();
        assert!(locked.is_locked());
        assert_eq!(locked.public_key, Some([3u8; 32]));
        assert!(locked.locked_at.is_some());

        let err = p.lock_site([4u8; 32], Utc::now()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::Auth(AuthError::AlreadyLocked)));
        assert_eq!(p.site().await.unwrap().public_key, Some([3u8; 32]));
    }

    #[tokio::test]
    async fn test_append_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;
        let day1 = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let day2 = DateTime::parse_from_rfc3339("2024-03-02T10:00:00Z").unwrap().with_timezone(&Utc);

        let mut w = p.begin_write().await.unwrap();
        assert!(!w.has_visit_on(&VisitorId::from_hex("aa"), day1.date_naive()).await.unwrap());
        w.append(&event(p.site_id(), "aa", "/", day1, true)).await.unwrap();
        w.append(&event(p.site_id(), "aa", "/x", day1, false)).await.unwrap();
        w.append(&event(p.site_id(), "bb", "/x", day2, true)).await.unwrap();
        assert!(w.has_visit_on(&VisitorId::from_hex("aa"), day1.date_naive()).await.unwrap());
        w.commit().await.unwrap();

        let all = p.read_aggregate(&StatsQuery::all()).await.unwrap();
        assert_eq!(all.total_visits, 3);
        assert_eq!(all.unique_visitors, 2);
        assert_eq!(all.pages.get("/x"), Some(&2));
        assert_eq!(all.countries.get("NL"), Some(&3));

        let only_day2 = p
            .read_aggregate(&StatsQuery {
                from: Some(day2.date_naive()),
                to: Some(day2.date_naive()),
            })
            .await
            .unwrap();
        assert_eq!(only_day2.total_visits, 1);
        assert_eq!(only_day2.unique_visitors, 1);

        let daily = p.daily_stats().await.unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].total_visits, 2);
        assert_eq!(daily[0].unique_visitors, 1);
        assert_eq!(daily[1].date, day2.date_naive());
    }

    #[tokio::test]
    async fn test_uncommitted_writer_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;

        {
            let mut w = p.begin_write().await.unwrap();
            w.append(&event(p.site_id(), "aa", "/", Utc::now(), true)).await.unwrap();
        }

        let stats = p.read_aggregate(&StatsQuery::all()).await.unwrap();
        assert_eq!(stats.total_visits, 0);
        assert!(p.daily_stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;
        let mut w = p.begin_write().await.unwrap();
        w.append(&event(p.site_id(), "aa", "/", Utc::now(), true)).await.unwrap();
        w.commit().await.unwrap();

        assert!(sqlx::query("UPDATE events SET path = '/hacked'")
            .execute(&p.pool)
            .await
            .is_err());
        assert!(sqlx::query("DELETE FROM events").execute(&p.pool).await.is_err());
    }

    #[tokio::test]
    async fn test_visitor_activity_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let p = open(&dir, "s1").await;
        let visitor = VisitorId::from_hex("cc");
        let t0 = Utc::now();

        let mut w = p.begin_write().await.unwrap();
        w.record_activity(&visitor, t0, 0.0).await.unwrap();
        w.record_activity(&visitor, t0 + chrono::Duration::seconds(5), 0.5).await.unwrap();
        w.commit().await.unwrap();

        let activity = p.visitor_activity(&visitor).await.unwrap().unwrap();
        assert_eq!(activity.request_count, 2);
        assert_eq!(activity.ua_score, 0.5);
        assert!(activity.last_seen > activity.first_seen);
        assert!(p.visitor_activity(&VisitorId::from_hex("dd")).await.unwrap().is_none());
    }
}
