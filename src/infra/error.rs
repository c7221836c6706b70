//! Error types for the analytics infrastructure

use thiserror::Error;

use crate::auth::AuthError;
use crate::domain::{SiteId, SiteIdError};

/// Errors that can occur in the analytics infrastructure
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Partition schema could not be applied
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed site identifier
    #[error("invalid site id: {0}")]
    InvalidSiteId(#[from] SiteIdError),

    /// Malformed request input
    #[error("validation error: {0}")]
    Validation(String),

    /// Authentication or pairing rejection
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Stored site row violates the lock/key invariant
    #[error("corrupt site record for {site_id}: {message}")]
    CorruptSiteRecord { site_id: SiteId, message: String },

    /// Salt file unreadable or malformed
    #[error("salt error: {0}")]
    Salt(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalyticsError {
    /// Storage-level failure of a single partition.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            AnalyticsError::Database(_)
                | AnalyticsError::Migration(_)
                | AnalyticsError::Io(_)
                | AnalyticsError::CorruptSiteRecord { .. }
        )
    }
}

/// Result type for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;
