//! Infrastructure layer for the analytics service
//!
//! Contains trait definitions and implementations for:
//! - Per-site SQLite partitions and their registry
//! - Visitor identity (persisted salt, address hashing)
//! - Geo lookup (MaxMind GeoLite2 or a CIDR table) and visit classification
//! - The ingestion path
//! - Graceful shutdown

mod classify;
mod error;
mod geo;
mod identity;
mod ingest;
mod shutdown;
pub mod sqlite;
mod traits;

pub use classify::{HeuristicClassifier, UA_SCORE_BOT, UA_SCORE_SCRIPTED};
pub use error::*;
pub use geo::{
    CidrGeoLocator, MaxMindGeoLocator, UnknownGeoLocator, GEOLITE2_DATABASES, UNKNOWN_COUNTRY,
};
#[cfg(test)]
pub(crate) use geo::test_support as geo_test_support;
pub use identity::{IdentityHasher, Salt, SaltStore, SALT_FILE_NAME, SALT_LEN};
pub use ingest::{IngestionPath, TrackOutcome};
pub use shutdown::{shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal};
pub use sqlite::{Partition, PartitionWriter, SiteStore};
pub use traits::*;
