//! SQLite storage: one isolated database per site
//!
//! Provides the partition registry and the per-partition write path used by
//! ingestion and pairing.

mod partition;
mod site_store;

pub use partition::*;
pub use site_store::*;
