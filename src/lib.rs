//! Visitor Analytics Library
//!
//! Privacy-preserving page-view analytics. Visitors are identified only by a
//! salted hash of their address, every site keeps its own storage partition,
//! and a site owner can pair a device to lock reads of their statistics to
//! requests signed with that device's Ed25519 key.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (sites, events, challenges, statistics)
//! - [`infra`] - Salt, per-site SQLite partitions, ingestion, collaborators
//! - [`auth`] - Pairing, signed-request verification, replay protection
//! - [`crypto`] - Hashing and Ed25519 signing
//! - [`metrics`] - In-process counters and histograms
//! - [`api`] - REST routes and handlers
//! - [`server`] - Configuration and bootstrap

pub mod api;
pub mod auth;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod migrations;
pub mod server;

// Re-export commonly used types
pub use domain::{
    DailyStats, Event, LockState, PairingChallenge, Site, SiteId, SiteStats, StatsQuery,
    StatsSummary, VisitorId,
};

pub use infra::{AnalyticsError, IngestionPath, Result, SiteStore};
