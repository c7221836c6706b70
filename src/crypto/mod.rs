//! Cryptographic utilities for the analytics service
//!
//! Provides:
//! - Salted visitor address hashing
//! - Canonical request signing hash with domain separation
//! - Ed25519 pairing keys (verification server side, signing for the admin CLI)

mod hash;
mod signing;

pub use hash::*;
pub use signing::*;
