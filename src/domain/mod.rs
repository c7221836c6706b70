//! Domain models for the analytics service
//!
//! Sites, page-view events, pairing challenges and aggregate statistics.

mod event;
mod pairing;
mod site;
mod stats;
mod types;

pub use event::*;
pub use pairing::*;
pub use site::*;
pub use stats::*;
pub use types::*;
