//! REST API handlers organized by domain.

pub mod health;
pub mod pairing;
pub mod site;
pub mod stats;
pub mod track;

pub use health::*;
pub use pairing::*;
pub use site::*;
pub use stats::*;
pub use track::*;
