//! HTTP API for the analytics service

mod error;
pub mod handlers;
mod rest;
pub mod types;
mod utils;

pub use error::*;
pub use rest::*;
pub use utils::*;
