//! Database module for the latency monitor.
//!
//! Provides SQLite storage with embedded migrations.

mod models;
mod stats;
mod store;

pub use models::*;
pub use stats::*;
pub use store::*;
