//! HTTP admin server for the cache hierarchy.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`metrics`]: Prometheus gauges refreshed at scrape time

pub mod api;
pub mod metrics;

pub use api::{build_router, AppState};
