//! Status Read Service
//!
//! On-demand single/batch miner status, reusing the pool adapters with a
//! 30-second response cache and bounded per-id concurrency (§4.9).

pub mod routes;
pub mod service;

pub use routes::router;
pub use service::{StatusProjection, StatusReadService};
