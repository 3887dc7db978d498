//! Trading Stats Adapter
//!
//! HTTP client for the aggregate stats endpoint and the deferred refresh
//! scheduler that drives it.

pub mod client;
pub mod scheduler;

pub use client::{StatsClient, decode_response};
pub use scheduler::{RefreshOutcome, RefreshScheduler};
