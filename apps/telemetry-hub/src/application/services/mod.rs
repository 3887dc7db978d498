//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `AccountBroker`: applies account updates and notifies subscribers

/// Account data broker.
pub mod broker;

pub use broker::{AccountBroker, SharedAccountBroker};
