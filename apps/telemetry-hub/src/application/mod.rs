//! Application Layer - Services and port definitions.
//!
//! This layer contains the account broker and the port interfaces that
//! connect the domain to the stream and stats adapters.

/// Port interfaces for adapters (update sink, stats source).
pub mod ports;

/// Application services (account broker).
pub mod services;
