//! Domain Layer - Core telemetry types and business rules.
//!
//! This layer contains the account snapshot model, the sequence-ordered
//! merge rule, and the subscription registry. It performs no I/O.

/// Account snapshots and the last-writer-wins-by-sequence merge.
pub mod account;

/// Subscriber registration and synchronous fan-out.
pub mod subscription;

/// Aggregate trading statistics and the stats fault taxonomy.
pub mod stats;
