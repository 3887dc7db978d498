//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Exponential backoff with jitter.
pub mod backoff;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Trading stats HTTP client and refresh scheduler.
pub mod stats;

/// Telemetry WebSocket connection and frame codec.
pub mod stream;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
