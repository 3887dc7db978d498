#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Telemetry Hub - Live Trading Account Telemetry Distribution
//!
//! Keeps one WebSocket connection to the account telemetry feed, holds the
//! latest snapshot per account, fans updates out to subscribers, and pulls
//! aggregate trading statistics over HTTP.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core telemetry types and rules
//!   - `account`: Account snapshots and the sequence merge rule
//!   - `subscription`: Subscriber registry and fan-out
//!   - `stats`: Trading stats and the stats fault taxonomy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Update sink and stats fetcher interfaces
//!   - `services`: The account broker
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: WebSocket lifecycle and frame codec
//!   - `stats`: Stats HTTP client and refresh scheduler
//!   - `backoff`: Exponential backoff with jitter
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Prometheus metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//! Telemetry WS ──► StreamConnection::pump ──► AccountBroker ──► Subscriber 1
//!                                                │          ──► Subscriber N
//!                                                └─ snapshot()
//!
//! RefreshScheduler ──delay──► StatsClient ──POST──► stats API
//!        └──────── drain() ◄── outcome ◄───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core telemetry types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::account::{AccountId, AccountMap, AccountSnapshot, Sequence};
pub use domain::stats::{FaultCategory, StatsError, TradingStats, normalize_owner};
pub use domain::subscription::{
    AccountNotification, SubscriptionHandle, SubscriptionId, SubscriptionRegistry,
    SubscriptionStats,
};

// Application
pub use application::ports::{AccountUpdateSink, ApplyOutcome, StatsFetcher};
pub use application::services::{AccountBroker, SharedAccountBroker};

// Stream adapter
pub use infrastructure::stream::{
    CodecError, ConnectionState, FrameCodec, PumpReport, StreamConnection, StreamError,
};

// Stats adapter
pub use infrastructure::stats::{RefreshOutcome, RefreshScheduler, StatsClient};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, IdentitySettings, RuntimeSettings, StatsSettings, StreamSettings,
    TelemetryConfig,
};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryGuard, TracingConfig, init as init_telemetry};
