//! Configuration Module
//!
//! Configuration loading for the telemetry hub.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_STATS_URL, DEFAULT_STREAM_URL, IdentitySettings, RuntimeSettings,
    StatsSettings, StreamSettings, TelemetryConfig,
};
