//! Telemetry Hub Configuration Settings
//!
//! Configuration types for the telemetry hub, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::account::AccountId;

/// Default telemetry stream endpoint.
pub const DEFAULT_STREAM_URL: &str = "ws://192.168.56.1:8765";

/// Default trading stats endpoint.
pub const DEFAULT_STATS_URL: &str = "http://52.91.175.173/get_trading_data.php";

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Capacity of the buffer between the socket task and the pump.
    pub event_capacity: usize,
    /// Maximum time `close()` waits for the socket task to finish.
    pub close_timeout: Duration,
    /// Initial delay before an explicit reconnect.
    pub reconnect_delay_initial: Duration,
    /// Maximum delay between reconnects.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            event_capacity: 1024,
            close_timeout: Duration::from_secs(2),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Trading stats client settings.
#[derive(Debug, Clone)]
pub struct StatsSettings {
    /// Stats endpoint (`http://` or `https://`).
    pub api_url: String,
    /// Delay before the first stats request.
    pub initial_delay: Duration,
    /// Interval between automatic refreshes (zero = manual only).
    pub refresh_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Maximum attempts per request, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub retry_delay_initial: Duration,
    /// Maximum delay between retries.
    pub retry_delay_max: Duration,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_STATS_URL.to_string(),
            initial_delay: Duration::from_secs(2),
            refresh_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_delay_initial: Duration::from_millis(250),
            retry_delay_max: Duration::from_secs(5),
        }
    }
}

/// Externally supplied identity inputs. Read-only to the hub.
#[derive(Debug, Clone, Default)]
pub struct IdentitySettings {
    /// Account owner used for stats requests.
    pub account_owner: Option<String>,
    /// Numeric account whose telemetry is reported.
    pub account_id: Option<AccountId>,
}

/// Host loop and exporter settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Interval between pump ticks.
    pub tick_interval: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            metrics_port: 9091,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Stats client settings.
    pub stats: StatsSettings,
    /// Identity inputs.
    pub identity: IdentitySettings,
    /// Host loop settings.
    pub runtime: RuntimeSettings,
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint or identity variable is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint or identity variable is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let stream_defaults = StreamSettings::default();
        let stats_defaults = StatsSettings::default();
        let runtime_defaults = RuntimeSettings::default();

        let stream_url = env
            .string("TELEMETRY_STREAM_URL")
            .unwrap_or(stream_defaults.url);
        validate_scheme("TELEMETRY_STREAM_URL", &stream_url, &["ws://", "wss://"])?;

        let stats_url = env.string("STATS_API_URL").unwrap_or(stats_defaults.api_url);
        validate_scheme("STATS_API_URL", &stats_url, &["http://", "https://"])?;

        let stream = StreamSettings {
            url: stream_url,
            event_capacity: env
                .parse("TELEMETRY_EVENT_CAPACITY", stream_defaults.event_capacity)
                .max(1),
            close_timeout: env.millis("TELEMETRY_CLOSE_TIMEOUT_MS", stream_defaults.close_timeout),
            reconnect_delay_initial: env.millis(
                "TELEMETRY_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "TELEMETRY_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "TELEMETRY_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "TELEMETRY_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
        };

        let stats = StatsSettings {
            api_url: stats_url,
            initial_delay: env.millis("STATS_INITIAL_DELAY_MS", stats_defaults.initial_delay),
            refresh_interval: env.secs(
                "STATS_REFRESH_INTERVAL_SECS",
                stats_defaults.refresh_interval,
            ),
            request_timeout: env.nonzero_secs(
                "STATS_REQUEST_TIMEOUT_SECS",
                stats_defaults.request_timeout,
            ),
            max_attempts: env
                .parse("STATS_MAX_ATTEMPTS", stats_defaults.max_attempts)
                .max(1),
            retry_delay_initial: stats_defaults.retry_delay_initial,
            retry_delay_max: stats_defaults.retry_delay_max,
        };

        let account_owner = match env.string("ACCOUNT_OWNER") {
            Some(owner) if owner.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("ACCOUNT_OWNER".to_string()));
            }
            other => other,
        };

        let account_id = env
            .string("ACCOUNT_ID")
            .map(|raw| {
                raw.trim()
                    .parse::<AccountId>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "ACCOUNT_ID".to_string(),
                        value: raw.clone(),
                    })
            })
            .transpose()?;

        let runtime = RuntimeSettings {
            tick_interval: env.nonzero_millis(
                "TELEMETRY_TICK_INTERVAL_MS",
                runtime_defaults.tick_interval,
            ),
            metrics_port: env.parse("TELEMETRY_METRICS_PORT", runtime_defaults.metrics_port),
        };

        Ok(Self {
            stream,
            stats,
            identity: IdentitySettings {
                account_owner,
                account_id,
            },
            runtime,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn validate_scheme(key: &str, url: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let lower = url.to_ascii_lowercase();
    let valid = schemes
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len());

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: url.to_string(),
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    /// Like `secs`, but zero keeps the default.
    fn nonzero_secs(&self, key: &str, default: Duration) -> Duration {
        let value = self.secs(key, default);
        if value.is_zero() { default } else { value }
    }

    /// Like `millis`, but zero keeps the default.
    fn nonzero_millis(&self, key: &str, default: Duration) -> Duration {
        let value = self.millis(key, default);
        if value.is_zero() { default } else { value }
    }
}
