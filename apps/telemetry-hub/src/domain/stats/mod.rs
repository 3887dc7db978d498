//! Aggregate Trading Statistics
//!
//! Decoded statistics summary for one account owner and the fault
//! taxonomy surfaced by the stats pull path.

use std::fmt;

use rust_decimal::Decimal;

// =============================================================================
// Trading Stats
// =============================================================================

/// Aggregate statistics summary returned by the stats API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingStats {
    /// Total profit or loss.
    pub profit_loss: Decimal,
    /// Average profit or loss per trade.
    pub average_profit_loss: Decimal,
    /// Number of closed trades.
    pub number_of_trades: u64,
    /// Average trade duration, pre-formatted by the server for display
    /// (for example `"2 hrs 5 min"`).
    pub average_trade_duration: String,
    /// Average traded volume.
    pub average_trade_volume: Decimal,
    /// Best single trade result.
    pub best_trade: Decimal,
}

impl fmt::Display for TradingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trading Stats:")?;
        writeln!(f, "  Profit/Loss: {}", self.profit_loss)?;
        writeln!(f, "  Avg Profit/Loss: {}", self.average_profit_loss)?;
        writeln!(f, "  Number of Trades: {}", self.number_of_trades)?;
        writeln!(f, "  Avg Duration: {}", self.average_trade_duration)?;
        writeln!(f, "  Avg Volume: {}", self.average_trade_volume)?;
        write!(f, "  Best Trade: {}", self.best_trade)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Fault category used by callers to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    /// No response was obtained (connection, DNS, timeout, HTTP status).
    Transport,
    /// The server answered with `success = false`.
    ServerReported,
    /// The response body could not be decoded.
    Decode,
}

impl FaultCategory {
    /// Metric/log label for this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::ServerReported => "server_reported",
            Self::Decode => "decode",
        }
    }
}

/// Errors surfaced by a stats request. None of them are fatal; a later
/// refresh may succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    /// Request failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server responded with a non-success HTTP status.
    #[error("unexpected HTTP status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Server reported a failure (`success = false`).
    #[error("server reported failure: {message}")]
    ServerReported {
        /// Message from the server, verbatim.
        message: String,
    },

    /// Response body was not valid JSON or lacked a required field.
    #[error("decode error: {0}")]
    Decode(String),

    /// Request input was rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No async runtime is available to run the request.
    #[error("no tokio runtime available to run the stats refresh")]
    NoRuntime,
}

impl StatsError {
    /// Classify the error for display.
    #[must_use]
    pub const fn category(&self) -> FaultCategory {
        match self {
            Self::Transport(_)
            | Self::Status { .. }
            | Self::InvalidRequest(_)
            | Self::NoRuntime => FaultCategory::Transport,
            Self::ServerReported { .. } => FaultCategory::ServerReported,
            Self::Decode(_) => FaultCategory::Decode,
        }
    }

    /// Short message suitable for an end-user display surface.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::Transport(detail) => format!("Connection error: {detail}"),
            Self::Status { status } => format!("Connection error: HTTP {status}"),
            Self::ServerReported { message } => format!("Error: {message}"),
            Self::Decode(_) => "Error processing the server response".to_string(),
            Self::InvalidRequest(_) => {
                "No account owner configured. Please sign in again.".to_string()
            }
            Self::NoRuntime => "Connection error: stats refresh unavailable".to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status } => matches!(*status, 408 | 429 | 500..=599),
            Self::ServerReported { .. }
            | Self::Decode(_)
            | Self::InvalidRequest(_)
            | Self::NoRuntime => false,
        }
    }
}

// =============================================================================
// Owner Normalization
// =============================================================================

/// Normalize an account owner for transmission: every `.` becomes a space.
#[must_use]
pub fn normalize_owner(owner: &str) -> String {
    owner.replace('.', " ")
}

// =============================================================================
// Tests
// =============================================================================
