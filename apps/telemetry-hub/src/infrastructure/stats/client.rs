//! Trading Stats HTTP Client
//!
//! Posts `{"username": ...}` to the stats endpoint and decodes the JSON
//! envelope into [`TradingStats`].
//!
//! # Response Envelope
//!
//! ```json
//! {"success": true, "profit_loss": 123.45, "average_profit_loss": 12.3,
//!  "number_of_trades": 10, "average_trade_duration": "1 hrs 5 min",
//!  "average_trade_volume": 2.5, "best_trade": 80.0}
//!
//! {"success": false, "message": "no data"}
//! ```

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::application::ports::StatsFetcher;
use crate::domain::stats::{StatsError, TradingStats, normalize_owner};
use crate::infrastructure::backoff::{Backoff, BackoffConfig};
use crate::infrastructure::config::StatsSettings;
use crate::infrastructure::metrics::{self, StatsOutcome};

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct StatsRequest<'a> {
    username: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatsEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    profit_loss: Option<Decimal>,
    #[serde(default)]
    average_profit_loss: Option<Decimal>,
    #[serde(default, deserialize_with = "trade_count")]
    number_of_trades: Option<u64>,
    #[serde(default)]
    average_trade_duration: Option<String>,
    #[serde(default)]
    average_trade_volume: Option<Decimal>,
    #[serde(default)]
    best_trade: Option<Decimal>,
}

/// Trade count as the backend may send it: a JSON integer or a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum TradeCount {
    Number(u64),
    Text(String),
}

fn trade_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<TradeCount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TradeCount::Number(n)) => Ok(Some(n)),
        Some(TradeCount::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid trade count {text:?}"))),
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, StatsError> {
    value.ok_or_else(|| StatsError::Decode(format!("missing field `{field}`")))
}

impl TryFrom<StatsEnvelope> for TradingStats {
    type Error = StatsError;

    fn try_from(envelope: StatsEnvelope) -> Result<Self, Self::Error> {
        if !envelope.success {
            return Err(StatsError::ServerReported {
                message: envelope.message.unwrap_or_default(),
            });
        }

        Ok(Self {
            profit_loss: required(envelope.profit_loss, "profit_loss")?,
            average_profit_loss: required(envelope.average_profit_loss, "average_profit_loss")?,
            number_of_trades: required(envelope.number_of_trades, "number_of_trades")?,
            average_trade_duration: required(
                envelope.average_trade_duration,
                "average_trade_duration",
            )?,
            average_trade_volume: required(envelope.average_trade_volume, "average_trade_volume")?,
            best_trade: required(envelope.best_trade, "best_trade")?,
        })
    }
}

/// Decode a stats response body.
///
/// # Errors
///
/// Returns [`StatsError::Decode`] for a malformed body and
/// [`StatsError::ServerReported`] when the server reports failure.
pub fn decode_response(body: &str) -> Result<TradingStats, StatsError> {
    let envelope: StatsEnvelope =
        serde_json::from_str(body).map_err(|e| StatsError::Decode(e.to_string()))?;
    TradingStats::try_from(envelope)
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the trading stats API with retry logic.
#[derive(Debug, Clone)]
pub struct StatsClient {
    client: Client,
    url: String,
    backoff: BackoffConfig,
    max_attempts: u32,
}

impl StatsClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &StatsSettings) -> Result<Self, StatsError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| StatsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: settings.api_url.clone(),
            backoff: BackoffConfig::from_stats_settings(settings),
            max_attempts: settings.max_attempts.max(1),
        })
    }

    /// Stats endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the statistics summary for `owner`.
    ///
    /// Transport failures and retryable statuses are retried with backoff
    /// up to the configured attempt limit.
    ///
    /// # Errors
    ///
    /// Returns a classified [`StatsError`]; an empty owner is rejected
    /// before any request is sent.
    pub async fn fetch_stats(&self, owner: &str) -> Result<TradingStats, StatsError> {
        if owner.trim().is_empty() {
            return Err(StatsError::InvalidRequest(
                "account owner must not be empty".to_string(),
            ));
        }

        let username = normalize_owner(owner);
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let result = self.request_with_retry(&username, request_id).await;

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                metrics::record_stats_request(StatsOutcome::Success, elapsed);
                tracing::info!(
                    request_id = %request_id,
                    elapsed_ms = elapsed.as_millis(),
                    "Trading stats loaded"
                );
            }
            Err(e) => {
                metrics::record_stats_request(StatsOutcome::from(e), elapsed);
                tracing::warn!(
                    request_id = %request_id,
                    category = e.category().as_str(),
                    error = %e,
                    "Trading stats request failed"
                );
            }
        }

        result
    }

    async fn request_with_retry(
        &self,
        username: &str,
        request_id: Uuid,
    ) -> Result<TradingStats, StatsError> {
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut attempt = 1;

        loop {
            match self.send_once(username, request_id).await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff.next_delay().unwrap_or(self.backoff.max_delay);
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Stats request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send_once(&self, username: &str, request_id: Uuid) -> Result<TradingStats, StatsError> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Request-Id", request_id.to_string())
            .json(&StatsRequest { username })
            .send()
            .await
            .map_err(|e| StatsError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatsError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| StatsError::Transport(e.to_string()))?;
        tracing::debug!(request_id = %request_id, body = %body, "Stats response body");

        decode_response(&body)
    }
}

#[async_trait]
impl StatsFetcher for StatsClient {
    async fn fetch(&self, owner: &str) -> Result<TradingStats, StatsError> {
        self.fetch_stats(owner).await
    }
}

// =============================================================================
// Tests
// =============================================================================
