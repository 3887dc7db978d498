//! Port Interfaces
//!
//! Defines the interfaces (ports) between the telemetry core and its
//! adapters following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AccountUpdateSink`: where the stream connection hands decoded updates
//! - `StatsFetcher`: request/response source of aggregate trading stats

use async_trait::async_trait;

use crate::domain::account::{AccountId, AccountMap};
use crate::domain::stats::{StatsError, TradingStats};

/// Result of applying one decoded update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Accounts whose snapshot changed, ascending.
    pub changed: Vec<AccountId>,
    /// Entries discarded as stale or duplicate.
    pub stale: usize,
    /// Subscriber callbacks invoked.
    pub notified: usize,
}

/// Consumer of decoded account updates.
///
/// Exactly one producer (the stream pump) calls `apply`.
#[cfg_attr(test, mockall::automock)]
pub trait AccountUpdateSink: Send + Sync {
    /// Merge a decoded update and fan it out.
    fn apply(&self, update: AccountMap) -> ApplyOutcome;
}

/// Source of aggregate trading statistics for one account owner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsFetcher: Send + Sync {
    /// Fetch the statistics summary for `owner`.
    async fn fetch(&self, owner: &str) -> Result<TradingStats, StatsError>;
}
