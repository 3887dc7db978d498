//! Deferred Stats Refresh
//!
//! Runs one delayed stats request on its own task and hands the outcome
//! back to the host tick through [`RefreshScheduler::drain`].
//!
//! A new `schedule_refresh` cancels whatever is pending or in flight; only
//! the newest generation can deliver an outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::StatsFetcher;
use crate::domain::stats::{StatsError, TradingStats};

/// Result of one completed refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Generation that produced this outcome.
    pub generation: u64,
    /// Owner as supplied to `schedule_refresh` (before normalization).
    pub owner: String,
    /// Decoded stats or a classified error.
    pub result: Result<TradingStats, StatsError>,
}

/// Cancel-and-replace scheduler for stats refreshes.
pub struct RefreshScheduler {
    fetcher: Arc<dyn StatsFetcher>,
    generation: Arc<AtomicU64>,
    pending: Option<(u64, CancellationToken)>,
    outcome_tx: mpsc::UnboundedSender<RefreshOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<RefreshOutcome>,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("pending", &self.pending.as_ref().map(|(generation, _)| generation))
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Create a scheduler issuing requests through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn StatsFetcher>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            generation: Arc::new(AtomicU64::new(0)),
            pending: None,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Wait `initial_delay`, then fetch stats for `owner` once.
    ///
    /// Supersedes any earlier refresh. Returns the new generation.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidRequest`] for an empty owner and
    /// [`StatsError::NoRuntime`] outside a tokio runtime. In both cases
    /// nothing is scheduled and any earlier refresh keeps running.
    pub fn schedule_refresh(
        &mut self,
        initial_delay: Duration,
        owner: &str,
    ) -> Result<u64, StatsError> {
        if owner.trim().is_empty() {
            return Err(StatsError::InvalidRequest(
                "account owner must not be empty".to_string(),
            ));
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| StatsError::NoRuntime)?;

        self.cancel_pending();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        self.pending = Some((generation, cancel.clone()));

        let fetcher = Arc::clone(&self.fetcher);
        let latest = Arc::clone(&self.generation);
        let outcome_tx = self.outcome_tx.clone();
        let owner = owner.to_string();

        tracing::debug!(
            generation,
            delay_ms = initial_delay.as_millis(),
            "Stats refresh scheduled"
        );

        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(initial_delay) => {}
            }

            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = fetcher.fetch(&owner) => result,
            };

            if cancel.is_cancelled() || latest.load(Ordering::SeqCst) != generation {
                return;
            }

            let _ = outcome_tx.send(RefreshOutcome {
                generation,
                owner,
                result,
            });
        });

        Ok(generation)
    }

    /// Collect outcomes delivered since the last call.
    ///
    /// Outcomes from superseded generations are discarded.
    pub fn drain(&mut self) -> Vec<RefreshOutcome> {
        let current = self.generation.load(Ordering::SeqCst);
        let mut outcomes = Vec::new();

        while let Ok(outcome) = self.outcome_rx.try_recv() {
            if outcome.generation != current {
                tracing::debug!(generation = outcome.generation, "Discarding superseded stats outcome");
                continue;
            }
            if self
                .pending
                .as_ref()
                .is_some_and(|(generation, _)| *generation == outcome.generation)
            {
                self.pending = None;
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Whether a refresh is scheduled or in flight and not yet drained.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Most recently issued generation (0 if none).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel any outstanding refresh.
    pub fn shutdown(&mut self) {
        if self.pending.is_some() {
            tracing::debug!("Cancelling outstanding stats refresh");
        }
        self.cancel_pending();
        // Bumping the generation keeps a request that already finished from
        // being drained after shutdown.
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_pending(&mut self) {
        if let Some((_, cancel)) = self.pending.take() {
            cancel.cancel();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

// =============================================================================
// Tests
// =============================================================================
