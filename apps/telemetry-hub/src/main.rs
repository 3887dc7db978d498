//! Telemetry Hub Binary
//!
//! Connects to the account telemetry stream, reports balances for the
//! configured account and loads trading stats for the configured owner.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin telemetry-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Identity
//! - `ACCOUNT_OWNER`: Owner whose trading stats are loaded (stats disabled if unset)
//! - `ACCOUNT_ID`: Account whose balance is reported (all accounts if unset)
//!
//! ## Optional
//! - `TELEMETRY_STREAM_URL`: Telemetry WebSocket (default: ws://192.168.56.1:8765)
//! - `TELEMETRY_TICK_INTERVAL_MS`: Pump interval (default: 16)
//! - `TELEMETRY_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9091)
//! - `STATS_API_URL`: Stats endpoint (default: http://52.91.175.173/get_trading_data.php)
//! - `STATS_INITIAL_DELAY_MS`: Delay before the first stats load (default: 2000)
//! - `STATS_REFRESH_INTERVAL_SECS`: Periodic stats refresh, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::{Context, bail};
use telemetry_hub::infrastructure::backoff::{Backoff, BackoffConfig};
use telemetry_hub::infrastructure::metrics;
use telemetry_hub::infrastructure::telemetry;
use telemetry_hub::{
    AccountBroker, AccountId, AccountNotification, ConnectionState, RefreshOutcome,
    RefreshScheduler, StatsClient, StreamConnection, SubscriptionHandle, TelemetryConfig,
    init_metrics,
};
use tokio::signal;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize tracing")?;

    tracing::info!("Starting Telemetry Hub");

    let config = TelemetryConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.runtime.metrics_port != 0 {
        match init_metrics(config.runtime.metrics_port) {
            Ok(addr) => tracing::info!(addr = %addr, "Prometheus metrics listening"),
            Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
        }
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let broker = Arc::new(AccountBroker::new());
    let _balance_view = subscribe_balance_view(&broker, config.identity.account_id);

    let mut connection = StreamConnection::new(broker.clone(), &config.stream);
    connection
        .connect(&config.stream.url)
        .context("failed to start telemetry stream")?;

    let mut stats = match &config.identity.account_owner {
        Some(owner) => {
            let client = StatsClient::new(&config.stats).context("failed to build stats client")?;
            let mut scheduler = RefreshScheduler::new(Arc::new(client));
            scheduler.schedule_refresh(config.stats.initial_delay, owner)?;
            Some((scheduler, owner.clone()))
        }
        None => {
            tracing::warn!("ACCOUNT_OWNER not set, trading stats disabled");
            None
        }
    };

    let result = run_host_loop(&config, &broker, &mut connection, stats.as_mut(), &shutdown_token).await;

    connection.close().await;
    if let Some((scheduler, _)) = stats.as_mut() {
        scheduler.shutdown();
    }

    tracing::info!("Telemetry Hub stopped");
    result
}

/// Pump the stream and drain stats outcomes once per tick until shutdown.
async fn run_host_loop(
    config: &TelemetryConfig,
    broker: &AccountBroker,
    connection: &mut StreamConnection,
    mut stats: Option<&mut (RefreshScheduler, String)>,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(config.runtime.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut reconnect = Backoff::new(BackoffConfig::from_stream_settings(&config.stream));
    let mut reconnect_at: Option<Instant> = None;

    tracing::info!("Telemetry Hub ready");

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => return Ok(()),
            _ = tick.tick() => {}
        }

        let report = connection.pump();
        if report.frames_dropped > 0 {
            tracing::debug!(
                seen = report.frames_seen,
                dropped = report.frames_dropped,
                "Pump dropped frames"
            );
        }

        match report.state {
            ConnectionState::Open => reconnect.reset(),
            state if state.can_reconnect() => match reconnect_at {
                None => {
                    let Some(delay) = reconnect.next_delay() else {
                        bail!(
                            "telemetry stream unavailable after {} reconnect attempts",
                            reconnect.attempts()
                        );
                    };
                    tracing::info!(delay_ms = delay.as_millis(), state = %state, "Scheduling reconnect");
                    reconnect_at = Some(Instant::now() + delay);
                }
                Some(at) if Instant::now() >= at => {
                    reconnect_at = None;
                    connection
                        .connect(&config.stream.url)
                        .context("failed to restart telemetry stream")?;
                }
                Some(_) => {}
            },
            _ => {}
        }

        if let Some((scheduler, owner)) = stats.as_deref_mut() {
            for outcome in scheduler.drain() {
                report_stats(&outcome);
                if !config.stats.refresh_interval.is_zero() {
                    scheduler.schedule_refresh(config.stats.refresh_interval, owner)?;
                }
            }
        }

        metrics::set_broker_sizes(broker.account_count(), broker.subscriptions().len());
    }
}

/// Log the configured account's balance on every change.
fn subscribe_balance_view(broker: &AccountBroker, account_id: Option<AccountId>) -> SubscriptionHandle {
    broker.subscribe(account_id, |notification: &AccountNotification| match notification {
        AccountNotification::Account(snapshot) => {
            tracing::info!(
                account_id = snapshot.account_id,
                balance = %snapshot.balance,
                sequence = snapshot.sequence,
                "Account balance"
            );
        }
        AccountNotification::All(accounts) => {
            tracing::info!(accounts = accounts.len(), "Account telemetry updated");
            for snapshot in accounts.values() {
                tracing::debug!(
                    account_id = snapshot.account_id,
                    balance = %snapshot.balance,
                    sequence = snapshot.sequence,
                    "Account balance"
                );
            }
        }
    })
}

fn report_stats(outcome: &RefreshOutcome) {
    match &outcome.result {
        Ok(stats) => {
            tracing::info!(
                owner = %outcome.owner,
                profit_loss = %stats.profit_loss,
                trades = stats.number_of_trades,
                best_trade = %stats.best_trade,
                "Trading stats refreshed"
            );
            tracing::debug!("{stats}");
        }
        Err(e) => {
            tracing::warn!(
                owner = %outcome.owner,
                category = e.category().as_str(),
                message = %e.display_message(),
                "Trading stats unavailable"
            );
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &TelemetryConfig) {
    tracing::info!(
        stream_url = %config.stream.url,
        stats_url = %config.stats.api_url,
        tick_ms = config.runtime.tick_interval.as_millis(),
        metrics_port = config.runtime.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        account_owner = ?config.identity.account_owner,
        account_id = ?config.identity.account_id,
        refresh_secs = config.stats.refresh_interval.as_secs(),
        "Identity inputs"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
