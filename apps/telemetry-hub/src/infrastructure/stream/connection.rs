//! Streaming Connection Manager
//!
//! Owns the lifecycle of the telemetry WebSocket and feeds decoded frames
//! into an [`AccountUpdateSink`].
//!
//! # Threading
//!
//! Socket I/O runs on a spawned tokio task that only forwards events over a
//! bounded channel. All state transitions and all decoding happen inside
//! [`StreamConnection::pump`], which the host calls once per tick.
//!
//! ```text
//! socket task ──Opened/Frame/Fault/Closed──► mpsc ──pump()──► FrameCodec ──► sink.apply()
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use crate::application::ports::AccountUpdateSink;
use crate::domain::account::Sequence;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the streaming connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    /// `connect` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket task ended without reporting why.
    #[error("stream task exited unexpectedly")]
    TaskExited,
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and receiving frames.
    Open,
    /// Teardown in progress.
    Closing,
    /// Closed by the caller or the server.
    Closed,
    /// Transport failure. Reconnect is the caller's decision.
    Faulted,
}

impl ConnectionState {
    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Faulted => "faulted",
        }
    }

    /// Numeric value for the state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::Closing => 3,
            Self::Closed => 4,
            Self::Faulted => 5,
        }
    }

    /// Whether a connection attempt is pending or live.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Whether an explicit reconnect is allowed.
    #[must_use]
    pub const fn can_reconnect(self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one `pump()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpReport {
    /// Frames read from the buffer.
    pub frames_seen: usize,
    /// Frames decoded and handed to the sink.
    pub frames_applied: usize,
    /// Frames dropped as malformed.
    pub frames_dropped: usize,
    /// Connection state after the pump.
    pub state: ConnectionState,
}

// =============================================================================
// Socket Task
// =============================================================================

#[derive(Debug)]
enum StreamEvent {
    Opened,
    Frame(Vec<u8>),
    Fault(StreamError),
    Closed { reason: Option<String> },
}

enum SessionEnd {
    Cancelled,
    Remote(Option<String>),
}

async fn run_socket(url: String, events: mpsc::Sender<StreamEvent>, cancel: CancellationToken) {
    match connect_and_run(&url, &events, &cancel).await {
        Ok(SessionEnd::Cancelled) => {
            tracing::debug!(url = %url, "Stream task cancelled");
        }
        Ok(SessionEnd::Remote(reason)) => {
            let _ = events.send(StreamEvent::Closed { reason }).await;
        }
        Err(e) => {
            let _ = events.send(StreamEvent::Fault(e)).await;
        }
    }
}

async fn connect_and_run(
    url: &str,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<SessionEnd, StreamError> {
    tracing::info!(url = %url, "Connecting to telemetry stream");

    let (ws_stream, _response) = tokio::select! {
        () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = tokio_tungstenite::connect_async(url) => result?,
    };

    // A closed channel means the owner is tearing down.
    if events.send(StreamEvent::Opened).await.is_err() {
        return Ok(SessionEnd::Cancelled);
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                if let Err(e) = write.close().await {
                    tracing::debug!(error = %e, "Close frame not delivered");
                }
                return Ok(SessionEnd::Cancelled);
            }
            msg = read.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Server sent close frame");
                        return Ok(SessionEnd::Remote(frame.map(|f| f.reason.as_str().to_owned())));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("WebSocket stream ended");
                        return Ok(SessionEnd::Remote(None));
                    }
                };

                if events.send(StreamEvent::Frame(frame)).await.is_err() {
                    return Ok(SessionEnd::Cancelled);
                }
            }
        }
    }
}

struct Session {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn abandon(self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Lifecycle manager for the telemetry stream.
///
/// At most one socket is live per manager. Dropping the manager cancels
/// the socket task.
pub struct StreamConnection {
    sink: Arc<dyn AccountUpdateSink>,
    codec: FrameCodec,
    event_capacity: usize,
    close_timeout: Duration,
    endpoint: Option<String>,
    state: ConnectionState,
    reconnect_attempts: u32,
    frame_ordinal: Sequence,
    session: Option<Session>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("frame_ordinal", &self.frame_ordinal)
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create a disconnected manager feeding `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AccountUpdateSink>, settings: &StreamSettings) -> Self {
        Self {
            sink,
            codec: FrameCodec::new(),
            event_capacity: settings.event_capacity.max(1),
            close_timeout: settings.close_timeout,
            endpoint: None,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            frame_ordinal: 0,
            session: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint of the most recent connection attempt.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Explicit reconnects since the last successful open.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Ordinal of the last frame read.
    #[must_use]
    pub const fn frame_ordinal(&self) -> Sequence {
        self.frame_ordinal
    }

    /// Begin connecting to `endpoint`.
    ///
    /// No-op while connecting or open. After `Faulted` or `Closed` this is a
    /// reconnect and bumps the attempt counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a WebSocket URL or no tokio
    /// runtime is available.
    pub fn connect(&mut self, endpoint: &str) -> Result<(), StreamError> {
        if self.state.is_active() {
            tracing::debug!(state = %self.state, "Connect ignored, connection already active");
            return Ok(());
        }

        let lower = endpoint.to_ascii_lowercase();
        if !(lower.starts_with("ws://") || lower.starts_with("wss://")) {
            return Err(StreamError::InvalidEndpoint(endpoint.to_string()));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;

        if let Some(stale) = self.session.take() {
            stale.abandon();
        }

        if self.state.can_reconnect() {
            self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
            metrics::record_reconnect();
            tracing::info!(
                attempt = self.reconnect_attempts,
                url = %endpoint,
                "Reconnecting to telemetry stream"
            );
        }

        let (tx, rx) = mpsc::channel(self.event_capacity);
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_socket(endpoint.to_string(), tx, cancel.clone()));

        self.session = Some(Session {
            events: rx,
            cancel,
            task,
        });
        self.endpoint = Some(endpoint.to_string());
        self.set_state(ConnectionState::Connecting);

        Ok(())
    }

    /// Drain buffered socket events and apply decoded frames.
    ///
    /// Only events present when the call starts are processed, so a flood
    /// of frames cannot stall the host tick.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();

        let (batch, task_finished) = match self.session.as_mut() {
            Some(session) => {
                let pending = session.events.len();
                let batch: Vec<StreamEvent> = (0..pending)
                    .map_while(|_| session.events.try_recv().ok())
                    .collect();
                let finished = session.task.is_finished() && session.events.is_empty();
                (batch, finished)
            }
            None => (Vec::new(), false),
        };

        for event in batch {
            self.handle_event(event, &mut report);
        }

        if task_finished && self.state.is_active() {
            self.fault(&StreamError::TaskExited);
        }

        if !self.state.is_active() && self.session.is_some() && task_finished {
            self.session = None;
        }

        if report.frames_seen > 0 {
            metrics::record_frames_received(report.frames_seen as u64);
        }

        report.state = self.state;
        report
    }

    /// Tear down the connection.
    ///
    /// Cancels the socket task (which sends a close frame when it can),
    /// discards undecoded frames, and waits up to the configured close
    /// timeout for the socket to be released. Repeated calls are harmless.
    /// A faulted connection stays `Faulted`.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            if self.state.is_active() {
                self.set_state(ConnectionState::Closed);
            }
            return;
        };

        let faulted = self.state == ConnectionState::Faulted;
        if !faulted {
            self.set_state(ConnectionState::Closing);
        }

        let Session {
            events,
            cancel,
            task,
        } = session;
        cancel.cancel();
        drop(events);

        let abort = task.abort_handle();
        match tokio::time::timeout(self.close_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Stream task failed during close"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.close_timeout.as_millis(),
                    "Stream task did not stop in time, aborting"
                );
                abort.abort();
            }
        }

        if !faulted {
            self.set_state(ConnectionState::Closed);
        }
        tracing::info!(state = %self.state, "Telemetry stream closed");
    }

    fn handle_event(&mut self, event: StreamEvent, report: &mut PumpReport) {
        match event {
            StreamEvent::Opened => {
                self.reconnect_attempts = 0;
                self.set_state(ConnectionState::Open);
                tracing::info!(url = ?self.endpoint, "Telemetry stream open");
            }
            StreamEvent::Frame(bytes) => {
                report.frames_seen += 1;
                self.frame_ordinal += 1;

                match self.codec.decode(&bytes, self.frame_ordinal) {
                    Ok(update) => {
                        let outcome = self.sink.apply(update);
                        metrics::record_apply(outcome.changed.len(), outcome.stale);
                        report.frames_applied += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            ordinal = self.frame_ordinal,
                            len = bytes.len(),
                            "Dropping malformed telemetry frame"
                        );
                        metrics::record_frame_dropped(e.kind());
                        report.frames_dropped += 1;
                    }
                }
            }
            StreamEvent::Fault(e) => self.fault(&e),
            StreamEvent::Closed { reason } => {
                tracing::info!(reason = ?reason, "Telemetry stream closed by server");
                if self.state != ConnectionState::Faulted {
                    self.set_state(ConnectionState::Closed);
                }
            }
        }
    }

    fn fault(&mut self, error: &StreamError) {
        tracing::error!(error = %error, url = ?self.endpoint, "Telemetry stream faulted");
        self.set_state(ConnectionState::Faulted);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Stream state change");
            self.state = state;
            metrics::set_connection_state(state);
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.abandon();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::application::ports::{ApplyOutcome, MockAccountUpdateSink};

    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            close_timeout: Duration::from_millis(200),
            ..StreamSettings::default()
        }
    }

    fn idle_sink() -> Arc<dyn AccountUpdateSink> {
        let mut sink = MockAccountUpdateSink::new();
        sink.expect_apply().never();
        Arc::new(sink)
    }

    /// Manager with an injected event channel instead of a socket task.
    fn with_events(
        sink: Arc<dyn AccountUpdateSink>,
        state: ConnectionState,
    ) -> (StreamConnection, mpsc::Sender<StreamEvent>) {
        let mut connection = StreamConnection::new(sink, &settings());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let task = tokio::spawn(async move { stopped.cancelled().await });
        connection.session = Some(Session {
            events: rx,
            cancel,
            task,
        });
        connection.state = state;
        (connection, tx)
    }

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Faulted.to_string(), "faulted");
        assert_eq!(ConnectionState::Closed.gauge_value(), 4);
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Closing.can_reconnect());
        assert!(ConnectionState::Faulted.can_reconnect());
    }

    #[test]
    fn new_connection_is_disconnected() {
        let connection = StreamConnection::new(idle_sink(), &settings());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.endpoint().is_none());
        assert_eq!(connection.reconnect_attempts(), 0);
    }

    #[test]
    fn connect_outside_runtime_fails() {
        let mut connection = StreamConnection::new(idle_sink(), &settings());
        let err = connection.connect("ws://127.0.0.1:1").unwrap_err();
        assert!(matches!(err, StreamError::NoRuntime));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_rejects_non_websocket_endpoint() {
        let mut connection = StreamConnection::new(idle_sink(), &settings());
        let err = connection.connect("http://example.com").unwrap_err();
        assert!(matches!(err, StreamError::InvalidEndpoint(_)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_connecting() {
        let mut connection = StreamConnection::new(idle_sink(), &settings());
        connection.connect("ws://127.0.0.1:9").unwrap();
        assert_eq!(connection.state(), ConnectionState::Connecting);

        connection.connect("ws://127.0.0.1:10").unwrap();
        assert_eq!(connection.endpoint(), Some("ws://127.0.0.1:9"));

        connection.close().await;
        assert!(!connection.state().is_active());
    }

    #[tokio::test]
    async fn malformed_frame_does_not_block_next() {
        let mut sink = MockAccountUpdateSink::new();
        sink.expect_apply()
            .withf(|update| update.get(&42).is_some_and(|s| s.sequence == 2))
            .times(1)
            .returning(|_| ApplyOutcome {
                changed: vec![42],
                stale: 0,
                notified: 1,
            });

        let (mut connection, tx) = with_events(Arc::new(sink), ConnectionState::Connecting);
        tx.send(StreamEvent::Opened).await.unwrap();
        tx.send(StreamEvent::Frame(b"{not json".to_vec())).await.unwrap();
        tx.send(StreamEvent::Frame(br#"{"42": {"balance": 10}}"#.to_vec()))
            .await
            .unwrap();

        let report = connection.pump();

        assert_eq!(report.frames_seen, 2);
        assert_eq!(report.frames_dropped, 1);
        assert_eq!(report.frames_applied, 1);
        assert_eq!(report.state, ConnectionState::Open);
        assert_eq!(connection.frame_ordinal(), 2);
    }

    #[tokio::test]
    async fn fault_event_moves_to_faulted() {
        let (mut connection, tx) = with_events(idle_sink(), ConnectionState::Open);
        tx.send(StreamEvent::Fault(StreamError::TaskExited))
            .await
            .unwrap();

        assert_eq!(connection.pump().state, ConnectionState::Faulted);

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn server_close_moves_to_closed() {
        let (mut connection, tx) = with_events(idle_sink(), ConnectionState::Open);
        tx.send(StreamEvent::Closed {
            reason: Some("bye".to_string()),
        })
        .await
        .unwrap();

        assert_eq!(connection.pump().state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn pump_without_session_is_empty() {
        let mut connection = StreamConnection::new(idle_sink(), &settings());
        let report = connection.pump();
        assert_eq!(report, PumpReport::default());
    }

    #[tokio::test]
    async fn close_discards_buffered_frames() {
        let (mut connection, tx) = with_events(idle_sink(), ConnectionState::Open);
        tx.send(StreamEvent::Frame(br#"{"1": {"balance": 1}}"#.to_vec()))
            .await
            .unwrap();

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(tx.is_closed());

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.pump().frames_seen, 0);
    }

    #[tokio::test]
    async fn reconnect_after_fault_counts_attempts() {
        let (mut connection, tx) = with_events(idle_sink(), ConnectionState::Open);
        tx.send(StreamEvent::Fault(StreamError::TaskExited))
            .await
            .unwrap();
        connection.pump();

        connection.connect("ws://127.0.0.1:9").unwrap();
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(connection.reconnect_attempts(), 1);
        assert!(tx.is_closed());

        connection.close().await;
    }
}
