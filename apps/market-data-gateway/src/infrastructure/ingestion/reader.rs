//! Stream Reader
//!
//! One reader owns one (pair, kind) upstream stream and drives it through an
//! explicit state machine:
//!
//! ```text
//! Connecting ──ok──▶ Streaming ──eof / transport error──▶ Backoff
//!     ▲   │                                                  │
//!     │   └────────────────open failed───────────────────────┤
//!     └─────────────────────interval elapsed─────────────────┘
//! ```
//!
//! `Cancelled` is terminal and reachable from every state. Every suspension
//! point is a biased select with cancellation first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryConfig, RetryPolicy};
use super::router::EventRouter;
use crate::application::ports::{QuoteSource, UpstreamError, UpstreamStream};
use crate::domain::topic::TopicKind;
use crate::infrastructure::metrics;

// =============================================================================
// Observable Status
// =============================================================================

/// Externally visible reader phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderPhase {
    /// Opening the upstream stream.
    Connecting,
    /// Receiving records.
    Streaming,
    /// Waiting before the next attempt.
    Backoff,
    /// Stopped for good.
    Cancelled,
}

impl ReaderPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Streaming,
            2 => Self::Backoff,
            _ => Self::Cancelled,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Streaming => 1,
            Self::Backoff => 2,
            Self::Cancelled => 3,
        }
    }
}

/// Live status of one reader, shared with health reporting.
#[derive(Debug)]
pub struct SessionStatus {
    pair: String,
    kind: TopicKind,
    phase: AtomicU8,
    reconnects: AtomicU64,
    messages_received: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SessionStatus {
    /// Create the status of a reader that has not started yet.
    #[must_use]
    pub fn new(pair: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            pair: pair.into(),
            kind,
            phase: AtomicU8::new(ReaderPhase::Connecting.as_u8()),
            reconnects: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ReaderPhase {
        ReaderPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Records received since the reader started.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Backoff cycles since the reader started.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn set_phase(&self, phase: ReaderPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    fn record_error(&self, error: &UpstreamError) {
        *self.last_error.lock() = Some(error.to_string());
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            pair: self.pair.clone(),
            kind: self.kind,
            phase: self.phase(),
            reconnects: self.reconnects(),
            messages_received: self.messages_received(),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Serializable reader status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Trading pair.
    pub pair: String,
    /// Data kind.
    pub kind: TopicKind,
    /// Current phase.
    pub phase: ReaderPhase,
    /// Backoff cycles so far.
    pub reconnects: u64,
    /// Records received so far.
    pub messages_received: u64,
    /// Most recent upstream failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// =============================================================================
// State Machine
// =============================================================================

enum ReaderState {
    Connecting,
    Streaming(UpstreamStream),
    Backoff,
    Cancelled,
}

impl ReaderState {
    const fn phase(&self) -> ReaderPhase {
        match self {
            Self::Connecting => ReaderPhase::Connecting,
            Self::Streaming(_) => ReaderPhase::Streaming,
            Self::Backoff => ReaderPhase::Backoff,
            Self::Cancelled => ReaderPhase::Cancelled,
        }
    }
}

/// Reader of one (pair, kind) upstream stream.
pub struct StreamReader {
    pair: String,
    kind: TopicKind,
    source: Arc<dyn QuoteSource>,
    router: Arc<EventRouter>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
}

impl StreamReader {
    /// Create a reader. Nothing happens until [`StreamReader::run`].
    #[must_use]
    pub fn new(
        pair: impl Into<String>,
        kind: TopicKind,
        source: Arc<dyn QuoteSource>,
        router: Arc<EventRouter>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        let pair = pair.into();
        let status = Arc::new(SessionStatus::new(pair.clone(), kind));
        Self {
            pair,
            kind,
            source,
            router,
            retry: RetryPolicy::new(retry),
            cancel,
            status,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Drive the state machine until cancelled.
    pub async fn run(mut self) {
        tracing::info!(pair = %self.pair, kind = %self.kind, "Stream reader started");

        let mut state = ReaderState::Connecting;
        loop {
            self.status.set_phase(state.phase());
            if matches!(state, ReaderState::Cancelled) {
                break;
            }
            state = self.step(state).await;
        }

        tracing::info!(
            pair = %self.pair,
            kind = %self.kind,
            messages = self.status.messages_received(),
            "Stream reader cancelled"
        );
    }

    async fn step(&mut self, state: ReaderState) -> ReaderState {
        match state {
            ReaderState::Connecting => self.connect().await,
            ReaderState::Streaming(stream) => self.receive(stream).await,
            ReaderState::Backoff => self.backoff().await,
            ReaderState::Cancelled => ReaderState::Cancelled,
        }
    }

    async fn connect(&mut self) -> ReaderState {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return ReaderState::Cancelled,
            opened = self.source.open_stream(&self.pair, self.kind) => opened,
        };

        match opened {
            Ok(stream) => {
                tracing::info!(
                    pair = %self.pair,
                    kind = %self.kind,
                    attempts = self.retry.attempt_count(),
                    "Upstream stream opened"
                );
                self.retry.reset();
                ReaderState::Streaming(stream)
            }
            Err(e) => {
                tracing::warn!(
                    pair = %self.pair,
                    kind = %self.kind,
                    error = %e,
                    "Failed to open upstream stream"
                );
                self.status.record_error(&e);
                ReaderState::Backoff
            }
        }
    }

    async fn receive(&mut self, mut stream: UpstreamStream) -> ReaderState {
        let next = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return ReaderState::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                self.status.messages_received.fetch_add(1, Ordering::Relaxed);
                metrics::record_upstream_message(self.kind.as_str());
                self.router.route(&self.pair, event);
                ReaderState::Streaming(stream)
            }
            Some(Err(e)) if e.is_record_error() => {
                tracing::warn!(
                    pair = %self.pair,
                    kind = %self.kind,
                    error = %e,
                    "Skipping undecodable record"
                );
                metrics::record_decode_error(self.kind.as_str());
                ReaderState::Streaming(stream)
            }
            Some(Err(e)) => {
                tracing::error!(
                    pair = %self.pair,
                    kind = %self.kind,
                    error = %e,
                    "Upstream stream failed"
                );
                self.status.record_error(&e);
                ReaderState::Backoff
            }
            None => {
                tracing::warn!(pair = %self.pair, kind = %self.kind, "Upstream stream ended");
                ReaderState::Backoff
            }
        }
    }

    async fn backoff(&mut self) -> ReaderState {
        let delay = self.retry.next_delay();
        self.status.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_stream_reconnect(self.kind.as_str());
        tracing::debug!(
            pair = %self.pair,
            kind = %self.kind,
            attempt = self.retry.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying upstream stream"
        );

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => ReaderState::Cancelled,
            () = tokio::time::sleep(delay) => ReaderState::Connecting,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;

    use crate::application::ports::UpstreamEvent;
    use crate::domain::market::Ticker;
    use crate::infrastructure::broadcast::SubscriptionHub;

    type Script = Result<Vec<Result<UpstreamEvent, UpstreamError>>, UpstreamError>;

    /// Source that replays one script entry per open and then hangs.
    struct ScriptedSource {
        scripts: Mutex<VecDeque<Script>>,
        opens: AtomicU64,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opens: AtomicU64::new(0),
            })
        }

        fn opens(&self) -> u64 {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        async fn open_stream(
            &self,
            _pair: &str,
            _kind: TopicKind,
        ) -> Result<UpstreamStream, UpstreamError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().pop_front() {
                Some(Ok(items)) => Ok(stream::iter(items).boxed()),
                Some(Err(e)) => Err(e),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn ticker() -> UpstreamEvent {
        UpstreamEvent::Ticker(Ticker {
            pair: "BTCUSD".to_string(),
            last_price: "1".to_string(),
            change: "0".to_string(),
            high_price: "1".to_string(),
            low_price: "1".to_string(),
            volume: "0".to_string(),
            turnover: "0".to_string(),
        })
    }

    fn connect_error() -> UpstreamError {
        UpstreamError::Connect {
            pair: "BTCUSD".to_string(),
            kind: TopicKind::Ticker,
            reason: "connection refused".to_string(),
        }
    }

    fn reader(source: Arc<ScriptedSource>, cancel: CancellationToken) -> StreamReader {
        let router = Arc::new(EventRouter::new(Arc::new(SubscriptionHub::with_defaults())));
        StreamReader::new(
            "BTCUSD",
            TopicKind::Ticker,
            source,
            router,
            RetryConfig::new(Duration::from_millis(20), 0.0),
            cancel,
        )
    }

    async fn wait_for(status: &SessionStatus, phase: ReaderPhase) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while status.phase() != phase {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("phase reached");
    }

    #[tokio::test]
    async fn failed_open_backs_off_and_recovers() {
        let source = ScriptedSource::new(vec![Err(connect_error()), Err(connect_error())]);
        let cancel = CancellationToken::new();
        let reader = reader(Arc::clone(&source), cancel.clone());
        let status = reader.status();
        let task = tokio::spawn(reader.run());

        wait_for(&status, ReaderPhase::Streaming).await;
        assert_eq!(source.opens(), 3);
        assert_eq!(status.reconnects(), 2);
        assert!(status.snapshot().last_error.unwrap().contains("connection refused"));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(status.phase(), ReaderPhase::Cancelled);
    }

    #[tokio::test]
    async fn decode_errors_are_skipped() {
        let source = ScriptedSource::new(vec![Ok(vec![
            Ok(ticker()),
            Err(UpstreamError::Decode("missing time".to_string())),
            Ok(ticker()),
        ])]);
        let cancel = CancellationToken::new();
        let reader = reader(Arc::clone(&source), cancel.clone());
        let status = reader.status();
        let task = tokio::spawn(reader.run());

        // After the scripted stream ends the reader reopens and hangs
        tokio::time::timeout(Duration::from_secs(2), async {
            while source.opens() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status.messages_received(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn transport_error_triggers_reconnect() {
        let source = ScriptedSource::new(vec![Ok(vec![
            Ok(ticker()),
            Err(UpstreamError::Transport("stream reset".to_string())),
            Ok(ticker()),
        ])]);
        let cancel = CancellationToken::new();
        let reader = reader(Arc::clone(&source), cancel.clone());
        let status = reader.status();
        let task = tokio::spawn(reader.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.opens() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status.messages_received(), 1);
        assert_eq!(status.reconnects(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let source = ScriptedSource::new(vec![Err(connect_error())]);
        let cancel = CancellationToken::new();
        let router = Arc::new(EventRouter::new(Arc::new(SubscriptionHub::with_defaults())));
        let reader = StreamReader::new(
            "BTCUSD",
            TopicKind::Ticker,
            Arc::clone(&source) as Arc<dyn QuoteSource>,
            router,
            RetryConfig::new(Duration::from_secs(3600), 0.0),
            cancel.clone(),
        );
        let status = reader.status();
        let task = tokio::spawn(reader.run());

        wait_for(&status, ReaderPhase::Backoff).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reader exits promptly")
            .unwrap();
        assert_eq!(source.opens(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_no_io() {
        let source = ScriptedSource::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        reader(Arc::clone(&source), cancel).run().await;

        assert_eq!(source.opens(), 0);
    }

    #[test]
    fn phase_round_trips_through_atomic() {
        for phase in [
            ReaderPhase::Connecting,
            ReaderPhase::Streaming,
            ReaderPhase::Backoff,
            ReaderPhase::Cancelled,
        ] {
            assert_eq!(ReaderPhase::from_u8(phase.as_u8()), phase);
        }
    }
}
