//! Stream Supervisor
//!
//! Owns the reader tasks of every active pair. Each pair gets a child of the
//! root cancellation token so it can be stopped alone, and cancelling the
//! root stops everything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reader::{SessionSnapshot, SessionStatus, StreamReader};
use super::retry::RetryConfig;
use super::router::EventRouter;
use crate::application::ports::{PairStreams, QuoteSource};
use crate::domain::topic::TopicKind;

struct ReaderHandle {
    status: Arc<SessionStatus>,
    task: JoinHandle<()>,
}

struct PairReaders {
    cancel: CancellationToken,
    readers: Vec<ReaderHandle>,
}

/// Supervisor of per-pair upstream readers.
pub struct StreamSupervisor {
    source: Arc<dyn QuoteSource>,
    router: Arc<EventRouter>,
    retry: RetryConfig,
    root: CancellationToken,
    pairs: Mutex<HashMap<String, PairReaders>>,
}

impl StreamSupervisor {
    /// Create a supervisor whose readers descend from `root`.
    #[must_use]
    pub fn new(
        source: Arc<dyn QuoteSource>,
        router: Arc<EventRouter>,
        retry: RetryConfig,
        root: CancellationToken,
    ) -> Self {
        Self {
            source,
            router,
            retry,
            root,
            pairs: Mutex::new(HashMap::new()),
        }
    }

    /// Start one reader per data kind for `pair`.
    ///
    /// Returns `false` if the pair is already running or the supervisor is
    /// shutting down.
    pub fn start_pair(&self, pair: &str) -> bool {
        let mut pairs = self.pairs.lock();
        if pairs.contains_key(pair) {
            tracing::info!(pair = %pair, "Pair streams already running");
            return false;
        }
        if self.root.is_cancelled() {
            tracing::warn!(pair = %pair, "Supervisor is shutting down, not starting streams");
            return false;
        }

        let cancel = self.root.child_token();
        let readers = TopicKind::all()
            .iter()
            .map(|&kind| {
                let reader = StreamReader::new(
                    pair,
                    kind,
                    Arc::clone(&self.source),
                    Arc::clone(&self.router),
                    self.retry,
                    cancel.clone(),
                );
                ReaderHandle {
                    status: reader.status(),
                    task: tokio::spawn(reader.run()),
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(pair = %pair, readers = readers.len(), "Pair streams started");
        pairs.insert(pair.to_string(), PairReaders { cancel, readers });
        true
    }

    /// Cancel the readers of `pair` and forget them.
    ///
    /// Returns `None` if the pair was not running.
    pub fn stop_pair(&self, pair: &str) -> Option<StoppedPair> {
        let readers = self.pairs.lock().remove(pair)?;
        readers.cancel.cancel();
        tracing::info!(pair = %pair, "Pair streams stopping");

        Some(StoppedPair {
            pair: pair.to_string(),
            tasks: readers.readers.into_iter().map(|r| r.task).collect(),
        })
    }

    /// Cancel every reader and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let drained: Vec<_> = self.pairs.lock().drain().collect();
        let count = drained.len();

        for (pair, readers) in drained {
            StoppedPair {
                pair,
                tasks: readers.readers.into_iter().map(|r| r.task).collect(),
            }
            .wait()
            .await;
        }

        tracing::info!(pairs = count, "Stream supervisor stopped");
    }

    /// Status of every running reader, ordered by pair then kind.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self
            .pairs
            .lock()
            .values()
            .flat_map(|readers| readers.readers.iter().map(|r| r.status.snapshot()))
            .collect();
        sessions.sort_by(|a, b| a.pair.cmp(&b.pair).then(a.kind.cmp(&b.kind)));
        sessions
    }

    /// Pairs with running readers, sorted.
    #[must_use]
    pub fn active_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<_> = self.pairs.lock().keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Check whether a pair has running readers.
    #[must_use]
    pub fn is_running(&self, pair: &str) -> bool {
        self.pairs.lock().contains_key(pair)
    }
}

impl PairStreams for StreamSupervisor {
    fn start_streams(&self, pair: &str) -> bool {
        self.start_pair(pair)
    }

    fn stop_streams(&self, pair: &str) -> bool {
        self.stop_pair(pair).is_some()
    }
}

/// Readers of a stopped pair, awaitable until they have exited.
#[derive(Debug)]
pub struct StoppedPair {
    pair: String,
    tasks: Vec<JoinHandle<()>>,
}

impl StoppedPair {
    /// Pair that was stopped.
    #[must_use]
    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Wait for every reader of the pair to exit.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(pair = %self.pair, error = %e, "Stream reader task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream;

    use crate::application::ports::{UpstreamError, UpstreamStream};
    use crate::infrastructure::broadcast::SubscriptionHub;
    use crate::infrastructure::ingestion::ReaderPhase;

    /// Source whose streams never yield.
    #[derive(Default)]
    struct IdleSource {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for IdleSource {
        async fn open_stream(
            &self,
            _pair: &str,
            _kind: TopicKind,
        ) -> Result<UpstreamStream, UpstreamError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(stream::pending().boxed())
        }
    }

    fn supervisor(source: Arc<IdleSource>) -> StreamSupervisor {
        StreamSupervisor::new(
            source,
            Arc::new(EventRouter::new(Arc::new(SubscriptionHub::with_defaults()))),
            RetryConfig::new(Duration::from_millis(20), 0.0),
            CancellationToken::new(),
        )
    }

    async fn all_streaming(supervisor: &StreamSupervisor) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !supervisor
                .sessions()
                .iter()
                .all(|s| s.phase == ReaderPhase::Streaming)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("readers streaming");
    }

    #[tokio::test]
    async fn start_spawns_one_reader_per_kind() {
        let source = Arc::new(IdleSource::default());
        let supervisor = supervisor(Arc::clone(&source));

        assert!(supervisor.start_pair("BTCUSD"));
        all_streaming(&supervisor).await;

        let sessions = supervisor.sessions();
        assert_eq!(sessions.len(), 4);
        assert_eq!(
            sessions.iter().map(|s| s.kind).collect::<Vec<_>>(),
            TopicKind::all().to_vec()
        );
        assert_eq!(source.opens.load(Ordering::SeqCst), 4);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let source = Arc::new(IdleSource::default());
        let supervisor = supervisor(source);

        assert!(supervisor.start_pair("BTCUSD"));
        assert!(!supervisor.start_pair("BTCUSD"));
        assert_eq!(supervisor.sessions().len(), 4);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn stopping_one_pair_leaves_others_running() {
        let source = Arc::new(IdleSource::default());
        let supervisor = supervisor(source);
        supervisor.start_pair("BTCUSD");
        supervisor.start_pair("ETHUSD");
        all_streaming(&supervisor).await;

        let stopped = supervisor.stop_pair("BTCUSD").unwrap();
        assert_eq!(stopped.pair(), "BTCUSD");
        tokio::time::timeout(Duration::from_secs(1), stopped.wait())
            .await
            .expect("readers exit");

        assert_eq!(supervisor.active_pairs(), vec!["ETHUSD".to_string()]);
        let sessions = supervisor.sessions();
        assert_eq!(sessions.len(), 4);
        assert!(sessions.iter().all(|s| s.pair == "ETHUSD"));
        assert!(sessions.iter().all(|s| s.phase == ReaderPhase::Streaming));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn stop_unknown_pair_is_none() {
        let supervisor = supervisor(Arc::new(IdleSource::default()));
        assert!(supervisor.stop_pair("BTCUSD").is_none());
        assert!(!supervisor.stop_streams("BTCUSD"));
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_refuses_new_pairs() {
        let supervisor = supervisor(Arc::new(IdleSource::default()));
        supervisor.start_pair("BTCUSD");
        supervisor.start_pair("ETHUSD");

        tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .expect("shutdown completes");

        assert!(supervisor.active_pairs().is_empty());
        assert!(!supervisor.start_pair("SOLUSD"));
    }
}
