//! Pair Lifecycle
//!
//! Reacts to pair creation and deletion. Creating a pair registers every
//! topic instance it publishes to before its upstream readers start, so the
//! first records always find their instances. Deleting a pair stops the
//! readers first and only then drops the instances.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{PairStreams, TopicCatalog};
use crate::domain::market::{InvalidPairConfig, PairConfig};
use crate::domain::topic::TopicParams;
use crate::infrastructure::metrics;

/// Pair lifecycle use case.
pub struct PairLifecycleService {
    topics: Arc<dyn TopicCatalog>,
    streams: Arc<dyn PairStreams>,
    pairs: RwLock<HashMap<String, PairConfig>>,
}

impl PairLifecycleService {
    /// Create a new lifecycle service.
    #[must_use]
    pub fn new(topics: Arc<dyn TopicCatalog>, streams: Arc<dyn PairStreams>) -> Self {
        Self {
            topics,
            streams,
            pairs: RwLock::new(HashMap::new()),
        }
    }

    /// Activate a newly created pair.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration fails validation.
    /// - `AlreadyActive` if the pair is already active.
    /// - `StreamsUnavailable` if its readers could not be started. Instances
    ///   registered by this call are removed again.
    pub fn on_pair_created(&self, config: PairConfig) -> Result<(), LifecycleError> {
        config.validate()?;

        let mut pairs = self.pairs.write();
        if pairs.contains_key(&config.pair) {
            return Err(LifecycleError::AlreadyActive(config.pair));
        }

        let topics = TopicParams::for_pair(&config);
        let topic_count = topics.len();
        let registered: Vec<_> = topics
            .into_iter()
            .filter(|params| self.topics.register_topic_instance(params.clone()))
            .collect();

        if !self.streams.start_streams(&config.pair) {
            for params in &registered {
                self.topics.deregister_topic_instance(params);
            }
            tracing::warn!(
                pair = %config.pair,
                topics = registered.len(),
                "Pair streams not started, rolled back topic instances"
            );
            return Err(LifecycleError::StreamsUnavailable(config.pair));
        }

        tracing::info!(
            pair = %config.pair,
            precisions = ?config.price_precisions,
            timeframes = ?config.timeframes,
            topics = topic_count,
            "Pair activated"
        );

        pairs.insert(config.pair.clone(), config);
        metrics::set_active_pairs(pairs.len());
        Ok(())
    }

    /// Deactivate a deleted pair.
    ///
    /// The supplied configuration is authoritative: readers are stopped and
    /// its topic instances removed even if the pair was not tracked here.
    /// Returns `true` if the pair was active.
    pub fn on_pair_deleted(&self, config: &PairConfig) -> bool {
        let mut pairs = self.pairs.write();
        let was_active = pairs.remove(&config.pair).is_some();

        self.streams.stop_streams(&config.pair);
        let removed = TopicParams::for_pair(config)
            .iter()
            .filter(|params| self.topics.deregister_topic_instance(params))
            .count();

        tracing::info!(
            pair = %config.pair,
            was_active,
            topics = removed,
            "Pair deactivated"
        );

        metrics::set_active_pairs(pairs.len());
        was_active
    }

    /// Deactivate an active pair by key, using its stored configuration.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPair` if the pair is not active.
    pub fn delete_pair(&self, pair: &str) -> Result<PairConfig, LifecycleError> {
        let config = self
            .pairs
            .read()
            .get(pair)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownPair(pair.to_string()))?;

        self.on_pair_deleted(&config);
        Ok(config)
    }

    /// Activate every configured pair at startup.
    ///
    /// Invalid or duplicate entries are logged and skipped. Returns the
    /// number of pairs activated.
    pub fn bootstrap(&self, configs: impl IntoIterator<Item = PairConfig>) -> usize {
        let mut activated = 0;
        for config in configs {
            let pair = config.pair.clone();
            match self.on_pair_created(config) {
                Ok(()) => activated += 1,
                Err(e) => tracing::warn!(pair = %pair, error = %e, "Skipping configured pair"),
            }
        }
        activated
    }

    /// Configuration of every active pair.
    #[must_use]
    pub fn active_pairs(&self) -> Vec<PairConfig> {
        let mut pairs: Vec<_> = self.pairs.read().values().cloned().collect();
        pairs.sort_by(|a, b| a.pair.cmp(&b.pair));
        pairs
    }

    /// Check whether a pair is active.
    #[must_use]
    pub fn is_active(&self, pair: &str) -> bool {
        self.pairs.read().contains_key(pair)
    }
}

/// Pair lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// Configuration failed validation.
    #[error(transparent)]
    InvalidConfig(#[from] InvalidPairConfig),

    /// Pair is already active.
    #[error("pair {0} is already active")]
    AlreadyActive(String),

    /// Pair is not active.
    #[error("pair {0} is not active")]
    UnknownPair(String),

    /// Upstream readers for the pair could not be started.
    #[error("streams for pair {0} could not be started")]
    StreamsUnavailable(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use mockall::Sequence;

    use crate::application::ports::{MockPairStreams, MockTopicCatalog};

    fn btcusd() -> PairConfig {
        PairConfig::new("BTCUSD", vec![0, 1], vec!["1m".to_string()])
    }

    fn service(topics: MockTopicCatalog, streams: MockPairStreams) -> PairLifecycleService {
        PairLifecycleService::new(Arc::new(topics), Arc::new(streams))
    }

    #[test]
    fn created_pair_registers_topics_before_starting_readers() {
        let mut seq = Sequence::new();
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();

        topics
            .expect_register_topic_instance()
            .times(5)
            .in_sequence(&mut seq)
            .return_const(true);
        streams
            .expect_start_streams()
            .withf(|pair| pair == "BTCUSD")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);

        let service = service(topics, streams);
        service.on_pair_created(btcusd()).unwrap();

        assert!(service.is_active("BTCUSD"));
        assert_eq!(service.active_pairs(), vec![btcusd()]);
    }

    #[test]
    fn invalid_pair_is_rejected_without_side_effects() {
        let service = service(MockTopicCatalog::new(), MockPairStreams::new());

        let err = service
            .on_pair_created(PairConfig::new("BTCUSD", vec![], vec![]))
            .unwrap_err();

        assert!(matches!(err, LifecycleError::InvalidConfig(_)));
        assert!(!service.is_active("BTCUSD"));
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();
        topics.expect_register_topic_instance().return_const(true);
        streams.expect_start_streams().times(1).return_const(true);

        let service = service(topics, streams);
        service.on_pair_created(btcusd()).unwrap();

        assert_eq!(
            service.on_pair_created(btcusd()),
            Err(LifecycleError::AlreadyActive("BTCUSD".to_string()))
        );
    }

    #[test]
    fn failed_start_rolls_back_new_instances() {
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();

        // The depth-0 book already existed and must survive the rollback
        topics
            .expect_register_topic_instance()
            .times(5)
            .returning(|params| params != TopicParams::order_book("BTCUSD", 0));
        streams.expect_start_streams().times(1).return_const(false);
        topics
            .expect_deregister_topic_instance()
            .withf(|params| *params != TopicParams::order_book("BTCUSD", 0))
            .times(4)
            .return_const(true);

        let service = service(topics, streams);

        assert_eq!(
            service.on_pair_created(btcusd()),
            Err(LifecycleError::StreamsUnavailable("BTCUSD".to_string()))
        );
        assert!(!service.is_active("BTCUSD"));
        assert!(service.active_pairs().is_empty());
    }

    #[test]
    fn deleted_pair_stops_readers_before_dropping_topics() {
        let mut seq = Sequence::new();
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();

        topics.expect_register_topic_instance().return_const(true);
        streams.expect_start_streams().return_const(true);
        streams
            .expect_stop_streams()
            .withf(|pair| pair == "BTCUSD")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        topics
            .expect_deregister_topic_instance()
            .times(5)
            .in_sequence(&mut seq)
            .return_const(true);

        let service = service(topics, streams);
        service.on_pair_created(btcusd()).unwrap();

        let config = service.delete_pair("BTCUSD").unwrap();

        assert_eq!(config, btcusd());
        assert!(!service.is_active("BTCUSD"));
    }

    #[test]
    fn delete_unknown_pair_fails() {
        let service = service(MockTopicCatalog::new(), MockPairStreams::new());
        assert_eq!(
            service.delete_pair("ETHUSD"),
            Err(LifecycleError::UnknownPair("ETHUSD".to_string()))
        );
    }

    #[test]
    fn deletion_with_explicit_config_applies_even_if_untracked() {
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();
        streams.expect_stop_streams().times(1).return_const(false);
        topics
            .expect_deregister_topic_instance()
            .times(5)
            .return_const(false);

        let service = service(topics, streams);

        assert!(!service.on_pair_deleted(&btcusd()));
    }

    #[test]
    fn bootstrap_skips_invalid_entries() {
        let mut topics = MockTopicCatalog::new();
        let mut streams = MockPairStreams::new();
        topics.expect_register_topic_instance().return_const(true);
        streams.expect_start_streams().times(2).return_const(true);

        let service = service(topics, streams);
        let activated = service.bootstrap([
            btcusd(),
            PairConfig::new("", vec![0], vec![]),
            PairConfig::new("ETHUSD", vec![2], vec![]),
            btcusd(),
        ]);

        assert_eq!(activated, 2);
        assert_eq!(service.active_pairs().len(), 2);
    }
}
