//! Subscription Hub
//!
//! Owns every live downstream connection together with the subscription
//! index, and fans market data out to subscribers.
//!
//! # Architecture
//!
//! State lives behind a single `RwLock`: subscribe, unsubscribe, register
//! and disconnect take the write lock, broadcast takes the read lock only
//! long enough to resolve subscriber handles. The lock is never held while
//! writing to a transport.
//!
//! A broadcast serializes its payload once and spawns one dispatch task per
//! subscriber. Concurrent dispatches are capped by a semaphore; a dispatch
//! that finds no free permit is dropped and counted. Each write is bounded
//! by the configured write timeout.

mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub use connection::Connection;

use super::metrics;
use super::protocol::{
    ORDER_UPDATE_TOPIC, OrderUpdate, StatusAck, SubscriptionStatus, TopicBroadcast, encode,
};
use crate::BroadcastSettings;
use crate::application::ports::{Frame, MessageSink, TopicCatalog};
use crate::domain::market::Order;
use crate::domain::subscription::{
    ConnectionId, IndexStats, RemovedConnection, SubscriptionError, SubscriptionIndex, UserId,
};
use crate::domain::topic::{TopicError, TopicKind, TopicParams};

// =============================================================================
// Configuration
// =============================================================================

/// Fan-out configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Maximum dispatch tasks in flight across all connections.
    pub max_in_flight_dispatches: usize,
    /// Timeout for a single downstream write.
    pub write_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_in_flight_dispatches: 65_536,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            max_in_flight_dispatches: settings.max_in_flight_dispatches,
            write_timeout: settings.write_timeout,
        }
    }
}

// =============================================================================
// Subscription Hub
// =============================================================================

#[derive(Debug, Default)]
struct HubState {
    index: SubscriptionIndex,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

/// Connection registry and topic fan-out.
#[derive(Debug)]
pub struct SubscriptionHub {
    state: RwLock<HubState>,
    dispatch_permits: Arc<Semaphore>,
    config: BroadcastConfig,
}

impl SubscriptionHub {
    /// Create a hub with the given configuration.
    ///
    /// The dispatch cap is clamped to `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn new(mut config: BroadcastConfig) -> Self {
        config.max_in_flight_dispatches = config
            .max_in_flight_dispatches
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            state: RwLock::new(HubState::default()),
            dispatch_permits: Arc::new(Semaphore::new(config.max_in_flight_dispatches)),
            config,
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Topic Instances
    // =========================================================================

    /// Register a topic instance. Re-registering keeps existing subscribers.
    pub fn register_topic_instance(&self, params: TopicParams) -> bool {
        let created = self.state.write().index.register_topic(params.clone());
        if created {
            tracing::debug!(topic = %params, "Topic instance registered");
        }
        created
    }

    /// Remove a topic instance along with its subscriptions.
    pub fn deregister_topic_instance(&self, params: &TopicParams) -> bool {
        let removed = self.state.write().index.deregister_topic(params);
        match removed {
            Some(subscribers) => {
                tracing::debug!(
                    topic = %params,
                    dropped_subscribers = subscribers.len(),
                    "Topic instance deregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Check whether a topic instance is registered.
    #[must_use]
    pub fn has_topic_instance(&self, params: &TopicParams) -> bool {
        self.state.read().index.has_topic(params)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register a new downstream connection for a user.
    pub fn register_connection(&self, user: UserId, sink: Box<dyn MessageSink>) -> Arc<Connection> {
        let mut state = self.state.write();
        let id = loop {
            let candidate = Uuid::new_v4().as_u64_pair().0;
            if !state.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        let connection = Arc::new(Connection::new(id, user, sink, self.config.write_timeout));
        state.index.add_connection(id, user);
        state.connections.insert(id, Arc::clone(&connection));
        let stats = state.index.stats();
        drop(state);

        metrics::set_connections(stats.connections, stats.users);
        tracing::info!(connection_id = id, user_id = %user, "Connection registered");
        connection
    }

    /// Remove a connection and every subscription it holds.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<RemovedConnection> {
        let mut state = self.state.write();
        state.connections.remove(&id);
        let removed = state.index.remove_connection(id);
        let stats = state.index.stats();
        drop(state);

        if let Some(removed) = &removed {
            metrics::set_connections(stats.connections, stats.users);
            tracing::info!(
                connection_id = id,
                user_id = %removed.user,
                topics = removed.topics.len(),
                user_removed = removed.user_removed,
                "Connection removed"
            );
        }
        removed
    }

    /// Number of live connections of a user.
    #[must_use]
    pub fn user_connection_count(&self, user: UserId) -> usize {
        self.state.read().index.user_connections(user).len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a connection to the instance named by `topic` and `params`.
    ///
    /// On success the connection receives a `subscribed` acknowledgment.
    ///
    /// # Errors
    ///
    /// - `Topic` if the kind is unknown or the parameters are invalid.
    /// - `Subscription` if the instance is not registered.
    pub async fn subscribe(
        &self,
        connection: &Connection,
        topic: &str,
        params: &Value,
    ) -> Result<TopicParams, HubError> {
        let kind: TopicKind = topic.parse()?;
        let params = kind.parse_params(params)?;

        let inserted = self
            .state
            .write()
            .index
            .subscribe(connection.id(), params.clone())?;
        tracing::debug!(
            connection_id = connection.id(),
            topic = %params,
            inserted,
            "Subscribed"
        );

        self.acknowledge(connection, kind, SubscriptionStatus::Subscribed)
            .await;
        Ok(params)
    }

    /// Unsubscribe a connection from the instance named by `topic` and `params`.
    ///
    /// Unsubscribing from an instance the connection does not hold still
    /// acknowledges.
    ///
    /// # Errors
    ///
    /// Returns `Topic` if the kind is unknown or the parameters are invalid.
    pub async fn unsubscribe(
        &self,
        connection: &Connection,
        topic: &str,
        params: &Value,
    ) -> Result<TopicParams, HubError> {
        let kind: TopicKind = topic.parse()?;
        let params = kind.parse_params(params)?;

        let removed = self
            .state
            .write()
            .index
            .unsubscribe(connection.id(), &params);
        tracing::debug!(
            connection_id = connection.id(),
            topic = %params,
            removed,
            "Unsubscribed"
        );

        self.acknowledge(connection, kind, SubscriptionStatus::Unsubscribed)
            .await;
        Ok(params)
    }

    async fn acknowledge(&self, connection: &Connection, topic: TopicKind, status: SubscriptionStatus) {
        let frame = match encode(&StatusAck { topic, status }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode acknowledgment");
                return;
            }
        };
        if let Err(e) = connection.send(frame).await {
            tracing::warn!(
                connection_id = connection.id(),
                error = %e,
                "Failed to send acknowledgment"
            );
        }
    }

    /// Subscribe without sending an acknowledgment.
    #[cfg(test)]
    pub(crate) fn subscribe_silently(&self, id: ConnectionId, params: TopicParams) -> bool {
        self.state.write().index.subscribe(id, params).is_ok()
    }

    /// Topic instances a connection is subscribed to.
    #[must_use]
    pub fn connection_topics(&self, id: ConnectionId) -> Vec<TopicParams> {
        self.state.read().index.connection_topics(id)
    }

    /// Number of subscribers of a topic instance.
    #[must_use]
    pub fn subscriber_count(&self, params: &TopicParams) -> usize {
        self.state.read().index.subscriber_count(params)
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Broadcast a record to every subscriber of a topic instance.
    ///
    /// Returns the number of dispatches started. An unregistered instance or
    /// one without subscribers yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload cannot be encoded.
    pub fn broadcast<T: Serialize>(
        &self,
        params: &TopicParams,
        payload: &T,
    ) -> Result<usize, HubError> {
        let targets = self.subscribers_of(params);
        if targets.is_empty() {
            tracing::debug!(topic = %params, "No subscribers for broadcast");
            return Ok(0);
        }

        let kind = params.kind();
        let frame = encode(&TopicBroadcast {
            topic: kind,
            params: payload,
        })
        .map_err(HubError::Serialization)?;

        metrics::record_broadcast(kind.as_str());
        Ok(self.dispatch(kind.as_str(), &frame, targets))
    }

    /// Send an order update to every live connection of its user.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the order cannot be encoded.
    pub fn broadcast_to_user(&self, user: UserId, order: &Order) -> Result<usize, HubError> {
        let targets: Vec<_> = {
            let state = self.state.read();
            state
                .index
                .user_connections(user)
                .into_iter()
                .filter_map(|id| state.connections.get(&id).cloned())
                .collect()
        };
        if targets.is_empty() {
            tracing::debug!(user_id = %user, "No live connections for order update");
            return Ok(0);
        }

        let frame = encode(&OrderUpdate::new(order)).map_err(HubError::Serialization)?;
        metrics::record_broadcast(ORDER_UPDATE_TOPIC);
        Ok(self.dispatch(ORDER_UPDATE_TOPIC, &frame, targets))
    }

    /// Fan a batch of order updates out to their owners.
    ///
    /// Orders carrying an invalid user id are logged and skipped. Returns the
    /// total number of dispatches started.
    pub fn notify_order_updates(&self, orders: &[Order]) -> usize {
        orders
            .iter()
            .map(|order| {
                let user = match UserId::try_from(order.user_id) {
                    Ok(user) => user,
                    Err(e) => {
                        tracing::warn!(order_id = order.id, error = %e, "Skipping order update");
                        return 0;
                    }
                };
                self.broadcast_to_user(user, order).unwrap_or_else(|e| {
                    tracing::error!(order_id = order.id, error = %e, "Failed to encode order update");
                    0
                })
            })
            .sum()
    }

    fn subscribers_of(&self, params: &TopicParams) -> Vec<Arc<Connection>> {
        let state = self.state.read();
        state
            .index
            .subscribers(params)
            .map(|ids| {
                ids.into_iter()
                    .filter_map(|id| state.connections.get(&id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn dispatch(&self, topic: &'static str, frame: &Frame, targets: Vec<Arc<Connection>>) -> usize {
        let mut dispatched = 0;
        for connection in targets {
            let Ok(permit) = Arc::clone(&self.dispatch_permits).try_acquire_owned() else {
                tracing::warn!(
                    connection_id = connection.id(),
                    topic,
                    "Dispatch capacity exhausted, dropping message"
                );
                metrics::record_dispatch_dropped(topic);
                continue;
            };

            let frame = frame.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match connection.send(frame).await {
                    Ok(()) => metrics::record_message_sent(topic),
                    Err(e) => {
                        tracing::warn!(
                            connection_id = connection.id(),
                            user_id = %connection.user(),
                            topic,
                            error = %e,
                            "Dispatch failed"
                        );
                        metrics::record_dispatch_failure(topic);
                    }
                }
            });
            dispatched += 1;
        }
        dispatched
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.state.read().index.stats()
    }

    /// Dispatch permits currently free.
    #[must_use]
    pub fn available_dispatch_permits(&self) -> usize {
        self.dispatch_permits.available_permits()
    }
}

impl TopicCatalog for SubscriptionHub {
    fn register_topic_instance(&self, params: TopicParams) -> bool {
        Self::register_topic_instance(self, params)
    }

    fn deregister_topic_instance(&self, params: &TopicParams) -> bool {
        Self::deregister_topic_instance(self, params)
    }
}

/// Shared subscription hub reference.
pub type SharedSubscriptionHub = Arc<SubscriptionHub>;

/// Hub errors. Display text is sent to the client verbatim.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Unknown kind or bad parameters.
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// Instance is not registered.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Outbound payload could not be encoded.
    #[error("failed to encode message: {0}")]
    Serialization(#[source] serde_json::Error),
}

// =============================================================================
// Tests
// =============================================================================
