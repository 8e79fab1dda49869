//! Subscription Index
//!
//! Bookkeeping for downstream connections: which user owns each connection,
//! which topic instances exist, and which connections subscribe to each
//! instance.
//!
//! # Design
//!
//! The index tracks:
//! - Registered topic instances and their subscriber sets, grouped by kind
//! - Each connection's owner and its own set of subscribed instances
//! - Each user's set of open connections
//!
//! Every mutation keeps both directions consistent: a connection is in an
//! instance's subscriber set exactly when the instance is in the
//! connection's membership set. The index itself is not synchronized; the
//! subscription hub owns it behind a single lock.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::topic::{TopicKind, TopicParams};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream connection.
pub type ConnectionId = u64;

/// Identifier of a user owning downstream connections. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = InvalidUserId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 1 {
            return Err(InvalidUserId(value));
        }
        Ok(Self(value))
    }
}

impl From<UserId> for i64 {
    fn from(user: UserId) -> Self {
        user.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user identifier below 1 was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid userID: {0}")]
pub struct InvalidUserId(pub i64);

/// Per-connection bookkeeping.
#[derive(Debug)]
struct ConnectionEntry {
    user: UserId,
    topics: HashSet<TopicParams>,
}

/// Result of removing a connection.
#[derive(Debug, Clone)]
pub struct RemovedConnection {
    /// Owner of the removed connection.
    pub user: UserId,
    /// Topic instances the connection was subscribed to.
    pub topics: Vec<TopicParams>,
    /// Whether this was the user's last connection.
    pub user_removed: bool,
}

// =============================================================================
// Subscription Index
// =============================================================================

/// Topic, connection, and user index.
///
/// # Example
///
/// ```rust
/// use market_data_gateway::domain::subscription::{SubscriptionIndex, UserId};
/// use market_data_gateway::domain::topic::TopicParams;
///
/// let mut index = SubscriptionIndex::new();
/// let btc = TopicParams::order_book("BTCUSD", 1);
/// index.register_topic(btc.clone());
///
/// let user = UserId::try_from(42).unwrap();
/// index.add_connection(7, user);
/// index.subscribe(7, btc.clone()).unwrap();
/// assert_eq!(index.subscriber_count(&btc), 1);
///
/// // Disconnecting cascades to every subscriber set and the user index
/// let removed = index.remove_connection(7).unwrap();
/// assert!(removed.user_removed);
/// assert_eq!(index.subscriber_count(&btc), 0);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    /// Registered instances grouped by kind, mapping to subscriber sets.
    topics: HashMap<TopicKind, HashMap<TopicParams, HashSet<ConnectionId>>>,
    /// Live connections.
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Live connections per user.
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Topic instances
    // -------------------------------------------------------------------------

    /// Register a topic instance.
    ///
    /// Returns `true` if the instance was created, `false` if it already
    /// existed (its subscribers are left untouched).
    pub fn register_topic(&mut self, params: TopicParams) -> bool {
        let instances = self.topics.entry(params.kind()).or_default();
        if instances.contains_key(&params) {
            return false;
        }
        instances.insert(params, HashSet::new());
        true
    }

    /// Deregister a topic instance.
    ///
    /// Members lose the instance from their own membership sets as well.
    /// Returns the connections that were subscribed, or `None` if the
    /// instance did not exist.
    pub fn deregister_topic(&mut self, params: &TopicParams) -> Option<HashSet<ConnectionId>> {
        let kind = params.kind();
        let instances = self.topics.get_mut(&kind)?;
        let subscribers = instances.remove(params)?;
        if instances.is_empty() {
            self.topics.remove(&kind);
        }
        for id in &subscribers {
            if let Some(entry) = self.connections.get_mut(id) {
                entry.topics.remove(params);
            }
        }
        Some(subscribers)
    }

    /// Check whether a topic instance is registered.
    #[must_use]
    pub fn has_topic(&self, params: &TopicParams) -> bool {
        self.topics
            .get(&params.kind())
            .is_some_and(|instances| instances.contains_key(params))
    }

    // -------------------------------------------------------------------------
    // Connections and users
    // -------------------------------------------------------------------------

    /// Add a connection for a user, creating the user entry if needed.
    ///
    /// Returns `false` if the connection ID is already in use.
    pub fn add_connection(&mut self, id: ConnectionId, user: UserId) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            ConnectionEntry {
                user,
                topics: HashSet::new(),
            },
        );
        self.users.entry(user).or_default().insert(id);
        true
    }

    /// Remove a connection and everything indexed under it.
    ///
    /// The connection leaves every subscriber set it was in (the sets
    /// themselves stay registered) and its user's connection set; the user
    /// entry is dropped when that set becomes empty.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<RemovedConnection> {
        let entry = self.connections.remove(&id)?;

        for params in &entry.topics {
            if let Some(subscribers) = self
                .topics
                .get_mut(&params.kind())
                .and_then(|instances| instances.get_mut(params))
            {
                subscribers.remove(&id);
            }
        }

        let mut user_removed = false;
        if let Some(connections) = self.users.get_mut(&entry.user) {
            connections.remove(&id);
            if connections.is_empty() {
                self.users.remove(&entry.user);
                user_removed = true;
            }
        }

        Some(RemovedConnection {
            user: entry.user,
            topics: entry.topics.into_iter().collect(),
            user_removed,
        })
    }

    /// Owner of a connection.
    #[must_use]
    pub fn connection_user(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).map(|entry| entry.user)
    }

    /// Connections currently open for a user.
    #[must_use]
    pub fn user_connections(&self, user: UserId) -> Vec<ConnectionId> {
        self.users
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check whether a user entry exists.
    #[must_use]
    pub fn has_user(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe a connection to a registered topic instance.
    ///
    /// Returns `true` if the subscription is new, `false` if the connection
    /// was already subscribed.
    ///
    /// # Errors
    ///
    /// - `UnknownConnection` if the connection is not registered.
    /// - `UnknownTopic` if no instance of the kind is registered.
    /// - `UnknownTopicInstance` if the kind exists but not these parameters.
    ///
    /// The index is not modified on error.
    pub fn subscribe(
        &mut self,
        id: ConnectionId,
        params: TopicParams,
    ) -> Result<bool, SubscriptionError> {
        let Some(entry) = self.connections.get_mut(&id) else {
            return Err(SubscriptionError::UnknownConnection(id));
        };
        let kind = params.kind();
        let Some(instances) = self.topics.get_mut(&kind) else {
            return Err(SubscriptionError::UnknownTopic(kind));
        };
        let Some(subscribers) = instances.get_mut(&params) else {
            return Err(SubscriptionError::UnknownTopicInstance(params));
        };

        let inserted = subscribers.insert(id);
        entry.topics.insert(params);
        Ok(inserted)
    }

    /// Unsubscribe a connection from a topic instance.
    ///
    /// Returns `true` if a subscription was removed. Unknown connections and
    /// instances are a no-op.
    pub fn unsubscribe(&mut self, id: ConnectionId, params: &TopicParams) -> bool {
        let removed_from_set = self
            .topics
            .get_mut(&params.kind())
            .and_then(|instances| instances.get_mut(params))
            .is_some_and(|subscribers| subscribers.remove(&id));

        let removed_from_entry = self
            .connections
            .get_mut(&id)
            .is_some_and(|entry| entry.topics.remove(params));

        removed_from_set || removed_from_entry
    }

    /// Subscribers of a topic instance, or `None` if it is not registered.
    #[must_use]
    pub fn subscribers(&self, params: &TopicParams) -> Option<Vec<ConnectionId>> {
        self.topics
            .get(&params.kind())
            .and_then(|instances| instances.get(params))
            .map(|set| set.iter().copied().collect())
    }

    /// Number of subscribers of a topic instance (0 if not registered).
    #[must_use]
    pub fn subscriber_count(&self, params: &TopicParams) -> usize {
        self.topics
            .get(&params.kind())
            .and_then(|instances| instances.get(params))
            .map_or(0, HashSet::len)
    }

    /// Topic instances a connection is subscribed to.
    #[must_use]
    pub fn connection_topics(&self, id: ConnectionId) -> Vec<TopicParams> {
        self.connections
            .get(&id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Get index statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            topic_instances: self.topics.values().map(HashMap::len).sum(),
            subscriptions: self
                .topics
                .values()
                .flat_map(HashMap::values)
                .map(HashSet::len)
                .sum(),
            connections: self.connections.len(),
            users: self.users.len(),
        }
    }

    /// Verify bidirectional consistency of the index.
    #[cfg(test)]
    fn assert_consistent(&self) {
        for (kind, instances) in &self.topics {
            for (params, subscribers) in instances {
                assert_eq!(params.kind(), *kind);
                for id in subscribers {
                    let entry = self.connections.get(id).expect("subscriber is live");
                    assert!(entry.topics.contains(params), "membership missing");
                }
            }
        }
        for (id, entry) in &self.connections {
            for params in &entry.topics {
                assert!(
                    self.topics
                        .get(&params.kind())
                        .and_then(|i| i.get(params))
                        .is_some_and(|s| s.contains(id)),
                    "subscriber set missing connection"
                );
            }
            assert!(self.users.get(&entry.user).is_some_and(|s| s.contains(id)));
        }
        for connections in self.users.values() {
            assert!(!connections.is_empty(), "empty user entry");
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Index statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Registered topic instances.
    pub topic_instances: usize,
    /// Total (connection, instance) subscriptions.
    pub subscriptions: usize,
    /// Live connections.
    pub connections: usize,
    /// Users with at least one live connection.
    pub users: usize,
}

// =============================================================================
// Errors
// =============================================================================

/// Subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// No instance of this kind is registered.
    #[error("no such topic exists: {0}")]
    UnknownTopic(TopicKind),

    /// The kind exists but not with these parameters.
    #[error("this topic does not have such parameters: {0}")]
    UnknownTopicInstance(TopicParams),

    /// Connection is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

// =============================================================================
// Tests
// =============================================================================
