use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as SubscriptionEntry;
use dashmap::DashMap;
use log::{debug, info, warn};
use smallvec::SmallVec;
use crate::hub::net::connection::Connection;
use crate::hub::types::{ConnectionId, ConversationId, TopicKey};
use crate::wire::message::Frame;

/// Subscription set of one topic
pub type Members = HashMap<ConnectionId, Arc<dyn Connection>>;

/// Outcome of one [`TopicRegistry::publish`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Maps topics to their subscribed connections.
///
/// Every topic key is its own locked region; a publish snapshots the set,
/// sends without holding the lock and evicts failures after the full pass.
/// Topic entries are kept once created, so an emptied chat room stays known.
///
/// Lock order is topic entry, then subscription entry.
pub struct TopicRegistry {
    topics: DashMap<TopicKey, Members>,
    // topics of each connection that has a close hook installed
    subscriptions: DashMap<ConnectionId, HashSet<TopicKey>>,
    this: Weak<TopicRegistry>,
}

impl TopicRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            this: this.clone(),
        })
    }

    /// Adds a connection to a topic. Returns false if it was already a member.
    ///
    /// The first join of a connection to any topic installs a single close
    /// hook that removes it from every topic it is in at close time.
    pub fn join(&self, topic: TopicKey, conn: Arc<dyn Connection>) -> bool {
        let id = conn.id();

        let (added, first_seen) = {
            let mut members = self.topics.entry(topic).or_default();
            match members.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(conn.clone());
                    let first_seen = match self.subscriptions.entry(id) {
                        SubscriptionEntry::Vacant(slot) => {
                            slot.insert(HashSet::from([topic]));
                            true
                        }
                        SubscriptionEntry::Occupied(mut slot) => {
                            slot.get_mut().insert(topic);
                            false
                        }
                    };
                    (true, first_seen)
                }
                Entry::Occupied(_) => (false, false),
            }
        };

        if !added {
            debug!("Connection {} already subscribed to {}", id, topic);
            return false;
        }

        info!("Connection {} joined {}", id, topic);
        if first_seen {
            let registry = self.this.clone();
            conn.on_close(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.forget(id);
                }
            }));
        }
        true
    }

    /// Removes a connection from a topic. Absent connections are a no-op.
    pub fn leave(&self, topic: TopicKey, id: ConnectionId) -> bool {
        let removed = match self.topics.get_mut(&topic) {
            Some(mut members) => {
                let removed = members.remove(&id).is_some();
                if removed {
                    if let Some(mut topics) = self.subscriptions.get_mut(&id) {
                        topics.remove(&topic);
                    }
                }
                removed
            }
            None => false,
        };

        if removed {
            info!("Connection {} left {}", id, topic);
        } else {
            debug!("Connection {} was not subscribed to {}", id, topic);
        }
        removed
    }

    /// Sends a frame to every current member of a topic.
    ///
    /// Members whose send fails are removed and closed once every member
    /// has been tried.
    pub fn publish(&self, topic: TopicKey, frame: &Frame) -> PublishReport {
        let members: Vec<Arc<dyn Connection>> = match self.topics.get(&topic) {
            Some(members) => members.values().cloned().collect(),
            None => {
                debug!("No subscribers for {}", topic);
                return PublishReport::default();
            }
        };

        debug!("Publishing {} bytes to {} members of {}", frame.len(), members.len(), topic);

        let mut report = PublishReport::default();
        let mut failed: SmallVec<[Arc<dyn Connection>; 4]> = SmallVec::new();
        for conn in members {
            match conn.send(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Send to {} on {} failed: {}", conn.id(), topic, e);
                    failed.push(conn);
                }
            }
        }

        for conn in failed {
            if self.leave(topic, conn.id()) {
                report.evicted += 1;
            }
            conn.close();
        }

        debug!("Publish to {} completed: {:?}", topic, report);
        report
    }

    pub fn contains(&self, topic: TopicKey, id: ConnectionId) -> bool {
        self.topics
            .get(&topic)
            .map_or(false, |members| members.contains_key(&id))
    }

    pub fn subscriber_count(&self, topic: TopicKey) -> usize {
        self.topics.get(&topic).map_or(0, |members| members.len())
    }

    /// Whether the topic has ever been joined
    pub fn is_known(&self, topic: TopicKey) -> bool {
        self.topics.contains_key(&topic)
    }

    /// Snapshot of every known topic key
    pub fn topics(&self) -> Vec<TopicKey> {
        self.topics.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of every known chat room
    pub fn chat_rooms(&self) -> Vec<ConversationId> {
        self.topics()
            .into_iter()
            .filter_map(|topic| match topic {
                TopicKey::ChatRoom(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Topics the connection is currently subscribed to
    pub fn topics_of(&self, id: ConnectionId) -> Vec<TopicKey> {
        self.subscriptions
            .get(&id)
            .map(|topics| topics.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops a closed connection from every topic it is in
    fn forget(&self, id: ConnectionId) {
        let Some((_, topics)) = self.subscriptions.remove(&id) else {
            return;
        };
        debug!("Connection {} closed, leaving {} topics", id, topics.len());
        for topic in topics {
            self.leave(topic, id);
        }
    }
}
