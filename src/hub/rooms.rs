use std::sync::{Arc, Weak};

use dashmap::DashMap;
use log::{debug, info};
use crate::error::Result;
use crate::hub::net::connection::Connection;
use crate::hub::registry::{PublishReport, TopicRegistry};
use crate::hub::types::{ConnectionId, ConversationId, TopicKey};
use crate::wire::message::{encode, Envelope, Frame};

/// System message broadcast to a room whenever someone joins it
pub const NEW_COMER_JOINED: &str = "new comer joined";

/// Chat rooms on top of the topic registry, one per conversation
pub struct RoomManager {
    registry: Arc<TopicRegistry>,
    // room each non-admin connection currently sits in
    memberships: DashMap<ConnectionId, ConversationId>,
    this: Weak<RoomManager>,
}

impl RoomManager {
    pub fn new(registry: Arc<TopicRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            memberships: DashMap::new(),
            this: this.clone(),
        })
    }

    /// Puts a connection into a conversation's room, creating the room on
    /// first join, and tells everyone in it (the newcomer included).
    ///
    /// A connection sits in one room at a time; joining another room leaves
    /// the previous one.
    pub fn join_room(&self, conversation_id: ConversationId, conn: Arc<dyn Connection>) -> Result<PublishReport> {
        let id = conn.id();
        let topic = TopicKey::ChatRoom(conversation_id);

        match self.memberships.insert(id, conversation_id) {
            Some(previous) if previous != conversation_id => {
                debug!("Connection {} moves from room {} to {}", id, previous, conversation_id);
                self.registry.leave(TopicKey::ChatRoom(previous), id);
            }
            Some(_) => {}
            None => {
                let rooms = self.this.clone();
                conn.on_close(Box::new(move || {
                    if let Some(rooms) = rooms.upgrade() {
                        rooms.memberships.remove(&id);
                    }
                }));
            }
        }

        if !self.registry.is_known(topic) {
            info!("Creating room {} on first join", conversation_id);
        }
        self.registry.join(topic, conn);

        self.broadcast(conversation_id, NEW_COMER_JOINED)
    }

    /// Attaches an administrator connection to every room known right now.
    /// Rooms created afterwards are not joined.
    pub fn join_all_rooms(&self, conn: Arc<dyn Connection>) -> usize {
        let rooms = self.registry.chat_rooms();
        info!("Connection {} joining all {} rooms", conn.id(), rooms.len());

        for conversation_id in &rooms {
            self.registry.join(TopicKey::ChatRoom(*conversation_id), conn.clone());
        }
        rooms.len()
    }

    /// Publishes a `TEXTING` envelope to a room
    pub fn broadcast(&self, conversation_id: ConversationId, content: &str) -> Result<PublishReport> {
        let frame = encode(&Envelope::texting(conversation_id, content))?;
        Ok(self.publish(conversation_id, &frame))
    }

    /// Publishes an already encoded frame to a room
    pub fn publish(&self, conversation_id: ConversationId, frame: &Frame) -> PublishReport {
        self.registry.publish(TopicKey::ChatRoom(conversation_id), frame)
    }

    /// Room the connection joined through [`join_room`](Self::join_room), if any
    pub fn current_room(&self, id: ConnectionId) -> Option<ConversationId> {
        self.memberships.get(&id).map(|room| *room)
    }

    pub fn is_member(&self, conversation_id: ConversationId, id: ConnectionId) -> bool {
        self.registry.contains(TopicKey::ChatRoom(conversation_id), id)
    }

    pub fn leave_room(&self, id: ConnectionId) -> bool {
        match self.memberships.remove(&id) {
            Some((_, conversation_id)) => self.registry.leave(TopicKey::ChatRoom(conversation_id), id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::mock::MockConnection;

    fn setup() -> (Arc<TopicRegistry>, Arc<RoomManager>) {
        let registry = TopicRegistry::new();
        let rooms = RoomManager::new(registry.clone());
        (registry, rooms)
    }

    #[test]
    fn first_join_creates_the_room_and_greets_the_joiner() {
        let (registry, rooms) = setup();
        let conn = MockConnection::new();
        assert!(!registry.is_known(TopicKey::ChatRoom(42)));

        let report = rooms.join_room(42, conn.clone()).unwrap();
        assert_eq!(report.delivered, 1);
        assert!(registry.is_known(TopicKey::ChatRoom(42)));

        let frames = conn.json_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["msg_type"], "TEXTING");
        assert_eq!(frames[0]["content"], NEW_COMER_JOINED);
        assert_eq!(frames[0]["conversation_id"], 42);
    }

    #[test]
    fn existing_members_hear_about_new_comers() {
        let (_, rooms) = setup();
        let first = MockConnection::new();
        let second = MockConnection::new();

        rooms.join_room(7, first.clone()).unwrap();
        let report = rooms.join_room(7, second.clone()).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(first.frames().len(), 2);
        assert_eq!(second.frames().len(), 1);
    }

    #[test]
    fn joining_another_room_leaves_the_previous_one() {
        let (registry, rooms) = setup();
        let conn = MockConnection::new();

        rooms.join_room(1, conn.clone()).unwrap();
        rooms.join_room(2, conn.clone()).unwrap();
        assert!(!rooms.is_member(1, conn.id()));
        assert!(rooms.is_member(2, conn.id()));
        assert_eq!(rooms.current_room(conn.id()), Some(2));
        assert_eq!(registry.topics_of(conn.id()), vec![TopicKey::ChatRoom(2)]);
    }

    #[test]
    fn join_all_rooms_is_a_snapshot() {
        let (_, rooms) = setup();
        let user_a = MockConnection::new();
        let user_b = MockConnection::new();
        let admin = MockConnection::new();

        rooms.join_room(1, user_a.clone()).unwrap();
        rooms.join_room(2, user_b.clone()).unwrap();
        // room 2 stays known after its only member leaves
        rooms.leave_room(user_b.id());

        assert_eq!(rooms.join_all_rooms(admin.clone()), 2);
        assert!(rooms.is_member(1, admin.id()));
        assert!(rooms.is_member(2, admin.id()));

        let late = MockConnection::new();
        rooms.join_room(3, late).unwrap();
        assert!(!rooms.is_member(3, admin.id()));
        assert_eq!(rooms.current_room(admin.id()), None);
    }

    #[test]
    fn switching_rooms_keeps_close_hooks_bounded() {
        let (registry, rooms) = setup();
        let conn = MockConnection::new();

        for room in 0..1000 {
            rooms.join_room(room, conn.clone()).unwrap();
        }
        // one for the registry, one for the membership table
        assert_eq!(conn.close_hooks(), 2);
        assert_eq!(registry.topics_of(conn.id()), vec![TopicKey::ChatRoom(999)]);

        conn.close();
        assert_eq!(conn.close_hooks(), 0);
        assert!(registry.topics_of(conn.id()).is_empty());
        assert_eq!(registry.subscriber_count(TopicKey::ChatRoom(999)), 0);
        assert_eq!(rooms.current_room(conn.id()), None);
    }

    #[test]
    fn closing_forgets_the_membership() {
        let (_, rooms) = setup();
        let conn = MockConnection::new();
        rooms.join_room(4, conn.clone()).unwrap();

        conn.close();
        assert_eq!(rooms.current_room(conn.id()), None);
        assert!(!rooms.is_member(4, conn.id()));
    }
}
