use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use crate::error::{ErrorCode, HubError, Result};
use crate::hub::auth::Authenticator;
use crate::hub::config::Limits;
use crate::hub::dispatcher::{channel_pair, Dispatcher, Notifier};
use crate::hub::liveness::start_monitor;
use crate::hub::net::connection::Connection;
use crate::hub::registry::TopicRegistry;
use crate::hub::rooms::RoomManager;
use crate::hub::store::Store;
use crate::hub::types::{ConversationEvent, EntryPoint, Identity, Role};
use crate::wire::message::{encode, Envelope};
use crate::wire::types::MessageType;

/// Shared state behind every entry point
pub struct Hub {
    pub registry: Arc<TopicRegistry>,
    pub rooms: Arc<RoomManager>,
    pub notifier: Notifier,
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn Authenticator>,
    pub limits: Limits,
}

impl Hub {
    /// Builds the hub together with the dispatcher that serves its notifier.
    /// The caller is responsible for running the dispatcher.
    pub fn new(store: Arc<dyn Store>, auth: Arc<dyn Authenticator>, limits: Limits) -> (Arc<Self>, Dispatcher) {
        let registry = TopicRegistry::new();
        let rooms = RoomManager::new(registry.clone());
        let (notifier, dispatcher) = channel_pair(limits.queue_capacity, registry.clone(), store.clone());

        let hub = Arc::new(Self {
            registry,
            rooms,
            notifier,
            store,
            auth,
            limits,
        });
        (hub, dispatcher)
    }

    /// Checks the credential of a connection's first frame against the entry point
    pub fn authenticate(&self, entry: EntryPoint, first: &Envelope) -> Result<Identity> {
        let token = first
            .token
            .as_deref()
            .ok_or_else(|| HubError::new(ErrorCode::InvalidCredential, "First frame carries no credential"))?;

        let identity = self.auth.verify(token)?;
        if !entry.allows(identity.role) {
            warn!("Account {} ({:?}) refused on {}", identity.account_id, identity.role, entry);
            return Err(HubError::new(
                ErrorCode::RoleMismatch,
                format!("Role {:?} may not connect to {}", identity.role, entry),
            ));
        }

        info!("Account {} admitted to {}", identity.account_id, entry);
        Ok(identity)
    }

    /// Joins a role-scoped topic and attaches a liveness monitor
    pub fn admit(&self, entry: EntryPoint, conn: Arc<dyn Connection>) -> Option<JoinHandle<()>> {
        let topic = entry.topic()?;
        self.registry.join(topic, conn.clone());
        Some(start_monitor(self.registry.clone(), topic, conn, self.limits.probe_interval()))
    }

    /// Handles one frame received on the chat entry point
    pub fn handle_chat(&self, identity: &Identity, conn: &Arc<dyn Connection>, envelope: Envelope) -> Result<()> {
        let msg_type = envelope.require_type()?;
        debug!("Chat frame {} from account {}", msg_type, identity.account_id);

        match msg_type {
            MessageType::AdminJoin => self.handle_admin_join(identity, conn),
            MessageType::UserJoin => self.handle_user_join(identity, conn),
            MessageType::Texting => self.handle_texting(identity, conn, envelope),
            MessageType::SystemUserJoinResponse => Err(HubError::new(
                ErrorCode::UnknownMessageType,
                "SYSTEM_USER_JOIN_RESPONSE is sent by the server only",
            )),
        }
    }

    fn handle_admin_join(&self, identity: &Identity, conn: &Arc<dyn Connection>) -> Result<()> {
        if identity.role != Role::Admin {
            return Err(HubError::new(ErrorCode::RoleMismatch, "ADMIN_JOIN requires the admin role"));
        }

        let joined = self.rooms.join_all_rooms(conn.clone());
        info!("Admin {} attached to {} rooms", identity.account_id, joined);
        Ok(())
    }

    fn handle_user_join(&self, identity: &Identity, conn: &Arc<dyn Connection>) -> Result<()> {
        let conversation_id = self.store.create_conversation()?;

        conn.send(&encode(&Envelope::join_response(conversation_id))?)?;
        self.rooms.join_room(conversation_id, conn.clone())?;

        let event = ConversationEvent {
            conversation_id,
            account_id: identity.account_id,
            content: format!("account {} opened conversation {}", identity.account_id, conversation_id),
        };
        if let Err(e) = self.notifier.enqueue_admin_conversation_event(event) {
            warn!("Admins not told about conversation {}: {}", conversation_id, e);
        }
        Ok(())
    }

    fn handle_texting(&self, identity: &Identity, conn: &Arc<dyn Connection>, envelope: Envelope) -> Result<()> {
        let conversation_id = envelope
            .conversation_id
            .or_else(|| self.rooms.current_room(conn.id()))
            .ok_or_else(|| HubError::new(ErrorCode::MissingField, "TEXTING needs a conversation_id"))?;
        let content = envelope
            .content
            .ok_or_else(|| HubError::new(ErrorCode::MissingField, "TEXTING needs content"))?;

        if !self.rooms.is_member(conversation_id, conn.id()) {
            return Err(HubError::new(
                ErrorCode::NotInRoom,
                format!("Not a member of conversation {}", conversation_id),
            ));
        }

        // a message that cannot go out is not stored either
        let frame = encode(&Envelope::texting(conversation_id, content.as_str()))?;

        if let Err(e) = self.store.create_message(conversation_id, identity.account_id, &content) {
            warn!("Message to conversation {} not stored: {}", conversation_id, e);
        }

        let report = self.rooms.publish(conversation_id, &frame);
        debug!("Texting in {} reached {} members", conversation_id, report.delivered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::auth::StaticAuthenticator;
    use crate::hub::config::TokenEntry;
    use crate::hub::mock::MockConnection;
    use crate::hub::store::MemoryStore;
    use crate::hub::types::TopicKey;
    use crate::wire::message::MAX_FRAME_SIZE;

    fn hub() -> (Arc<Hub>, Arc<MemoryStore>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let auth = StaticAuthenticator::new(&[
            TokenEntry { token: "admin".into(), account_id: 1, role: Role::Admin },
            TokenEntry { token: "tech".into(), account_id: 2, role: Role::Technician },
            TokenEntry { token: "user".into(), account_id: 3, role: Role::User },
        ]);
        let (hub, dispatcher) = Hub::new(store.clone(), Arc::new(auth), Limits::default());
        (hub, store, dispatcher)
    }

    const ADMIN: Identity = Identity { account_id: 1, role: Role::Admin };
    const USER_A: Identity = Identity { account_id: 3, role: Role::User };
    const USER_B: Identity = Identity { account_id: 4, role: Role::User };

    #[test]
    fn authentication_checks_credential_and_role() {
        let (hub, _, _) = hub();

        let admin = hub.authenticate(EntryPoint::AdminNotifications, &Envelope::credential("admin")).unwrap();
        assert_eq!(admin.role, Role::Admin);

        let err = hub.authenticate(EntryPoint::AdminNotifications, &Envelope::credential("tech")).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RoleMismatch));

        let err = hub.authenticate(EntryPoint::TechnicianNotifications, &Envelope::credential("bogus")).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidCredential));

        let err = hub.authenticate(EntryPoint::Chat, &Envelope::new(MessageType::UserJoin)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidCredential));

        assert!(hub.authenticate(EntryPoint::Chat, &Envelope::credential("user")).is_ok());
    }

    #[test]
    fn user_join_creates_conversation_replies_and_tells_admins() {
        let (hub, store, mut dispatcher) = hub();
        let mock = MockConnection::new();

        hub.handle_chat(&USER_A, &(mock.clone() as Arc<dyn Connection>), Envelope::new(MessageType::UserJoin)).unwrap();

        let frames = mock.json_frames();
        assert_eq!(frames[0]["msg_type"], "SYSTEM_USER_JOIN_RESPONSE");
        let conversation_id = frames[0]["conversation_id"].as_u64().unwrap();
        assert_eq!(frames[1]["content"], crate::hub::rooms::NEW_COMER_JOINED);
        assert_eq!(hub.rooms.current_room(mock.id()), Some(conversation_id));
        assert!(store.conversation_status(conversation_id).is_some());

        let queued = dispatcher.next_queued_conversation().expect("admins should be told");
        assert_eq!(queued.conversation_id, conversation_id);
        assert_eq!(queued.account_id, USER_A.account_id);
    }

    #[test]
    fn texting_persists_once_and_reaches_every_member() {
        let (hub, store, _dispatcher) = hub();
        let conversation_id = store.create_conversation().unwrap();
        let a = MockConnection::new();
        let b = MockConnection::new();
        hub.rooms.join_room(conversation_id, a.clone()).unwrap();
        hub.rooms.join_room(conversation_id, b.clone()).unwrap();

        let a_dyn: Arc<dyn Connection> = a.clone();
        hub.handle_chat(&USER_A, &a_dyn, Envelope::texting(conversation_id, "hello")).unwrap();

        for conn in [&a, &b] {
            let last = conn.json_frames().pop().unwrap();
            assert_eq!(last["msg_type"], "TEXTING");
            assert_eq!(last["content"], "hello");
        }
        let stored = store.messages(conversation_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, USER_A.account_id);
        assert_eq!(stored[0].content, "hello");
    }

    #[test]
    fn oversized_texting_is_neither_stored_nor_broadcast() {
        let (hub, store, _dispatcher) = hub();
        let conversation_id = store.create_conversation().unwrap();
        let a = MockConnection::new();
        hub.rooms.join_room(conversation_id, a.clone()).unwrap();
        let before = a.frames().len();

        // fits the inbound cap without an id, overflows once the id is added
        let mut envelope = Envelope::new(MessageType::Texting);
        envelope.content = Some("x".repeat(MAX_FRAME_SIZE - 40));
        let a_dyn: Arc<dyn Connection> = a.clone();
        let err = hub.handle_chat(&USER_A, &a_dyn, envelope).unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::SendFailed));
        assert!(!err.is_fatal());
        assert!(store.messages(conversation_id).is_empty());
        assert_eq!(a.frames().len(), before);
    }

    #[test]
    fn texting_defaults_to_the_current_room() {
        let (hub, store, _dispatcher) = hub();
        let conversation_id = store.create_conversation().unwrap();
        let a = MockConnection::new();
        hub.rooms.join_room(conversation_id, a.clone()).unwrap();

        let mut envelope = Envelope::new(MessageType::Texting);
        envelope.content = Some("no id".into());
        let a_dyn: Arc<dyn Connection> = a.clone();
        hub.handle_chat(&USER_A, &a_dyn, envelope).unwrap();
        assert_eq!(store.messages(conversation_id).len(), 1);
    }

    #[test]
    fn texting_outside_the_room_is_refused() {
        let (hub, store, _dispatcher) = hub();
        let conversation_id = store.create_conversation().unwrap();
        let member = MockConnection::new();
        hub.rooms.join_room(conversation_id, member.clone()).unwrap();

        let outsider: Arc<dyn Connection> = MockConnection::new();
        let err = hub
            .handle_chat(&USER_B, &outsider, Envelope::texting(conversation_id, "let me in"))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotInRoom));
        assert!(store.messages(conversation_id).is_empty());
        assert_eq!(member.frames().len(), 1);
    }

    #[test]
    fn admin_join_requires_admin_and_attaches_to_known_rooms() {
        let (hub, store, _dispatcher) = hub();
        let conversation_id = store.create_conversation().unwrap();
        hub.rooms.join_room(conversation_id, MockConnection::new()).unwrap();

        let user: Arc<dyn Connection> = MockConnection::new();
        let err = hub.handle_chat(&USER_A, &user, Envelope::new(MessageType::AdminJoin)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RoleMismatch));

        let admin: Arc<dyn Connection> = MockConnection::new();
        hub.handle_chat(&ADMIN, &admin, Envelope::new(MessageType::AdminJoin)).unwrap();
        assert!(hub.registry.contains(TopicKey::ChatRoom(conversation_id), admin.id()));
    }

    #[test]
    fn clients_may_not_send_server_only_types() {
        let (hub, _, _dispatcher) = hub();
        let conn: Arc<dyn Connection> = MockConnection::new();
        let err = hub
            .handle_chat(&USER_A, &conn, Envelope::join_response(1))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownMessageType));
    }

    #[tokio::test]
    async fn admitted_connections_join_their_topic_with_a_monitor() {
        let (hub, _, _dispatcher) = hub();
        let conn: Arc<dyn Connection> = MockConnection::new();

        let monitor = hub.admit(EntryPoint::TechnicianNotifications, conn.clone());
        assert!(monitor.is_some());
        assert!(hub.registry.contains(TopicKey::TechnicianNotifications, conn.id()));
        assert!(hub.admit(EntryPoint::Chat, conn).is_none());
    }
}
