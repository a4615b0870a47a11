use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use crate::error::{ErrorCode, HubError, Result};
use crate::hub::registry::{PublishReport, TopicRegistry};
use crate::hub::store::{Audience, NotificationRecord, Store};
use crate::hub::types::{ConversationEvent, Notification, TopicKey};
use crate::wire::message::{encode, Frame};

/// One dequeued event, tagged with the queue it came from
#[derive(Debug, Clone)]
pub enum HubEvent {
    AdminNotification(Notification),
    TechnicianNotification(Notification),
    AdminConversation(ConversationEvent),
}

impl HubEvent {
    pub fn topic(&self) -> TopicKey {
        match self {
            Self::AdminNotification(_) => TopicKey::AdminNotifications,
            Self::TechnicianNotification(_) => TopicKey::TechnicianNotifications,
            Self::AdminConversation(_) => TopicKey::AdminConversations,
        }
    }
}

/// Producer side of the dispatcher queues, cloned into application code.
///
/// Queues are bounded. Enqueueing never waits: when a queue is full the
/// event is dropped and `QueueFull` is returned.
#[derive(Clone)]
pub struct Notifier {
    admin_tx: Sender<Notification>,
    technician_tx: Sender<Notification>,
    conversation_tx: Sender<ConversationEvent>,
}

impl Notifier {
    pub fn enqueue_admin_notification(&self, event: Notification) -> Result<()> {
        offer(&self.admin_tx, event, "admin notification")
    }

    pub fn enqueue_technician_notification(&self, event: Notification) -> Result<()> {
        offer(&self.technician_tx, event, "technician notification")
    }

    pub fn enqueue_admin_conversation_event(&self, event: ConversationEvent) -> Result<()> {
        offer(&self.conversation_tx, event, "admin conversation")
    }
}

fn offer<T>(tx: &Sender<T>, event: T, queue: &str) -> Result<()> {
    match tx.try_send(event) {
        Ok(()) => {
            debug!("Enqueued {} event", queue);
            Ok(())
        }
        Err(TrySendError::Full(_)) => {
            warn!("Dropping {} event: queue is full", queue);
            Err(HubError::new(ErrorCode::QueueFull, format!("The {} queue is full", queue)))
        }
        Err(TrySendError::Closed(_)) => {
            error!("Dropping {} event: dispatcher has stopped", queue);
            Err(HubError::new(ErrorCode::DispatcherClosed, "Dispatcher is not running"))
        }
    }
}

/// The single process-wide loop that persists and fans out queued events.
///
/// Idle while all queues are empty; dispatches exactly one event at a time.
/// Order is kept within a queue; across queues events interleave as they
/// arrive, and `select!` picks among ready queues at random so none starves.
pub struct Dispatcher {
    registry: Arc<TopicRegistry>,
    store: Arc<dyn Store>,
    admin_rx: Receiver<Notification>,
    technician_rx: Receiver<Notification>,
    conversation_rx: Receiver<ConversationEvent>,
}

/// Creates the three bounded queues and the dispatcher draining them
pub fn channel_pair(capacity: usize, registry: Arc<TopicRegistry>, store: Arc<dyn Store>) -> (Notifier, Dispatcher) {
    let (admin_tx, admin_rx) = channel(capacity);
    let (technician_tx, technician_rx) = channel(capacity);
    let (conversation_tx, conversation_rx) = channel(capacity);

    (
        Notifier {
            admin_tx,
            technician_tx,
            conversation_tx,
        },
        Dispatcher {
            registry,
            store,
            admin_rx,
            technician_rx,
            conversation_rx,
        },
    )
}

impl Dispatcher {
    /// Runs until cancelled or until every [`Notifier`] is gone
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Dispatcher started");
        let (mut admin_open, mut technician_open, mut conversation_open) = (true, true, true);

        while admin_open || technician_open || conversation_open {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher cancelled");
                    break;
                }
                event = self.admin_rx.recv(), if admin_open => match event {
                    Some(event) => HubEvent::AdminNotification(event),
                    None => {
                        admin_open = false;
                        continue;
                    }
                },
                event = self.technician_rx.recv(), if technician_open => match event {
                    Some(event) => HubEvent::TechnicianNotification(event),
                    None => {
                        technician_open = false;
                        continue;
                    }
                },
                event = self.conversation_rx.recv(), if conversation_open => match event {
                    Some(event) => HubEvent::AdminConversation(event),
                    None => {
                        conversation_open = false;
                        continue;
                    }
                },
            };

            self.dispatch(event);
        }
        info!("Dispatcher stopped");
    }

    /// Persists (notifications only) and publishes one event.
    ///
    /// A failed write to the store is logged and delivery goes ahead.
    pub fn dispatch(&self, event: HubEvent) -> PublishReport {
        let topic = event.topic();
        debug!("Dispatching event to {}", topic);

        let frame = match &event {
            HubEvent::AdminNotification(notification) => {
                self.persist(notification, Audience::Admin);
                encode_event(notification)
            }
            HubEvent::TechnicianNotification(notification) => {
                self.persist(notification, Audience::Technician);
                encode_event(notification)
            }
            HubEvent::AdminConversation(conversation) => encode_event(conversation),
        };

        match frame {
            Some(frame) => self.registry.publish(topic, &frame),
            None => PublishReport::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn next_queued_conversation(&mut self) -> Option<ConversationEvent> {
        self.conversation_rx.try_recv().ok()
    }

    fn persist(&self, notification: &Notification, audience: Audience) {
        let record = NotificationRecord::from_notification(notification, audience);
        if let Err(e) = self.store.create_notification(&record) {
            error!(
                "Failed to store notification for account {}: {} (delivering anyway)",
                notification.account_id, e
            );
        }
    }
}

fn encode_event<T: Serialize>(event: &T) -> Option<Frame> {
    match encode(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode event: {}", e);
            None
        }
    }
}
