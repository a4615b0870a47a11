//! In-process connection double for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorCode, HubError, Result};
use crate::hub::net::connection::{CloseCallback, CloseHooks, Connection};
use crate::hub::types::ConnectionId;
use crate::wire::message::Frame;

pub struct MockConnection {
    id: ConnectionId,
    frames: Mutex<Vec<Frame>>,
    failing: AtomicBool,
    closed: AtomicBool,
    hooks: CloseHooks,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            frames: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            hooks: CloseHooks::new(),
        })
    }

    /// Every later send fails, as with a peer that went away silently
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Close callbacks registered and not yet run
    pub fn close_hooks(&self) -> usize {
        self.hooks.pending_count()
    }

    pub fn json_frames(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .map(|frame| serde_json::from_slice(frame).unwrap())
            .collect()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::new(ErrorCode::ConnectionClosed, "closed"));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HubError::new(ErrorCode::SendFailed, "broken pipe"));
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn on_close(&self, callback: CloseCallback) {
        self.hooks.register(callback);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hooks.fire();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
