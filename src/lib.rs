//! Real-time notification and chat hub.
//!
//! Long-lived client connections are grouped into topics (chat rooms and
//! role-scoped notification channels); queued domain events are persisted
//! and fanned out to whoever is connected, and dead connections are reaped.

pub mod error;
pub mod hub;
pub mod wire;
