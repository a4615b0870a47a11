use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, HubError, Result};
use crate::hub::types::ConversationId;
use crate::wire::types::MessageType;

/// A serialized, newline-terminated JSON frame.
///
/// Encoded once per publish and shared by every subscriber.
pub type Frame = Bytes;

/// Frames larger than this are refused before they reach any connection
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const PROBE_FRAME: &[u8] = b"{\"ping\":true}\n";

/// The tagged envelope used on the chat entry point and for credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Envelope {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type: Some(msg_type),
            ..Self::default()
        }
    }

    pub fn texting(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            msg_type: Some(MessageType::Texting),
            content: Some(content.into()),
            conversation_id: Some(conversation_id),
            token: None,
        }
    }

    pub fn join_response(conversation_id: ConversationId) -> Self {
        Self {
            msg_type: Some(MessageType::SystemUserJoinResponse),
            content: None,
            conversation_id: Some(conversation_id),
            token: None,
        }
    }

    pub fn credential(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Parse one inbound line.
    ///
    /// An unknown `msg_type` is reported as `UnknownMessageType`, any other
    /// shape problem as `MalformedFrame`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;

        if let Some(tag) = value.get("msg_type") {
            match tag.as_str() {
                Some(name) => {
                    MessageType::from_wire(name)?;
                }
                None if tag.is_null() => {}
                None => {
                    return Err(HubError::new(ErrorCode::MalformedFrame, "msg_type must be a string"));
                }
            }
        }

        let envelope: Envelope = serde_json::from_value(value)?;
        debug!("Parsed envelope with type {:?}", envelope.msg_type);
        Ok(envelope)
    }

    /// The message type, or a `MissingField` error when absent
    pub fn require_type(&self) -> Result<MessageType> {
        self.msg_type
            .ok_or_else(|| HubError::new(ErrorCode::MissingField, "Frame has no msg_type"))
    }
}

/// Sent to a client right before the hub closes its connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub code: String,
}

impl ErrorFrame {
    pub fn from_error(err: &HubError) -> Self {
        let (code, message) = err.to_wire();
        Self {
            error: message,
            code: code.name().to_string(),
        }
    }
}

/// Serialize any value into a frame
pub fn encode<T: Serialize>(value: &T) -> Result<Frame> {
    let body = serde_json::to_vec(value)?;

    if body.len() + 1 > MAX_FRAME_SIZE {
        debug!("Frame too large: {} bytes (maximum: {} bytes)", body.len() + 1, MAX_FRAME_SIZE);
        return Err(HubError::new(
            ErrorCode::SendFailed,
            format!("Frame of {} bytes exceeds maximum size", body.len() + 1),
        ));
    }

    let mut frame = BytesMut::with_capacity(body.len() + 1);
    frame.extend_from_slice(&body);
    frame.put_u8(b'\n');
    Ok(frame.freeze())
}

/// The liveness probe frame
pub fn probe() -> Frame {
    Bytes::from_static(PROBE_FRAME)
}
