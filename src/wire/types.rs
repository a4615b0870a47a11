use std::fmt;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use crate::error::{ErrorCode, HubError};

/// Message types carried in the `msg_type` field of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "ADMIN_JOIN")]
    AdminJoin,
    #[serde(rename = "USER_JOIN")]
    UserJoin,
    #[serde(rename = "TEXTING")]
    Texting,
    #[serde(rename = "SYSTEM_USER_JOIN_RESPONSE")]
    SystemUserJoinResponse,
}

impl MessageType {
    /// Convert the wire name to a MessageType
    pub fn from_wire(value: &str) -> Result<Self, HubError> {
        debug!("Converting wire name to MessageType: {}", value);

        match value {
            "ADMIN_JOIN" => Ok(Self::AdminJoin),
            "USER_JOIN" => Ok(Self::UserJoin),
            "TEXTING" => Ok(Self::Texting),
            "SYSTEM_USER_JOIN_RESPONSE" => Ok(Self::SystemUserJoinResponse),
            _ => {
                error!("Unknown message type: {}", value);
                Err(HubError::new(
                    ErrorCode::UnknownMessageType,
                    format!("Unknown message type: {}", value),
                ))
            }
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::AdminJoin => "ADMIN_JOIN",
            Self::UserJoin => "USER_JOIN",
            Self::Texting => "TEXTING",
            Self::SystemUserJoinResponse => "SYSTEM_USER_JOIN_RESPONSE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}
