//! Error module for Chathub
//!
//! This module defines the error type and the numeric error codes used
//! throughout the hub. Codes are also sent to clients inside error frames.

use thiserror::Error;
use std::fmt;

/// Numeric error code carried by [`HubError::Standard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Protocol errors (0x0001-0x00FF)
    MalformedFrame = 0x0001,
    UnknownMessageType = 0x0002,
    MissingField = 0x0003,

    // Auth errors (0x0100-0x01FF)
    InvalidCredential = 0x0101,
    RoleMismatch = 0x0102,
    NotInRoom = 0x0103,

    // Delivery errors (0x0200-0x02FF)
    SendFailed = 0x0201,
    ConnectionClosed = 0x0202,
    QueueFull = 0x0203,
    DispatcherClosed = 0x0204,

    // Store errors (0x0300-0x03FF)
    StoreUnavailable = 0x0301,
    ConversationNotFound = 0x0302,
    ConversationInactive = 0x0303,

    // System errors (0x0400-0x04FF)
    InternalServerError = 0x0401,
    ConfigInvalid = 0x0402,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the error code category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            0x0001..=0x00FF => ErrorCategory::Protocol,
            0x0100..=0x01FF => ErrorCategory::Auth,
            0x0200..=0x02FF => ErrorCategory::Delivery,
            0x0300..=0x03FF => ErrorCategory::Store,
            0x0400..=0x04FF => ErrorCategory::System,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Try to convert a u16 to an ErrorCode
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::MalformedFrame),
            0x0002 => Some(Self::UnknownMessageType),
            0x0003 => Some(Self::MissingField),
            0x0101 => Some(Self::InvalidCredential),
            0x0102 => Some(Self::RoleMismatch),
            0x0103 => Some(Self::NotInRoom),
            0x0201 => Some(Self::SendFailed),
            0x0202 => Some(Self::ConnectionClosed),
            0x0203 => Some(Self::QueueFull),
            0x0204 => Some(Self::DispatcherClosed),
            0x0301 => Some(Self::StoreUnavailable),
            0x0302 => Some(Self::ConversationNotFound),
            0x0303 => Some(Self::ConversationInactive),
            0x0401 => Some(Self::InternalServerError),
            0x0402 => Some(Self::ConfigInvalid),
            _ => None,
        }
    }

    /// Name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::MalformedFrame => "MALFORMED_FRAME",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::RoleMismatch => "ROLE_MISMATCH",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::SendFailed => "SEND_FAILED",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::QueueFull => "QUEUE_FULL",
            Self::DispatcherClosed => "DISPATCHER_CLOSED",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            Self::ConversationInactive => "CONVERSATION_INACTIVE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.as_u16())
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Protocol,
    Auth,
    Delivery,
    Store,
    System,
    Unknown,
}

/// Main error type for Chathub
#[derive(Error, Debug)]
pub enum HubError {
    #[error("{code}: {message}")]
    Standard {
        code: ErrorCode,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl HubError {
    /// Create a new standard error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard {
            code,
            message: message.into(),
        }
    }

    /// Get the error code if this is a standard error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Standard { code, .. } => Some(*code),
            Self::Serialization(_) => Some(ErrorCode::MalformedFrame),
            Self::Config(_) => Some(ErrorCode::ConfigInvalid),
            _ => None,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Standard { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Protocol errors and credential/role failures end the connection's read loop.
    /// `NotInRoom` is reported but the connection stays.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) => true,
            _ => match self.code() {
                Some(ErrorCode::NotInRoom) => false,
                Some(code) => matches!(code.category(), ErrorCategory::Protocol | ErrorCategory::Auth),
                None => false,
            },
        }
    }

    /// Code and message pair for an error frame
    pub fn to_wire(&self) -> (ErrorCode, String) {
        (self.code().unwrap_or(ErrorCode::InternalServerError), self.message())
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

impl From<String> for HubError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

impl From<&str> for HubError {
    fn from(message: &str) -> Self {
        Self::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_categories() {
        assert_eq!(ErrorCode::MalformedFrame.category(), ErrorCategory::Protocol);
        assert_eq!(ErrorCode::RoleMismatch.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::QueueFull.category(), ErrorCategory::Delivery);
        assert_eq!(ErrorCode::StoreUnavailable.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::System);
        assert_eq!(ErrorCode::from_u16(0x0203), Some(ErrorCode::QueueFull));
        assert_eq!(ErrorCode::from_u16(0x7777), None);
    }

    #[test]
    fn serde_errors_report_malformed_frame() {
        let err: HubError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.to_wire().0, ErrorCode::MalformedFrame);
        assert_eq!(HubError::from("boom").to_wire().0, ErrorCode::InternalServerError);
    }

    #[test]
    fn only_protocol_and_credential_errors_are_fatal() {
        assert!(HubError::new(ErrorCode::UnknownMessageType, "x").is_fatal());
        assert!(HubError::new(ErrorCode::RoleMismatch, "x").is_fatal());
        assert!(!HubError::new(ErrorCode::NotInRoom, "x").is_fatal());
        assert!(!HubError::new(ErrorCode::StoreUnavailable, "x").is_fatal());
        assert!(!HubError::from("boom").is_fatal());
    }
}
