use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::error::{HubError, ErrorCode};
use crate::hub::types::{AccountId, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub id: String,
    pub listen: ListenConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// One listen address per entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub chat: String,
    pub admin_notifications: String,
    pub admin_conversations: String,
    pub technician_notifications: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Capacity of each dispatcher input queue
    pub queue_capacity: usize,
    /// Frames buffered per connection before sends start failing
    pub outbound_capacity: usize,
    pub write_timeout_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            outbound_capacity: 64,
            write_timeout_ms: 10_000,
            probe_interval_secs: 5,
        }
    }
}

impl Limits {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.queue_capacity == 0 || self.outbound_capacity == 0 {
            return Err(HubError::new(ErrorCode::ConfigInvalid, "Queue capacities must be greater than zero"));
        }
        if self.write_timeout_ms == 0 || self.probe_interval_secs == 0 {
            return Err(HubError::new(ErrorCode::ConfigInvalid, "Timeouts and intervals must be greater than zero"));
        }
        Ok(())
    }
}

/// Bearer credential accepted by the bundled static authenticator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub account_id: AccountId,
    pub role: Role,
}

impl HubConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let content = fs::read_to_string(path)
            .map_err(|e| HubError::new(ErrorCode::ConfigInvalid, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, HubError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HubError::new(ErrorCode::ConfigInvalid, format!("Failed to parse TOML: {}", e)))?;

        config.limits.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), HubError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HubError::new(ErrorCode::ConfigInvalid, format!("Failed to serialize to TOML: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| HubError::new(ErrorCode::ConfigInvalid, format!("Failed to write config file: {}", e)))
    }
}
