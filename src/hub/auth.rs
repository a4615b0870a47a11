use std::collections::HashMap;

use log::{debug, warn};
use crate::error::{ErrorCode, HubError, Result};
use crate::hub::config::TokenEntry;
use crate::hub::types::Identity;

/// Turns the bearer credential of a connection's first frame into an identity
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity>;
}

/// Fixed token table, loaded from the `[[tokens]]` section of the config
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity {
                        account_id: entry.account_id,
                        role: entry.role,
                    },
                )
            })
            .collect();

        Self { tokens }
    }
}

impl Authenticator for StaticAuthenticator {
    fn verify(&self, token: &str) -> Result<Identity> {
        match self.tokens.get(token) {
            Some(identity) => {
                debug!("Credential accepted for account {} ({:?})", identity.account_id, identity.role);
                Ok(*identity)
            }
            None => {
                warn!("Rejected unknown credential");
                Err(HubError::new(ErrorCode::InvalidCredential, "Unknown credential"))
            }
        }
    }
}
