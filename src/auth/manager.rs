//! Authentication managers.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::auth::client_store::{ClientStore, check_unknown_client_secret};
use crate::auth::error::AuthenticationError;
use crate::auth::token::Authentication;
use crate::types::ClientId;

/// Validates authentication request tokens.
///
/// Implementations must:
/// - return a new token with `is_authenticated() == true` and its authorities
///   populated on success, never an unauthenticated one;
/// - report account state (disabled, then locked) before testing
///   credentials, and always test credentials before succeeding;
/// - fail with exactly one [`AuthenticationError`] variant;
/// - return an already authenticated token unchanged.
#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    async fn authenticate(
        &self,
        authentication: Authentication,
    ) -> Result<Authentication, AuthenticationError>;
}

/// Manager validating client credentials against a [`ClientStore`].
pub struct ClientCredentialsManager {
    store: Arc<dyn ClientStore>,
    erase_credentials: bool,
}

impl ClientCredentialsManager {
    /// Create a manager that erases credentials from returned tokens.
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self {
            store,
            erase_credentials: true,
        }
    }

    /// Keep or erase credentials on the returned token.
    pub fn with_erase_credentials(mut self, erase: bool) -> Self {
        self.erase_credentials = erase;
        self
    }
}

#[async_trait]
impl AuthenticationManager for ClientCredentialsManager {
    async fn authenticate(
        &self,
        authentication: Authentication,
    ) -> Result<Authentication, AuthenticationError> {
        if authentication.is_authenticated() {
            return Ok(authentication);
        }

        let client_id = ClientId::from(authentication.principal());
        let presented = authentication
            .credentials()
            .map(|c| c.expose_secret())
            .unwrap_or_default();

        let found = self.store.find_client(&client_id).await.map_err(|e| {
            AuthenticationError::AuthenticationService(format!(
                "Failed to load client {}: {:#}",
                client_id, e
            ))
        })?;
        let Some(record) = found else {
            std::hint::black_box(check_unknown_client_secret(presented));
            debug!(client_id = %client_id, "Unknown client");
            return Err(AuthenticationError::BadCredentials(
                "Bad client credentials".to_string(),
            ));
        };

        if record.disabled {
            warn!(client_id = %client_id, "Rejected disabled client");
            return Err(AuthenticationError::AccountDisabled(format!(
                "Client {} is disabled",
                client_id
            )));
        }

        if record.locked {
            warn!(client_id = %client_id, "Rejected locked client");
            return Err(AuthenticationError::AccountLocked(format!(
                "Client {} is locked",
                client_id
            )));
        }

        if !record.secret_matches(presented) {
            debug!(client_id = %client_id, "Client secret mismatch");
            return Err(AuthenticationError::BadCredentials(
                "Bad client credentials".to_string(),
            ));
        }

        let credentials = if self.erase_credentials {
            None
        } else {
            Some(SecretString::from(presented.to_string()))
        };

        Ok(Authentication::authenticated(
            authentication.principal().clone(),
            credentials,
            record.authorities,
        ))
    }
}
