//! Authentication token model.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::auth::authority::{AuthoritySet, GrantedAuthority};
use crate::types::Principal;

/// A principal together with its credentials, granted authorities and
/// authentication state.
///
/// Request tokens are built with [`Authentication::unauthenticated`]. Only an
/// authentication manager produces authenticated tokens, always as a new value
/// via [`Authentication::authenticated`]; there is no setter for the flag.
#[derive(Debug, Clone)]
pub struct Authentication {
    principal: Principal,
    /// Erased after use; `Debug` redacts the value.
    credentials: Option<SecretString>,
    authorities: AuthoritySet,
    authenticated: bool,
}

impl Authentication {
    /// Build an authentication request token, as produced by an extractor.
    pub fn unauthenticated(principal: impl Into<Principal>, credentials: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            credentials: Some(SecretString::from(credentials.into())),
            authorities: AuthoritySet::new(),
            authenticated: false,
        }
    }

    /// Build a fully populated, authenticated token.
    ///
    /// Reserved for [`AuthenticationManager`](crate::auth::AuthenticationManager)
    /// implementations.
    pub fn authenticated(
        principal: impl Into<Principal>,
        credentials: Option<SecretString>,
        authorities: impl IntoIterator<Item = GrantedAuthority>,
    ) -> Self {
        Self {
            principal: principal.into(),
            credentials,
            authorities: authorities.into_iter().collect(),
            authenticated: true,
        }
    }

    /// Get the principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Get the credentials, if they have not been erased.
    pub fn credentials(&self) -> Option<&SecretString> {
        self.credentials.as_ref()
    }

    /// Get the granted authorities.
    pub fn authorities(&self) -> &AuthoritySet {
        &self.authorities
    }

    /// Check whether the token has been authenticated by a manager.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Check whether a given authority was granted.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a.as_str() == authority)
    }

    /// Scrub the credentials, leaving the rest of the token intact.
    pub fn erase_credentials(&mut self) {
        self.credentials = None;
    }

    /// Consume the token and return it with credentials scrubbed.
    pub fn without_credentials(mut self) -> Self {
        self.erase_credentials();
        self
    }
}

impl PartialEq for Authentication {
    fn eq(&self, other: &Self) -> bool {
        let same_credentials = match (&self.credentials, &other.credentials) {
            (None, None) => true,
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            _ => false,
        };

        self.principal == other.principal
            && same_credentials
            && self.authorities == other.authorities
            && self.authenticated == other.authenticated
    }
}

impl Eq for Authentication {}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authorities = self
            .authorities
            .iter()
            .map(GrantedAuthority::as_str)
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "Principal={}; Credentials=[PROTECTED]; Authenticated={}; Authorities=[{}]",
            self.principal, self.authenticated, authorities
        )
    }
}
