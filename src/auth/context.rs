//! Security context for request-scoped identity.

use std::fmt;

use crate::auth::token::Authentication;

/// Holder of the current authentication for one logical request.
///
/// An absent authentication means the request is unauthenticated. Two
/// contexts are equal when they hold equal authentications, including the
/// case where both are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    authentication: Option<Authentication>,
}

impl SecurityContext {
    /// Create an empty context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a context holding the given authentication.
    pub fn with_authentication(authentication: Authentication) -> Self {
        Self {
            authentication: Some(authentication),
        }
    }

    /// Get the held authentication, if any.
    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    /// Replace the held authentication. `None` removes it.
    pub fn set_authentication(&mut self, authentication: Option<Authentication>) {
        self.authentication = authentication;
    }

    /// Take the held authentication out of the context.
    pub fn take_authentication(&mut self) -> Option<Authentication> {
        self.authentication.take()
    }

    /// Check whether the context holds an authenticated identity.
    pub fn is_authenticated(&self) -> bool {
        self.authentication
            .as_ref()
            .is_some_and(Authentication::is_authenticated)
    }

    /// Check whether the context holds nothing.
    pub fn is_empty(&self) -> bool {
        self.authentication.is_none()
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.authentication {
            None => write!(f, "SecurityContext: Null authentication"),
            Some(auth) => write!(f, "SecurityContext: Authentication: {}", auth),
        }
    }
}
