//! Credential extraction strategies.
//!
//! An [`Extractor`] turns a raw request into an authentication request token.
//! Strategies are interchangeable; the pipeline does not care whether
//! credentials came from form parameters, a header, or several round trips.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{Method, header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Authentication, AuthenticationError, SecurityContext};
use crate::filter::request::AuthRequest;

/// Result of running an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// A token to authenticate. May already be authenticated when the
    /// current context held one.
    Token(Authentication),
    /// Authentication needs another round trip; nothing to report yet.
    Deferred,
}

/// Strategy turning a request into an authentication request token.
pub trait Extractor: Send + Sync {
    /// Extract credentials from `request`.
    ///
    /// `context` is the security context bound when the pipeline was entered.
    fn extract(
        &self,
        request: &AuthRequest,
        context: &SecurityContext,
    ) -> Result<Extraction, AuthenticationError>;
}

/// Which HTTP methods an extractor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MethodRestriction {
    #[default]
    Any,
    PostOnly,
}

impl MethodRestriction {
    /// Reject `method` if it is not allowed.
    pub fn check(&self, method: &Method) -> Result<(), AuthenticationError> {
        match self {
            Self::Any => Ok(()),
            Self::PostOnly if method == Method::POST => Ok(()),
            Self::PostOnly => Err(AuthenticationError::method_not_allowed(
                method.as_str(),
                &["POST"],
            )),
        }
    }
}

/// Reads `client_id` / `client_secret` from query or form parameters.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentialsExtractor {
    method_restriction: MethodRestriction,
}

impl ClientCredentialsExtractor {
    pub fn new(method_restriction: MethodRestriction) -> Self {
        Self { method_restriction }
    }

    /// Accept POST requests only.
    pub fn post_only() -> Self {
        Self::new(MethodRestriction::PostOnly)
    }

    pub fn method_restriction(&self) -> MethodRestriction {
        self.method_restriction
    }
}

impl Extractor for ClientCredentialsExtractor {
    fn extract(
        &self,
        request: &AuthRequest,
        context: &SecurityContext,
    ) -> Result<Extraction, AuthenticationError> {
        self.method_restriction.check(request.method())?;

        // Already authenticated further up the chain.
        if let Some(existing) = context.authentication()
            && existing.is_authenticated()
        {
            debug!(principal = %existing.principal(), "Reusing authenticated context");
            return Ok(Extraction::Token(existing.clone()));
        }

        let client_id = request.parameter("client_id").ok_or_else(|| {
            AuthenticationError::BadCredentials("No client credentials presented".to_string())
        })?;
        let client_secret = request.parameter("client_secret").unwrap_or_default();

        Ok(Extraction::Token(Authentication::unauthenticated(
            client_id.trim(),
            client_secret,
        )))
    }
}

/// Reads `Authorization: Basic base64(client_id:client_secret)`.
#[derive(Debug, Clone, Default)]
pub struct HttpBasicExtractor;

impl HttpBasicExtractor {
    fn decode(value: &str) -> Result<(String, String), AuthenticationError> {
        let encoded = value
            .get(..6)
            .filter(|scheme| scheme.eq_ignore_ascii_case("basic "))
            .and_then(|_| value.get(6..))
            .ok_or_else(|| {
                AuthenticationError::BadCredentials("No client credentials presented".to_string())
            })?;

        let decoded = STANDARD.decode(encoded.trim()).map_err(|_| {
            AuthenticationError::BadCredentials(
                "Failed to decode basic authentication token".to_string(),
            )
        })?;
        let decoded = String::from_utf8(decoded).map_err(|_| {
            AuthenticationError::BadCredentials(
                "Failed to decode basic authentication token".to_string(),
            )
        })?;

        let (id, secret) = decoded.split_once(':').ok_or_else(|| {
            AuthenticationError::BadCredentials("Invalid basic authentication token".to_string())
        })?;
        Ok((id.to_string(), secret.to_string()))
    }
}

impl Extractor for HttpBasicExtractor {
    fn extract(
        &self,
        request: &AuthRequest,
        context: &SecurityContext,
    ) -> Result<Extraction, AuthenticationError> {
        if let Some(existing) = context.authentication()
            && existing.is_authenticated()
        {
            return Ok(Extraction::Token(existing.clone()));
        }

        let value = request.header(&header::AUTHORIZATION).ok_or_else(|| {
            AuthenticationError::BadCredentials("No client credentials presented".to_string())
        })?;
        let (client_id, client_secret) = Self::decode(value)?;

        Ok(Extraction::Token(Authentication::unauthenticated(
            client_id.trim(),
            client_secret,
        )))
    }
}
