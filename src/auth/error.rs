//! Authentication failure taxonomy.
//!
//! Identity rejections are ordered by precedence: a manager that can detect
//! several conditions at once reports `AccountDisabled` before `AccountLocked`
//! before `BadCredentials`, so credentials are never tested against accounts
//! already known to be blocked.

use std::fmt;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};

/// Errors that can end an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The request method is not accepted by the extractor. Evaluated before
    /// any credential is read.
    MethodNotAllowed {
        method: String,
        allowed: Vec<String>,
    },

    /// The account exists but is disabled.
    AccountDisabled(String),

    /// The account exists but is locked.
    AccountLocked(String),

    /// Credentials were missing or did not match.
    BadCredentials(String),

    /// A downstream dependency failed (store outage, unexpected panic).
    ///
    /// This is an infrastructure fault, not a rejected identity.
    AuthenticationService(String),
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotAllowed { method, allowed } => write!(
                f,
                "Request method '{}' not supported (allowed: {})",
                method,
                allowed.join(", ")
            ),
            Self::AccountDisabled(msg) => write!(f, "Account disabled: {}", msg),
            Self::AccountLocked(msg) => write!(f, "Account locked: {}", msg),
            Self::BadCredentials(msg) => write!(f, "Bad credentials: {}", msg),
            Self::AuthenticationService(msg) => {
                write!(f, "Authentication service error: {}", msg)
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

impl From<anyhow::Error> for AuthenticationError {
    fn from(err: anyhow::Error) -> Self {
        Self::AuthenticationService(format!("{:#}", err))
    }
}

impl AuthenticationError {
    /// Create a method-not-allowed error.
    pub fn method_not_allowed(method: impl Into<String>, allowed: &[&str]) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
            allowed: allowed.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Whether this error signals an infrastructure fault rather than a
    /// rejected identity.
    pub fn is_service_fault(&self) -> bool {
        matches!(self, Self::AuthenticationService(_))
    }

    /// Whether this error is a transport-level rejection evaluated before
    /// authentication.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::MethodNotAllowed { .. })
    }

    /// Rank of identity rejections; lower wins when several conditions hold.
    ///
    /// Returns `None` for errors outside the identity taxonomy.
    pub fn precedence(&self) -> Option<u8> {
        match self {
            Self::AccountDisabled(_) => Some(0),
            Self::AccountLocked(_) => Some(1),
            Self::BadCredentials(_) => Some(2),
            Self::MethodNotAllowed { .. } | Self::AuthenticationService(_) => None,
        }
    }

    /// Short machine-readable code, matching OAuth2 error names where one fits.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::AccountDisabled(_) | Self::AccountLocked(_) | Self::BadCredentials(_) => {
                "invalid_client"
            }
            Self::AuthenticationService(_) => "server_error",
        }
    }

    /// HTTP status the default failure collaborator answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::AccountDisabled(_) | Self::AccountLocked(_) | Self::BadCredentials(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::AuthenticationService(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the logs.
        let description = if self.is_service_fault() {
            "Internal authentication error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(serde_json::json!({
            "error": self.code(),
            "error_description": description,
        }));

        let mut response = (status, body).into_response();
        if let Self::MethodNotAllowed { allowed, .. } = &self
            && let Ok(value) = HeaderValue::from_str(&allowed.join(", "))
        {
            response.headers_mut().insert(header::ALLOW, value);
        }
        response
    }
}
