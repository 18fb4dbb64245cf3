//! NewType wrappers for strong typing throughout the pipeline.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a raw client secret where its stored digest is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identity carried by an authentication token.
    ///
    /// For client-credentials flows this is the trimmed `client_id`; other
    /// extraction strategies may put a username or subject here.
    Principal
);

newtype_string!(
    /// OAuth client identifier as registered in the client store.
    ClientId
);

newtype_string!(
    /// Hex-encoded SHA-256 digest of a client secret.
    ///
    /// Raw secrets are never stored; lookups compare digests.
    SecretHash
);

impl From<ClientId> for Principal {
    fn from(id: ClientId) -> Self {
        Principal(id.into_inner())
    }
}

impl From<&Principal> for ClientId {
    fn from(principal: &Principal) -> Self {
        ClientId(principal.as_str().to_string())
    }
}
