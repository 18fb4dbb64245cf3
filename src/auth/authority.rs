//! Granted authorities and helpers for building authority sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Set of authorities granted to a principal. Order is irrelevant and
/// duplicates collapse.
pub type AuthoritySet = BTreeSet<GrantedAuthority>;

/// Errors raised when constructing a [`GrantedAuthority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// The textual representation was empty or only whitespace.
    Empty,
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "A granted authority textual representation is required"),
        }
    }
}

impl std::error::Error for AuthorityError {}

/// A single permission or role identifier, e.g. `ROLE_CLIENT` or `read:events`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GrantedAuthority(String);

impl GrantedAuthority {
    /// Create a new authority. Fails if the value has no text.
    pub fn new(value: impl Into<String>) -> Result<Self, AuthorityError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AuthorityError::Empty);
        }
        Ok(Self(value))
    }

    /// Get the authority as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrantedAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for GrantedAuthority {
    type Error = AuthorityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for GrantedAuthority {
    type Error = AuthorityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for GrantedAuthority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        GrantedAuthority::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Build an authority set from a list of role names.
pub fn create_authority_set<S: AsRef<str>>(roles: &[S]) -> Result<AuthoritySet, AuthorityError> {
    roles
        .iter()
        .map(|role| GrantedAuthority::new(role.as_ref()))
        .collect()
}

/// Parse a comma-separated list such as `"ROLE_A, ROLE_B"`.
///
/// Tokens are trimmed and empty tokens are skipped.
pub fn authorities_from_comma_separated(value: &str) -> AuthoritySet {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| GrantedAuthority::new(s).ok())
        .collect()
}

/// Convert an authority set into the plain strings it holds.
pub fn authority_strings(authorities: &AuthoritySet) -> BTreeSet<String> {
    authorities.iter().map(|a| a.as_str().to_string()).collect()
}
