//! Client registration storage.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::info;

use crate::auth::authority::AuthoritySet;
use crate::types::{ClientId, SecretHash};

/// A registered OAuth client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: ClientId,
    /// Digest of the client secret. `None` marks a public client, which
    /// authenticates with an empty secret.
    pub secret_hash: Option<SecretHash>,
    pub authorities: AuthoritySet,
    pub disabled: bool,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl ClientRecord {
    /// Create an enabled, unlocked confidential client from a raw secret.
    pub fn confidential(client_id: impl Into<ClientId>, secret: &str, authorities: AuthoritySet) -> Self {
        Self {
            client_id: client_id.into(),
            secret_hash: Some(hash_client_secret(secret)),
            authorities,
            disabled: false,
            locked: false,
            created_at: Utc::now(),
        }
    }

    /// Create an enabled, unlocked public client.
    pub fn public(client_id: impl Into<ClientId>, authorities: AuthoritySet) -> Self {
        Self {
            client_id: client_id.into(),
            secret_hash: None,
            authorities,
            disabled: false,
            locked: false,
            created_at: Utc::now(),
        }
    }

    /// Check a presented secret against the stored digest.
    pub fn secret_matches(&self, presented: &str) -> bool {
        match &self.secret_hash {
            Some(expected) => {
                let actual = hash_client_secret(presented);
                expected.as_str().as_bytes().ct_eq(actual.as_str().as_bytes()).into()
            }
            None => presented.is_empty(),
        }
    }
}

/// Backing store the authentication manager queries.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Look up a client. `Ok(None)` means unknown; `Err` means the store failed.
    async fn find_client(&self, client_id: &ClientId) -> Result<Option<ClientRecord>>;
}

/// Client store kept in memory, seeded from configuration.
#[derive(Default)]
pub struct InMemoryClientStore {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
}

impl InMemoryClientStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the given records.
    pub fn with_clients(records: impl IntoIterator<Item = ClientRecord>) -> Self {
        let clients = records
            .into_iter()
            .map(|record| (record.client_id.clone(), record))
            .collect();
        Self {
            clients: RwLock::new(clients),
        }
    }

    /// Register or replace a client.
    pub async fn register(&self, record: ClientRecord) {
        info!(client_id = %record.client_id, "Registered client");
        self.clients
            .write()
            .await
            .insert(record.client_id.clone(), record);
    }

    /// Remove a client. Returns whether it existed.
    pub async fn remove(&self, client_id: &ClientId) -> bool {
        self.clients.write().await.remove(client_id).is_some()
    }

    /// Set the disabled flag. Returns whether the client exists.
    pub async fn set_disabled(&self, client_id: &ClientId, disabled: bool) -> bool {
        match self.clients.write().await.get_mut(client_id) {
            Some(record) => {
                record.disabled = disabled;
                true
            }
            None => false,
        }
    }

    /// Set the locked flag. Returns whether the client exists.
    pub async fn set_locked(&self, client_id: &ClientId, locked: bool) -> bool {
        match self.clients.write().await.get_mut(client_id) {
            Some(record) => {
                record.locked = locked;
                true
            }
            None => false,
        }
    }

    /// List registered clients ordered by id.
    pub async fn list(&self) -> Vec<ClientRecord> {
        let mut records: Vec<_> = self.clients.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        records
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn find_client(&self, client_id: &ClientId) -> Result<Option<ClientRecord>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}

/// Hash a client secret for storage and lookup (don't store raw secrets).
pub fn hash_client_secret(secret: &str) -> SecretHash {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let result = hasher.finalize();
    SecretHash::new(format!("{:x}", result))
}

/// Digest no presented secret hashes to.
const UNKNOWN_CLIENT_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash and compare `presented` as for a registered client, against a digest
/// nothing matches. Rejecting an unknown client then costs the same as
/// rejecting a wrong secret.
pub(crate) fn check_unknown_client_secret(presented: &str) -> bool {
    let actual = hash_client_secret(presented);
    UNKNOWN_CLIENT_DIGEST
        .as_bytes()
        .ct_eq(actual.as_str().as_bytes())
        .into()
}

/// Generate a new client secret.
/// Returns (secret, hash)
pub fn generate_client_secret() -> (String, SecretHash) {
    use uuid::Uuid;

    let secret = format!(
        "cs_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let hash = hash_client_secret(&secret);
    (secret, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authority::create_authority_set;

    fn client_authorities() -> AuthoritySet {
        create_authority_set(&["ROLE_CLIENT"]).unwrap()
    }

    #[test]
    fn test_hash_client_secret() {
        let hash1 = hash_client_secret("s3cret");
        let hash2 = hash_client_secret("s3cret");
        let hash3 = hash_client_secret("different");

        assert!(hash1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash1.as_str().len(), 64);
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_generate_client_secret() {
        let (secret, hash) = generate_client_secret();
        assert!(secret.starts_with("cs_"));
        assert_eq!(hash, hash_client_secret(&secret));

        let (other, _) = generate_client_secret();
        assert_ne!(secret, other);
    }

    #[test]
    fn test_secret_matches() {
        let record = ClientRecord::confidential("abc", "s3cret", client_authorities());
        assert!(record.secret_matches("s3cret"));
        assert!(!record.secret_matches("wrong"));
        assert!(!record.secret_matches(""));

        let public = ClientRecord::public("web", client_authorities());
        assert!(public.secret_matches(""));
        assert!(!public.secret_matches("anything"));
    }

    #[test]
    fn test_secret_matches_rejects_other_length_digest() {
        let mut record = ClientRecord::confidential("abc", "s3cret", client_authorities());
        let full = hash_client_secret("s3cret").into_inner();
        record.secret_hash = Some(SecretHash::new(&full[..32]));
        assert!(!record.secret_matches("s3cret"));

        record.secret_hash = Some(SecretHash::new(full));
        assert!(record.secret_matches("s3cret"));
    }

    #[test]
    fn test_unknown_client_secret_never_matches() {
        for presented in ["", "s3cret", UNKNOWN_CLIENT_DIGEST] {
            assert!(!check_unknown_client_secret(presented));
        }
    }

    #[tokio::test]
    async fn test_store_register_and_find() {
        let store = InMemoryClientStore::new();
        store
            .register(ClientRecord::confidential("abc", "s3cret", client_authorities()))
            .await;

        let found = store.find_client(&ClientId::new("abc")).await.unwrap();
        assert!(found.is_some());
        assert!(store.find_client(&ClientId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_flags_and_remove() {
        let store = InMemoryClientStore::with_clients([ClientRecord::confidential(
            "abc",
            "s3cret",
            client_authorities(),
        )]);
        let id = ClientId::new("abc");

        assert!(store.set_disabled(&id, true).await);
        assert!(store.set_locked(&id, true).await);
        let record = store.find_client(&id).await.unwrap().unwrap();
        assert!(record.disabled);
        assert!(record.locked);

        assert!(!store.set_locked(&ClientId::new("nope"), true).await);
        assert!(store.remove(&id).await);
        assert!(store.list().await.is_empty());
    }
}
