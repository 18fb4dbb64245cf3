use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs};

use anyhow::{Context, bail};
use tracing::{debug, info};

use crate::auth::{
    ClientCredentialsManager, ClientRecord, ContextStrategy, InMemoryClientStore,
    create_authority_set,
};
use crate::filter::{AuthenticationPipeline, MethodRestriction};
use crate::types::SecretHash;

/// Pipeline configuration as read from `auth-pipeline.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the token endpoint the pipeline guards.
    pub mount_path: String,
    /// Prefix the application is served under.
    pub context_path: String,
    pub method_restriction: MethodRestriction,
    pub context_strategy: ContextStrategy,
    /// Drop presented secrets from authenticated tokens.
    pub erase_credentials: bool,
    pub clients: Vec<ClientConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mount_path: "/oauth/token".to_string(),
            context_path: String::new(),
            method_restriction: MethodRestriction::Any,
            context_strategy: ContextStrategy::Confined,
            erase_credentials: true,
            clients: Vec::new(),
        }
    }
}

/// One registered client.
///
/// Give either `client_secret` (hashed on load) or `client_secret_hash`
/// (SHA-256 hex, as printed by `generate-secret`). With neither the client
/// is public and authenticates with an empty secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_hash: Option<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub locked: bool,
}

impl ClientConfig {
    pub fn to_record(&self) -> anyhow::Result<ClientRecord> {
        let authorities = create_authority_set(self.authorities.as_slice())
            .with_context(|| format!("Client `{}` has an invalid authority", self.client_id))?;

        let mut record = match (&self.client_secret, &self.client_secret_hash) {
            (Some(_), Some(_)) => bail!(
                "Client `{}` must not set both `client_secret` and `client_secret_hash`",
                self.client_id
            ),
            (Some(secret), None) => ClientRecord::confidential(self.client_id.as_str(), secret, authorities),
            (None, Some(hash)) => {
                let mut record = ClientRecord::public(self.client_id.as_str(), authorities);
                record.secret_hash = Some(SecretHash::new(hash.to_ascii_lowercase()));
                record
            }
            (None, None) => ClientRecord::public(self.client_id.as_str(), authorities),
        };
        record.disabled = self.disabled;
        record.locked = self.locked;
        Ok(record)
    }
}

impl PipelineConfig {
    /// Load from a JSON file, expanding `${VAR}` references in secrets.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config.expanded())
    }

    /// Load from `explicit` if given, otherwise from the resolved default
    /// location, falling back to defaults when no file exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match resolve_config_path() {
            Ok(path) => {
                info!(path = %path.display(), "Loading pipeline config");
                Self::from_file(&path)
            }
            Err(e) => {
                debug!("{}; using defaults", e);
                Ok(Self::default())
            }
        }
    }

    fn expanded(mut self) -> Self {
        for client in &mut self.clients {
            if let Some(secret) = client.client_secret.as_mut() {
                *secret = expand_env_vars(secret);
            }
            if let Some(hash) = client.client_secret_hash.as_mut() {
                *hash = expand_env_vars(hash);
            }
        }
        self
    }

    /// Check paths and client entries.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.mount_path.starts_with('/') {
            bail!("mount_path `{}` must start with '/'", self.mount_path);
        }
        if !self.context_path.is_empty()
            && (!self.context_path.starts_with('/') || self.context_path.ends_with('/'))
        {
            bail!(
                "context_path `{}` must start with '/' and not end with one",
                self.context_path
            );
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.client_id.trim().is_empty() {
                bail!("client_id must not be empty");
            }
            if client.client_id.trim() != client.client_id {
                bail!("client_id `{}` has surrounding whitespace", client.client_id);
            }
            if !seen.insert(client.client_id.as_str()) {
                bail!("Duplicate client_id `{}`", client.client_id);
            }
            if let Some(hash) = &client.client_secret_hash
                && (hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
            {
                bail!(
                    "client_secret_hash for `{}` is not a SHA-256 hex digest",
                    client.client_id
                );
            }
            client.to_record()?;
        }
        Ok(())
    }

    /// Build the in-memory client store.
    pub fn client_store(&self) -> anyhow::Result<InMemoryClientStore> {
        let records = self
            .clients
            .iter()
            .map(ClientConfig::to_record)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(InMemoryClientStore::with_clients(records))
    }

    /// Build the client-credentials pipeline described by this config.
    pub fn build_pipeline(&self) -> anyhow::Result<AuthenticationPipeline> {
        self.validate()?;
        let store = Arc::new(self.client_store()?);
        let manager = ClientCredentialsManager::new(store)
            .with_erase_credentials(self.erase_credentials);

        info!(
            mount_path = %self.mount_path,
            strategy = %self.context_strategy,
            clients = self.clients.len(),
            "Building authentication pipeline"
        );

        Ok(AuthenticationPipeline::client_credentials(
            &self.mount_path,
            self.method_restriction,
            Arc::new(manager),
            self.context_strategy.build(),
        ))
    }
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("AUTH_PIPELINE_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("auth-pipeline").join("config.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("auth-pipeline.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "No pipeline config found (set AUTH_PIPELINE_CONFIG or create ./auth-pipeline.json)"
    ))
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
/// Unset variables and unterminated references are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
