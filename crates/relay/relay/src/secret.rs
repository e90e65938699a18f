//! Secret store seam and per-message credential resolution.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::envelope::SecretRef;
use crate::error::{RelayError, RelayResult};

/// Trait for secret store backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the secret content. Secrets referenced by name are looked up in `vault_id`.
    async fn get_secret(&self, secret: &SecretRef, vault_id: Option<&str>) -> RelayResult<Vec<u8>>;
}

/// In-memory secret store.
pub struct InMemorySecretStore {
    by_name: RwLock<HashMap<(String, String), Vec<u8>>>,
    by_id: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a shared empty store.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stores a secret addressed by name within a vault.
    pub async fn insert_named(
        &self,
        vault_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) {
        let mut by_name = self.by_name.write().await;
        by_name.insert((vault_id.into(), name.into()), content.into());
    }

    /// Stores a secret addressed by ID.
    pub async fn insert_id(&self, id: impl Into<String>, content: impl Into<Vec<u8>>) {
        let mut by_id = self.by_id.write().await;
        by_id.insert(id.into(), content.into());
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, secret: &SecretRef, vault_id: Option<&str>) -> RelayResult<Vec<u8>> {
        let found = match secret {
            SecretRef::Name(name) => {
                let by_name = self.by_name.read().await;
                by_name
                    .get(&(vault_id.unwrap_or_default().to_string(), name.clone()))
                    .cloned()
            }
            SecretRef::Id(id) => {
                let by_id = self.by_id.read().await;
                by_id.get(id).cloned()
            }
        };

        found.ok_or_else(|| RelayError::CredentialUnavailable(format!("secret {} not found", secret)))
    }
}

/// Turns an envelope's credential reference into an `Authorization` value.
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    vault_id: Option<String>,
}

impl SecretResolver {
    /// Creates a resolver over `store`, looking up named secrets in `vault_id`.
    pub fn new(store: Arc<dyn SecretStore>, vault_id: Option<String>) -> Self {
        Self { store, vault_id }
    }

    /// Resolves a credential. Returns `Ok(None)` when there is nothing to resolve.
    ///
    /// Every failure is reported as [`RelayError::CredentialUnavailable`] and is
    /// not retried.
    pub async fn resolve(&self, credential: Option<&SecretRef>) -> RelayResult<Option<String>> {
        let Some(secret) = credential else {
            return Ok(None);
        };

        let content = self
            .store
            .get_secret(secret, self.vault_id.as_deref())
            .await
            .map_err(|e| match e {
                RelayError::CredentialUnavailable(_) => e,
                other => RelayError::CredentialUnavailable(format!("secret {}: {}", secret, other)),
            })?;

        let token = String::from_utf8(content).map_err(|_| {
            RelayError::CredentialUnavailable(format!("secret {} is not valid UTF-8", secret))
        })?;

        if token.is_empty() {
            return Err(RelayError::CredentialUnavailable(format!("secret {} is empty", secret)));
        }

        Ok(Some(token))
    }
}
