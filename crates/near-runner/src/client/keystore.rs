//! Key storage implementations.
//!
//! A [`KeyStore`] holds one [`KeyPair`] per (network, account). Two backends
//! ship with the crate:
//!
//! - [`InMemoryKeyStore`] - lost when the process exits
//! - [`FileSystemKeyStore`] - near-cli compatible `<root>/<network>/<account>.json`

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KeyStoreError;
use crate::types::{AccountId, KeyPair};

/// Storage of signing keys keyed by (network, account).
///
/// Writes are last-writer-wins; nothing here coordinates concurrent writers.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    /// Store `key` for the account, replacing any existing key.
    async fn set_key(
        &self,
        network: &str,
        account_id: &AccountId,
        key: &KeyPair,
    ) -> Result<(), KeyStoreError>;

    /// Get the key for an account, if one is stored.
    async fn get_key(
        &self,
        network: &str,
        account_id: &AccountId,
    ) -> Result<Option<KeyPair>, KeyStoreError>;

    /// Remove the key for an account. Removing a missing key is not an error.
    async fn remove_key(&self, network: &str, account_id: &AccountId)
    -> Result<(), KeyStoreError>;

    /// Remove every stored key.
    async fn clear(&self) -> Result<(), KeyStoreError>;

    /// Networks that have at least one stored key.
    async fn get_networks(&self) -> Result<Vec<String>, KeyStoreError>;

    /// Accounts with a stored key on `network`.
    async fn get_accounts(&self, network: &str) -> Result<Vec<AccountId>, KeyStoreError>;
}

// ============================================================================
// InMemoryKeyStore
// ============================================================================

/// In-memory key store.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<(String, AccountId), KeyPair>>,
}

impl InMemoryKeyStore {
    /// Create an empty in-memory keystore.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<(String, AccountId), KeyPair>> {
        self.keys.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<(String, AccountId), KeyPair>> {
        self.keys.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn set_key(
        &self,
        network: &str,
        account_id: &AccountId,
        key: &KeyPair,
    ) -> Result<(), KeyStoreError> {
        self.write()
            .insert((network.to_string(), account_id.clone()), key.clone());
        Ok(())
    }

    async fn get_key(
        &self,
        network: &str,
        account_id: &AccountId,
    ) -> Result<Option<KeyPair>, KeyStoreError> {
        Ok(self
            .read()
            .get(&(network.to_string(), account_id.clone()))
            .cloned())
    }

    async fn remove_key(
        &self,
        network: &str,
        account_id: &AccountId,
    ) -> Result<(), KeyStoreError> {
        self.write().remove(&(network.to_string(), account_id.clone()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), KeyStoreError> {
        self.write().clear();
        Ok(())
    }

    async fn get_networks(&self) -> Result<Vec<String>, KeyStoreError> {
        let networks: BTreeSet<String> = self.read().keys().map(|(n, _)| n.clone()).collect();
        Ok(networks.into_iter().collect())
    }

    async fn get_accounts(&self, network: &str) -> Result<Vec<AccountId>, KeyStoreError> {
        let mut accounts: Vec<AccountId> = self
            .read()
            .keys()
            .filter(|(n, _)| n == network)
            .map(|(_, a)| a.clone())
            .collect();
        accounts.sort();
        Ok(accounts)
    }
}

// ============================================================================
// FileSystemKeyStore
// ============================================================================

/// On-disk credential format, shared with near-cli.
#[derive(Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
}

/// Unencrypted key files under `<root>/<network>/<account>.json`.
#[derive(Debug, Clone)]
pub struct FileSystemKeyStore {
    root: PathBuf,
}

impl FileSystemKeyStore {
    /// Use `root` as the credentials directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The near-cli default, `~/.near-credentials`.
    pub fn home() -> Result<Self, KeyStoreError> {
        let home = dirs::home_dir()
            .ok_or_else(|| KeyStoreError::PathError("could not determine home directory".into()))?;
        Ok(Self::new(home.join(".near-credentials")))
    }

    /// The credentials directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, network: &str, account_id: &AccountId) -> PathBuf {
        self.root
            .join(network)
            .join(format!("{}.json", account_id.as_str()))
    }

    /// Parse a credential file, accepting `private_key` or `secret_key`.
    pub async fn read_key_file(path: &Path) -> Result<KeyPair, KeyStoreError> {
        let content = tokio::fs::read_to_string(path).await?;
        let cred: CredentialFile = serde_json::from_str(&content)?;
        let key = cred
            .private_key
            .or(cred.secret_key)
            .ok_or_else(|| KeyStoreError::InvalidFormat("missing private_key".into()))?;
        Ok(key.parse()?)
    }
}

#[async_trait]
impl KeyStore for FileSystemKeyStore {
    async fn set_key(
        &self,
        network: &str,
        account_id: &AccountId,
        key: &KeyPair,
    ) -> Result<(), KeyStoreError> {
        let path = self.key_path(network, account_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let cred = CredentialFile {
            account_id: Some(account_id.to_string()),
            public_key: Some(key.public_key.to_string()),
            private_key: Some(key.secret_key.to_string()),
            secret_key: None,
        };
        tokio::fs::write(&path, serde_json::to_vec(&cred)?).await?;
        Ok(())
    }

    async fn get_key(
        &self,
        network: &str,
        account_id: &AccountId,
    ) -> Result<Option<KeyPair>, KeyStoreError> {
        match Self::read_key_file(&self.key_path(network, account_id)).await {
            Ok(key) => Ok(Some(key)),
            Err(KeyStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn remove_key(
        &self,
        network: &str,
        account_id: &AccountId,
    ) -> Result<(), KeyStoreError> {
        match tokio::fs::remove_file(self.key_path(network, account_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), KeyStoreError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn get_networks(&self) -> Result<Vec<String>, KeyStoreError> {
        let mut networks = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(networks),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                networks.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        networks.sort();
        Ok(networks)
    }

    async fn get_accounts(&self, network: &str) -> Result<Vec<AccountId>, KeyStoreError> {
        let mut accounts = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.root.join(network)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(accounts),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".json").map(String::from) else {
                continue;
            };
            if let Ok(account_id) = stem.parse() {
                accounts.push(account_id);
            }
        }
        accounts.sort();
        Ok(accounts)
    }
}
