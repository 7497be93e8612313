//! Local sandbox node backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{AccountManager, NetworkBackend};
use crate::client::{FileSystemKeyStore, KeyStore, RpcProvider};
use crate::error::{Error, SandboxError};
use crate::types::{AccountId, KeyPair, NearToken, Network, PublicKey};

/// Root account of a freshly initialized sandbox.
pub const SANDBOX_ROOT_ACCOUNT: &str = "test.near";

/// Key file written by `near-sandbox init`.
const VALIDATOR_KEY_FILE: &str = "validator_key.json";

/// Keystore directory inside a sandbox home, so copying the home copies the keys.
const KEY_STORE_DIR: &str = "near-credentials";

#[derive(Deserialize)]
struct ValidatorKeyFile {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
}

/// Accounts on a sandbox are sub-accounts of the root, funded from its
/// effectively unlimited genesis balance.
#[derive(Clone, Copy, Debug, Default)]
pub struct SandboxBackend;

impl SandboxBackend {
    /// Read the root account and key from `<home_dir>/validator_key.json`.
    ///
    /// Accepts either `secret_key` or the older `private_key` field.
    pub async fn read_validator_key(home_dir: &Path) -> Result<(AccountId, KeyPair), Error> {
        let path = home_dir.join(VALIDATOR_KEY_FILE);
        let invalid = |message: String| SandboxError::ValidatorKey {
            path: path.clone(),
            message,
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let file: ValidatorKeyFile =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        // Newer nodes write `secret_key`; it wins when both are present.
        let key: KeyPair = file
            .secret_key
            .or(file.private_key)
            .ok_or_else(|| invalid("missing secret_key".to_string()))?
            .parse()
            .map_err(|e: crate::error::DecodeError| invalid(e.to_string()))?;
        let account_id = file
            .account_id
            .as_deref()
            .unwrap_or(SANDBOX_ROOT_ACCOUNT)
            .parse()
            .map_err(|e: near_account_id::ParseAccountError| invalid(e.to_string()))?;
        Ok((account_id, key))
    }

    /// The keystore a sandbox run uses by default.
    pub fn key_store_dir(home_dir: &Path) -> PathBuf {
        home_dir.join(KEY_STORE_DIR)
    }

    /// Build a manager for the sandbox whose home is `home_dir`.
    ///
    /// The root key from the validator key file is written into `key_store`
    /// (by default a [`FileSystemKeyStore`] inside the home dir).
    pub async fn connect(
        rpc: Arc<dyn RpcProvider>,
        home_dir: &Path,
        key_store: Option<Arc<dyn KeyStore>>,
    ) -> Result<AccountManager, Error> {
        let (root_account_id, root_key) = Self::read_validator_key(home_dir).await?;
        let key_store = key_store.unwrap_or_else(|| {
            Arc::new(FileSystemKeyStore::new(Self::key_store_dir(home_dir)))
        });

        let manager = AccountManager::new(rpc, key_store, Arc::new(SandboxBackend), root_account_id);
        manager
            .set_key(manager.root_account_id(), Some(root_key))
            .await?;
        debug!(root = %manager.root_account_id(), home = %home_dir.display(), "Sandbox manager ready");
        Ok(manager)
    }
}

#[async_trait]
impl NetworkBackend for SandboxBackend {
    fn network(&self) -> Network {
        Network::Sandbox
    }

    fn top_level_suffix(&self) -> &str {
        "near"
    }

    async fn create_account(
        &self,
        manager: &AccountManager,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), Error> {
        manager
            .create_funded_account(
                manager.root_account_id(),
                account_id,
                public_key,
                initial_balance,
            )
            .await
    }
}
