//! Shared testnet backend.
//!
//! Top-level `*.testnet` accounts come from the public account helper, which
//! funds them from its faucet. Everything else is created by the root
//! account and paid for from its balance, which [`NetworkBackend::add_funds`]
//! tops up by creating a faucet account and deleting it into the root.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::{AccountManager, NetworkBackend};
use crate::client::{FileSystemKeyStore, KeyStore, RpcProvider};
use crate::error::{Error, KeyStoreError};
use crate::types::{AccountId, KeyPair, NearToken, Network, PublicKey, parent_account_id};

/// Public testnet account helper.
pub const TESTNET_HELPER_URL: &str = "https://helper.testnet.near.org";

const TOP_LEVEL_SUFFIX: &str = "testnet";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest<'a> {
    new_account_id: &'a AccountId,
    new_account_public_key: String,
}

/// Testnet account creation through the helper service and the root account.
#[derive(Clone, Debug)]
pub struct TestnetBackend {
    helper_url: String,
    http: reqwest::Client,
}

impl TestnetBackend {
    pub fn new(helper_url: impl Into<String>) -> Self {
        Self {
            helper_url: helper_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// A fresh top-level id such as `r-1718000000000-123456.testnet`.
    pub fn generate_account_id(prefix: &str) -> Result<AccountId, Error> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = rand::random::<u32>() % 1_000_000;
        Ok(format!("{prefix}-{millis}-{suffix}.{TOP_LEVEL_SUFFIX}").parse()?)
    }

    /// Ask the helper to create a top-level account owned by `public_key`.
    pub async fn create_top_level_account(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
    ) -> Result<(), Error> {
        let failed = |message: String| Error::AccountCreation {
            account_id: account_id.clone(),
            message,
        };

        let request = CreateAccountRequest {
            new_account_id: account_id,
            new_account_public_key: public_key.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/account", self.helper_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("helper returned {status}: {body}")));
        }
        debug!(account_id = %account_id, "Helper created account");
        Ok(())
    }

    /// Build a manager rooted at `master_account`, creating it through the
    /// helper when it does not exist yet.
    ///
    /// Without a master account a fresh one is generated. Keys live in
    /// `key_store`, by default `~/.near-credentials`.
    pub async fn connect(
        rpc: Arc<dyn RpcProvider>,
        key_store: Option<Arc<dyn KeyStore>>,
        master_account: Option<AccountId>,
        helper_url: &str,
    ) -> Result<AccountManager, Error> {
        let key_store = match key_store {
            Some(key_store) => key_store,
            None => Arc::new(FileSystemKeyStore::home()?),
        };
        let root_account_id = match master_account {
            Some(account_id) => account_id,
            None => Self::generate_account_id("r")?,
        };
        let backend = Arc::new(Self::new(helper_url));
        let manager = AccountManager::new(rpc, key_store, backend.clone(), root_account_id);
        let root = manager.root_account_id();

        let key = manager.get_key(root).await?;
        if manager.exists(root).await? {
            if key.is_none() {
                return Err(KeyStoreError::KeyNotFound {
                    network: Network::Testnet.to_string(),
                    account_id: root.clone(),
                }
                .into());
            }
        } else {
            let key = manager.set_key(root, key).await?;
            backend.create_top_level_account(root, &key.public_key).await?;
            info!(root = %root, "Created testnet master account");
        }
        Ok(manager)
    }
}

impl Default for TestnetBackend {
    fn default() -> Self {
        Self::new(TESTNET_HELPER_URL)
    }
}

#[async_trait]
impl NetworkBackend for TestnetBackend {
    fn network(&self) -> Network {
        Network::Testnet
    }

    fn top_level_suffix(&self) -> &str {
        TOP_LEVEL_SUFFIX
    }

    async fn create_account(
        &self,
        manager: &AccountManager,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), Error> {
        if parent_account_id(account_id) == Some(TOP_LEVEL_SUFFIX) {
            // The helper decides the balance of top-level accounts.
            self.create_top_level_account(account_id, public_key).await?;
            manager.add_account_created(account_id.clone(), manager.root_account_id().clone());
            return Ok(());
        }
        manager
            .create_funded_account(
                manager.root_account_id(),
                account_id,
                public_key,
                initial_balance,
            )
            .await
    }

    async fn add_funds(&self, manager: &AccountManager) -> Result<(), Error> {
        let temp_id = Self::generate_account_id("fund")?;
        let key = KeyPair::random();
        self.create_top_level_account(&temp_id, &key.public_key)
            .await?;

        let result = manager
            .delete_account(&temp_id, manager.root_account_id(), Some(key))
            .await?;
        if result.failed() {
            return Err(Error::TransactionFailed(Box::new(result)));
        }
        info!(root = %manager.root_account_id(), "Added funds to root account");
        Ok(())
    }
}
