//! Account and key lifecycle.
//!
//! [`AccountManager`] is the single authority over key material, account
//! creation and deletion, and transaction execution for one network. What
//! differs between networks (how accounts are created and funded) lives
//! behind the [`NetworkBackend`] trait, with [`SandboxBackend`] and
//! [`TestnetBackend`] as the two implementations.
//!
//! # Ephemeral keys
//!
//! [`AccountManager::execute_transaction`] accepts an optional key. When one
//! is given it is installed as the signer's key for exactly one submission,
//! after which the store is put back the way it was: the previous key is
//! restored, or, if the signer had none, the temporary key is removed. This
//! holds for both success and failure, so throwaway keys never outlive the
//! transaction that used them.
//!
//! # Concurrency
//!
//! Operations are not serialized per signer. Two concurrent submissions from
//! the same account race on the nonce; callers that need ordering for one
//! sender must await them in sequence.

mod retry;
mod sandbox;
mod testnet;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::client::{KeyStore, RpcProvider};
use crate::error::{Error, KeyStoreError, RpcError};
use crate::transaction::{ManagedTransaction, Transaction, TransactionResult};
use crate::types::{
    AccessKey, AccountBalance, AccountId, Finality, KeyPair, NearToken, Network, PublicKey,
    TxExecutionStatus, UnsignedTransaction, parent_account_id,
};

pub use retry::RetryPolicy;
pub use sandbox::{SANDBOX_ROOT_ACCOUNT, SandboxBackend};
pub use testnet::{TESTNET_HELPER_URL, TestnetBackend};

/// Balance given to accounts created without an explicit amount.
pub const DEFAULT_INITIAL_BALANCE: NearToken = NearToken::from_near(10);

// ============================================================================
// NetworkBackend
// ============================================================================

/// The network-specific half of account management.
#[async_trait]
pub trait NetworkBackend: Send + Sync + std::fmt::Debug {
    /// The network this backend talks to.
    fn network(&self) -> Network;

    /// Suffix of top-level account ids (`near` on sandbox, `testnet` on testnet).
    fn top_level_suffix(&self) -> &str;

    /// Balance for new accounts when the caller does not pick one.
    fn default_initial_balance(&self) -> NearToken {
        DEFAULT_INITIAL_BALANCE
    }

    /// Create and fund `account_id` with `public_key` as its full-access key.
    ///
    /// Implementations register the account with the manager once it exists.
    async fn create_account(
        &self,
        manager: &AccountManager,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), Error>;

    /// Add balance to the root account.
    async fn add_funds(&self, _manager: &AccountManager) -> Result<(), Error> {
        Err(Error::Unsupported {
            network: self.network().to_string(),
            operation: "add_funds",
        })
    }
}

// ============================================================================
// CleanupReport
// ============================================================================

/// What [`AccountManager::cleanup`] managed to delete.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Accounts deleted.
    pub deleted: Vec<AccountId>,
    /// Accounts whose deletion failed, with the reason.
    pub failed: Vec<(AccountId, Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// AccountManager
// ============================================================================

/// Owns the key store handle, the node connection and the registry of
/// accounts created during a run.
pub struct AccountManager {
    rpc: Arc<dyn RpcProvider>,
    key_store: Arc<dyn KeyStore>,
    backend: Arc<dyn NetworkBackend>,
    root_account_id: AccountId,
    /// accountId -> the account that created it.
    accounts_created: Mutex<BTreeMap<AccountId, AccountId>>,
    wait_until: TxExecutionStatus,
}

impl AccountManager {
    /// Assemble a manager. Prefer [`SandboxBackend::connect`] or
    /// [`TestnetBackend::connect`], which also install the root key.
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        key_store: Arc<dyn KeyStore>,
        backend: Arc<dyn NetworkBackend>,
        root_account_id: AccountId,
    ) -> Self {
        Self {
            rpc,
            key_store,
            backend,
            root_account_id,
            accounts_created: Mutex::new(BTreeMap::new()),
            wait_until: TxExecutionStatus::default(),
        }
    }

    /// Change how long `send_tx` waits before answering.
    pub fn with_wait_until(mut self, wait_until: TxExecutionStatus) -> Self {
        self.wait_until = wait_until;
        self
    }

    pub fn network(&self) -> Network {
        self.backend.network()
    }

    pub fn root_account_id(&self) -> &AccountId {
        &self.root_account_id
    }

    pub fn rpc(&self) -> &Arc<dyn RpcProvider> {
        &self.rpc
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.key_store
    }

    pub fn backend(&self) -> &Arc<dyn NetworkBackend> {
        &self.backend
    }

    pub fn default_initial_balance(&self) -> NearToken {
        self.backend.default_initial_balance()
    }

    // ------------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------------

    /// Handle to an account. Does not check that it exists.
    pub fn get_account(self: &Arc<Self>, account_id: AccountId) -> Account {
        Account::new(account_id, Arc::clone(self))
    }

    /// Handle to the account one dot-segment up.
    pub fn get_parent_account(self: &Arc<Self>, account_id: &AccountId) -> Result<Account, Error> {
        let parent = parent_account_id(account_id)
            .ok_or_else(|| Error::NoParentAccount(account_id.clone()))?;
        Ok(self.get_account(parent.parse()?))
    }

    /// Handle to the root account.
    pub fn root(self: &Arc<Self>) -> Account {
        self.get_account(self.root_account_id.clone())
    }

    /// Whether `account_id` is the root or a top-level account of this network.
    pub fn is_root_or_top_level(&self, account_id: &AccountId) -> bool {
        account_id == &self.root_account_id
            || parent_account_id(account_id) == Some(self.backend.top_level_suffix())
    }

    /// Start a transaction from `signer_id` to `receiver_id`.
    pub fn transaction(
        self: &Arc<Self>,
        signer_id: AccountId,
        receiver_id: AccountId,
    ) -> ManagedTransaction {
        ManagedTransaction::new(Arc::clone(self), signer_id, receiver_id)
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    /// Store `key` (or a fresh random key) for the account and return it.
    pub async fn set_key(
        &self,
        account_id: &AccountId,
        key: Option<KeyPair>,
    ) -> Result<KeyPair, Error> {
        let key = key.unwrap_or_else(KeyPair::random);
        self.key_store
            .set_key(self.network().as_str(), account_id, &key)
            .await?;
        Ok(key)
    }

    pub async fn get_key(&self, account_id: &AccountId) -> Result<Option<KeyPair>, Error> {
        Ok(self
            .key_store
            .get_key(self.network().as_str(), account_id)
            .await?)
    }

    /// Remove the account's key. Failures are logged, never returned.
    pub async fn remove_key(&self, account_id: &AccountId) {
        if let Err(e) = self
            .key_store
            .remove_key(self.network().as_str(), account_id)
            .await
        {
            warn!(account_id = %account_id, error = %e, "Failed to remove key");
        }
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Sign `tx` as its signer and submit it.
    ///
    /// Without `key`, the signer's stored key signs. With `key`, the stored
    /// key is swapped out for this one submission and the store is restored
    /// afterwards, whether or not the submission succeeded.
    ///
    /// An on-chain failure comes back as `Ok` with a failed
    /// [`TransactionResult`]; `Err` means the transaction could not be
    /// signed or submitted.
    pub async fn execute_transaction(
        &self,
        tx: &Transaction,
        key: Option<KeyPair>,
    ) -> Result<TransactionResult, Error> {
        let signer_id = tx.signer_id();
        let result = match key {
            None => self.sign_and_send(tx).await,
            Some(key) => {
                let previous = self.get_key(signer_id).await?;
                self.set_key(signer_id, Some(key)).await?;
                let result = self.sign_and_send(tx).await;
                self.restore_key(signer_id, previous).await;
                result
            }
        }?;

        if result.succeeded() {
            self.record_effects(tx).await;
        }
        Ok(result)
    }

    async fn restore_key(&self, account_id: &AccountId, previous: Option<KeyPair>) {
        match previous {
            Some(key) => {
                if let Err(e) = self.set_key(account_id, Some(key)).await {
                    warn!(account_id = %account_id, error = %e, "Failed to restore key");
                }
            }
            None => self.remove_key(account_id).await,
        }
    }

    async fn sign_and_send(&self, tx: &Transaction) -> Result<TransactionResult, Error> {
        let signer_id = tx.signer_id();
        let key = self
            .get_key(signer_id)
            .await?
            .ok_or_else(|| KeyStoreError::KeyNotFound {
                network: self.network().to_string(),
                account_id: signer_id.clone(),
            })?;

        // Fetched just in time, with no per-signer lock.
        let access_key = self
            .rpc
            .view_access_key(signer_id, &key.public_key, Finality::Optimistic)
            .await?;
        let block = self.rpc.block(Finality::Final).await?;

        let signed = UnsignedTransaction {
            signer_id: signer_id.clone(),
            public_key: key.public_key,
            nonce: access_key.nonce + 1,
            receiver_id: tx.receiver_id().clone(),
            block_hash: block.header.hash,
            actions: tx.actions().to_vec(),
        }
        .sign(&key)?;

        debug!(
            signer_id = %signer_id,
            receiver_id = %tx.receiver_id(),
            nonce = signed.transaction.nonce,
            actions = tx.actions().len(),
            hash = %signed.hash(),
            "Sending transaction"
        );

        let started = Instant::now();
        let outcome = self.rpc.send_tx(&signed, self.wait_until).await?;
        let result = TransactionResult::new(outcome, started.elapsed());

        debug!(
            hash = %result.transaction_hash(),
            elapsed_ms = result.elapsed().as_millis() as u64,
            status = %result.summary(),
            "Transaction finished"
        );
        Ok(result)
    }

    /// Registry bookkeeping for a transaction that succeeded on chain.
    async fn record_effects(&self, tx: &Transaction) {
        let receiver_id = tx.receiver_id();
        if tx.creates_account() {
            self.add_account_created(receiver_id.clone(), tx.signer_id().clone());
        }
        if tx.deleted_account_beneficiary().is_some() {
            self.remove_key(receiver_id).await;
            self.registry().remove(receiver_id);
        }
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    /// Create `account_id` from `creator`.
    ///
    /// `key` (or a fresh one) is stored before submission and removed again
    /// if creation fails. Creation from the root goes through the network
    /// backend; creation from any other account is a plain
    /// `CreateAccount, Transfer, AddKey` transaction.
    pub async fn create_account(
        &self,
        creator: &AccountId,
        account_id: &AccountId,
        key: Option<KeyPair>,
        initial_balance: Option<NearToken>,
    ) -> Result<KeyPair, Error> {
        let key = self.set_key(account_id, key).await?;
        let balance = initial_balance.unwrap_or_else(|| self.default_initial_balance());

        let created = if creator == &self.root_account_id {
            self.backend
                .create_account(self, account_id, &key.public_key, balance)
                .await
        } else {
            self.create_funded_account(creator, account_id, &key.public_key, balance)
                .await
        };

        if let Err(e) = created {
            self.remove_key(account_id).await;
            return Err(e);
        }
        info!(account_id = %account_id, creator = %creator, balance = %balance, "Created account");
        Ok(key)
    }

    /// `CreateAccount, Transfer, AddKey` signed by `creator`.
    pub async fn create_funded_account(
        &self,
        creator: &AccountId,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), Error> {
        let tx = Transaction::new(creator.clone(), account_id.clone())
            .create_account()
            .transfer(initial_balance)
            .add_key(*public_key, AccessKey::full_access());
        let result = self.execute_transaction(&tx, None).await?;
        if result.failed() {
            return Err(Error::AccountCreation {
                account_id: account_id.clone(),
                message: result.summary(),
            });
        }
        Ok(())
    }

    /// Delete an account, falling back to its stored key if `key` fails.
    pub async fn delete_account(
        &self,
        account_id: &AccountId,
        beneficiary_id: &AccountId,
        key: Option<KeyPair>,
    ) -> Result<TransactionResult, Error> {
        self.delete_account_with(account_id, beneficiary_id, key, RetryPolicy::default())
            .await
    }

    /// Delete an account under an explicit retry policy.
    pub async fn delete_account_with(
        &self,
        account_id: &AccountId,
        beneficiary_id: &AccountId,
        key: Option<KeyPair>,
        policy: RetryPolicy,
    ) -> Result<TransactionResult, Error> {
        let tx = Transaction::new(account_id.clone(), account_id.clone())
            .delete_account(beneficiary_id.clone());

        let mut fallbacks = policy.attempts(key).into_iter();
        let first = fallbacks.next().flatten();
        let mut ephemeral = first.is_some();
        let mut outcome = self.execute_transaction(&tx, first).await;
        for key in fallbacks {
            match &outcome {
                Ok(result) if result.succeeded() => break,
                Ok(result) => warn!(
                    account_id = %account_id,
                    ephemeral,
                    status = %result.summary(),
                    "Delete failed, retrying with stored key"
                ),
                Err(e) => warn!(
                    account_id = %account_id,
                    ephemeral,
                    error = %e,
                    "Delete failed, retrying with stored key"
                ),
            }
            ephemeral = key.is_some();
            outcome = self.execute_transaction(&tx, key).await;
        }
        outcome
    }

    /// Top up the root account (testnet only).
    pub async fn add_funds(&self) -> Result<(), Error> {
        self.backend.add_funds(self).await
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    fn registry(&self) -> MutexGuard<'_, BTreeMap<AccountId, AccountId>> {
        self.accounts_created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Record an account created during this run so cleanup deletes it.
    pub fn add_account_created(&self, account_id: AccountId, creator: AccountId) {
        debug!(account_id = %account_id, creator = %creator, "Registered created account");
        self.registry().insert(account_id, creator);
    }

    /// Accounts created during this run, with their creators.
    pub fn accounts_created(&self) -> BTreeMap<AccountId, AccountId> {
        self.registry().clone()
    }

    /// Delete every registered account, crediting the root.
    ///
    /// Best effort: one failed deletion does not stop the others. Keys of
    /// every registered account are removed either way.
    pub async fn cleanup(&self) -> CleanupReport {
        let accounts: Vec<AccountId> = std::mem::take(&mut *self.registry())
            .into_keys()
            .collect();

        let deletions = accounts.iter().map(|account_id| async move {
            let outcome = match self
                .delete_account(account_id, &self.root_account_id, None)
                .await
            {
                Ok(result) if result.succeeded() => Ok(()),
                Ok(result) => Err(Error::TransactionFailed(Box::new(result))),
                Err(e) => Err(e),
            };
            self.remove_key(account_id).await;
            (account_id.clone(), outcome)
        });

        let mut report = CleanupReport::default();
        for (account_id, outcome) in join_all(deletions).await {
            match outcome {
                Ok(()) => report.deleted.push(account_id),
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Failed to delete account during cleanup");
                    report.failed.push((account_id, e));
                }
            }
        }
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Cleanup finished"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn balance(&self, account_id: &AccountId) -> Result<AccountBalance, Error> {
        Ok(self
            .rpc
            .view_account(account_id, Finality::Optimistic)
            .await?
            .into())
    }

    pub async fn exists(&self, account_id: &AccountId) -> Result<bool, Error> {
        match self.rpc.view_account(account_id, Finality::Optimistic).await {
            Ok(_) => Ok(true),
            Err(RpcError::AccountNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the account's available balance is at least `amount`.
    pub async fn can_cover_balance(
        &self,
        account_id: &AccountId,
        amount: NearToken,
    ) -> Result<bool, Error> {
        Ok(self.balance(account_id).await?.available >= amount)
    }
}

impl std::fmt::Debug for AccountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountManager")
            .field("network", &self.network())
            .field("root_account_id", &self.root_account_id)
            .field("accounts_created", &self.registry().len())
            .finish()
    }
}
