//! Per-account convenience layer.
//!
//! An [`Account`] is an account id plus the [`AccountManager`] that holds its
//! keys. Every method delegates to the manager; the handle itself is cheap to
//! clone and carries no state of its own.
//!
//! ```rust,no_run
//! # use near_runner::*;
//! # async fn example(root: Account, wasm: Vec<u8>) -> Result<(), Error> {
//! let contract = root
//!     .create_and_deploy("counter", wasm, CreateAccountOptions::default(), DeployOptions::default())
//!     .await?;
//! let alice = root.create_sub_account("alice", CreateAccountOptions::default()).await?;
//!
//! alice
//!     .call(contract.account_id(), "increment")
//!     .args_json(serde_json::json!({ "by": 2 }))
//!     .await?;
//! let count: u64 = contract.view("get_count", &serde_json::json!({})).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use crate::error::Error;
use crate::manager::AccountManager;
use crate::transaction::{ManagedTransaction, TransactionResult};
use crate::types::{
    AccessKey, AccountBalance, AccountId, Finality, Gas, KeyPair, NearToken, ViewFunctionResult,
    ViewStateResult, is_sub_account_of,
};

/// Gas attached to function calls unless overridden.
pub const DEFAULT_CALL_GAS: Gas = Gas::from_tgas(30);

/// Options for creating an account.
#[derive(Clone, Debug, Default)]
pub struct CreateAccountOptions {
    /// Key for the new account. A random key is generated when `None`.
    pub key: Option<KeyPair>,
    /// Balance to fund the account with. The network default when `None`.
    pub initial_balance: Option<NearToken>,
}

/// An optional initialization call run right after deployment.
#[derive(Clone, Debug)]
pub struct DeployOptions {
    /// Method to call after deploying; no call when `None`.
    pub method: Option<String>,
    /// JSON (or otherwise encoded) arguments for `method`.
    pub args: Vec<u8>,
    pub gas: Gas,
    pub attached_deposit: NearToken,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            method: None,
            args: Vec::new(),
            gas: DEFAULT_CALL_GAS,
            attached_deposit: NearToken::from_yoctonear(0),
        }
    }
}

// ============================================================================
// Account
// ============================================================================

/// A handle to one account, bound to its manager.
#[derive(Clone)]
pub struct Account {
    account_id: AccountId,
    manager: Arc<AccountManager>,
}

impl Account {
    pub(crate) fn new(account_id: AccountId, manager: Arc<AccountManager>) -> Self {
        Self {
            account_id,
            manager,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        &self.manager
    }

    /// The same account bound to a different manager.
    pub fn rebind(&self, manager: Arc<AccountManager>) -> Self {
        Self::new(self.account_id.clone(), manager)
    }

    pub async fn exists(&self) -> Result<bool, Error> {
        self.manager.exists(&self.account_id).await
    }

    pub async fn balance(&self) -> Result<AccountBalance, Error> {
        self.manager.balance(&self.account_id).await
    }

    /// Spendable balance after storage costs.
    pub async fn available_balance(&self) -> Result<NearToken, Error> {
        Ok(self.balance().await?.available)
    }

    /// Start a transaction from this account to `receiver_id`.
    pub fn batch(&self, receiver_id: AccountId) -> ManagedTransaction {
        self.manager
            .transaction(self.account_id.clone(), receiver_id)
    }

    // ------------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------------

    /// Full id for `prefix` under this account.
    ///
    /// Ids that are already sub-accounts of this account, or that are the
    /// root or a top-level account, are returned unchanged.
    pub fn make_sub_account(&self, prefix: &str) -> Result<AccountId, Error> {
        if let Ok(candidate) = prefix.parse::<AccountId>() {
            if is_sub_account_of(&candidate, &self.account_id)
                || self.manager.is_root_or_top_level(&candidate)
            {
                return Ok(candidate);
            }
        }
        Ok(format!("{prefix}.{}", self.account_id).parse()?)
    }

    /// Handle to a sub-account. Does not check that it exists.
    pub fn get_sub_account(&self, prefix: &str) -> Result<Account, Error> {
        Ok(self.manager.get_account(self.make_sub_account(prefix)?))
    }

    // ------------------------------------------------------------------------
    // Account lifecycle
    // ------------------------------------------------------------------------

    /// Create `account_id` from this account and fund it.
    pub async fn create_account(
        &self,
        account_id: &str,
        options: CreateAccountOptions,
    ) -> Result<Account, Error> {
        let account_id: AccountId = account_id.parse()?;
        self.manager
            .create_account(
                &self.account_id,
                &account_id,
                options.key,
                options.initial_balance,
            )
            .await?;
        Ok(self.manager.get_account(account_id))
    }

    /// Create `<prefix>.<this account>`.
    pub async fn create_sub_account(
        &self,
        prefix: &str,
        options: CreateAccountOptions,
    ) -> Result<Account, Error> {
        let account_id = self.make_sub_account(prefix)?;
        self.create_account(account_id.as_str(), options).await
    }

    /// Create a sub-account and deploy `code` to it in one transaction,
    /// optionally calling an init method.
    pub async fn create_and_deploy(
        &self,
        prefix: &str,
        code: impl Into<Vec<u8>>,
        options: CreateAccountOptions,
        deploy: DeployOptions,
    ) -> Result<Account, Error> {
        let account_id = self.make_sub_account(prefix)?;
        let key = self.manager.set_key(&account_id, options.key).await?;
        let balance = options
            .initial_balance
            .unwrap_or_else(|| self.manager.default_initial_balance());

        let mut tx = self
            .batch(account_id.clone())
            .create_account()
            .transfer(balance)
            .add_key(key.public_key, AccessKey::full_access())
            .deploy_contract(code);
        if let Some(method) = deploy.method {
            tx = tx.function_call(method, deploy.args, deploy.gas, deploy.attached_deposit);
        }

        let result = match tx.transact(None).await {
            Ok(result) if result.succeeded() => result,
            Ok(result) => {
                self.manager.remove_key(&account_id).await;
                return Err(Error::AccountCreation {
                    account_id,
                    message: result.summary(),
                });
            }
            Err(e) => {
                self.manager.remove_key(&account_id).await;
                return Err(e);
            }
        };
        tracing::info!(account_id = %account_id, hash = %result.transaction_hash(), "Created and deployed contract");
        Ok(self.manager.get_account(account_id))
    }

    /// Deploy `code` to this account.
    pub async fn deploy(&self, code: impl Into<Vec<u8>>) -> Result<TransactionResult, Error> {
        self.batch(self.account_id.clone())
            .deploy_contract(code)
            .transact(None)
            .await
    }

    /// Send NEAR to `receiver_id`.
    pub async fn transfer(
        &self,
        receiver_id: &AccountId,
        amount: NearToken,
    ) -> Result<TransactionResult, Error> {
        self.batch(receiver_id.clone())
            .transfer(amount)
            .transact(None)
            .await
    }

    /// Delete this account, sending its balance to `beneficiary_id`.
    pub async fn delete(
        &self,
        beneficiary_id: &AccountId,
        key: Option<KeyPair>,
    ) -> Result<TransactionResult, Error> {
        self.manager
            .delete_account(&self.account_id, beneficiary_id, key)
            .await
    }

    // ------------------------------------------------------------------------
    // Calls and views
    // ------------------------------------------------------------------------

    /// Call `method` on `contract_id`, failing with
    /// [`Error::TransactionFailed`] if execution fails.
    pub fn call(&self, contract_id: &AccountId, method: impl Into<String>) -> CallBuilder {
        CallBuilder::new(self.clone(), contract_id.clone(), method.into(), false)
    }

    /// Like [`call`](Self::call), but a failed execution is returned as a
    /// result instead of an error.
    pub fn call_raw(&self, contract_id: &AccountId, method: impl Into<String>) -> CallBuilder {
        CallBuilder::new(self.clone(), contract_id.clone(), method.into(), true)
    }

    /// Call a view method on this account's contract and parse the JSON result.
    pub async fn view<T: DeserializeOwned>(
        &self,
        method: &str,
        args: &impl Serialize,
    ) -> Result<T, Error> {
        let args = serde_json::to_vec(args)?;
        Ok(self.view_raw(method, &args).await?.json()?)
    }

    pub async fn view_raw(&self, method: &str, args: &[u8]) -> Result<ViewFunctionResult, Error> {
        Ok(self
            .manager
            .rpc()
            .call_function(&self.account_id, method, args, Finality::Optimistic)
            .await?)
    }

    /// Contract storage under `prefix` (empty for everything).
    pub async fn view_state(&self, prefix: &[u8]) -> Result<ViewStateResult, Error> {
        Ok(self
            .manager
            .rpc()
            .view_state(&self.account_id, prefix, Finality::Optimistic)
            .await?)
    }

    /// The deployed WASM.
    pub async fn view_code(&self) -> Result<Vec<u8>, Error> {
        let view = self
            .manager
            .rpc()
            .view_code(&self.account_id, Finality::Optimistic)
            .await?;
        Ok(view.code()?)
    }

    /// Overwrite one storage entry of this account's contract (sandbox only).
    pub async fn patch_state(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let network = self.manager.network();
        if !network.is_sandbox() {
            return Err(Error::Unsupported {
                network: network.to_string(),
                operation: "patch_state",
            });
        }
        let records = serde_json::json!([{
            "Data": {
                "account_id": self.account_id,
                "data_key": STANDARD.encode(key),
                "value": STANDARD.encode(value),
            }
        }]);
        Ok(self.manager.rpc().sandbox_patch_state(records).await?)
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    pub async fn get_key(&self) -> Result<Option<KeyPair>, Error> {
        self.manager.get_key(&self.account_id).await
    }

    /// Store `key` (or a fresh one) as this account's key.
    pub async fn set_key(&self, key: Option<KeyPair>) -> Result<KeyPair, Error> {
        self.manager.set_key(&self.account_id, key).await
    }
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.account_id.serialize(s)
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id
    }
}

impl Eq for Account {}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.account_id, f)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Account").field(&self.account_id).finish()
    }
}

// ============================================================================
// CallBuilder
// ============================================================================

/// A function call under construction. Await it to submit.
pub struct CallBuilder {
    signer: Account,
    contract_id: AccountId,
    method: String,
    args: Result<Vec<u8>, serde_json::Error>,
    gas: Gas,
    deposit: NearToken,
    key: Option<KeyPair>,
    raw: bool,
}

impl CallBuilder {
    fn new(signer: Account, contract_id: AccountId, method: String, raw: bool) -> Self {
        Self {
            signer,
            contract_id,
            method,
            args: Ok(b"{}".to_vec()),
            gas: DEFAULT_CALL_GAS,
            deposit: NearToken::from_yoctonear(0),
            key: None,
            raw,
        }
    }

    /// JSON arguments.
    pub fn args_json<A: Serialize>(mut self, args: A) -> Self {
        self.args = serde_json::to_vec(&args);
        self
    }

    /// Pre-encoded arguments.
    pub fn args(mut self, args: impl Into<Vec<u8>>) -> Self {
        self.args = Ok(args.into());
        self
    }

    pub fn gas(mut self, gas: Gas) -> Self {
        self.gas = gas;
        self
    }

    pub fn deposit(mut self, deposit: NearToken) -> Self {
        self.deposit = deposit;
        self
    }

    /// Sign with `key` for this call only.
    pub fn signing_key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    pub async fn transact(self) -> Result<TransactionResult, Error> {
        let args = self.args?;
        let result = self
            .signer
            .batch(self.contract_id)
            .function_call(self.method, args, self.gas, self.deposit)
            .transact(self.key)
            .await?;
        if result.failed() && !self.raw {
            return Err(Error::TransactionFailed(Box::new(result)));
        }
        Ok(result)
    }
}

impl IntoFuture for CallBuilder {
    type Output = Result<TransactionResult, Error>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.transact())
    }
}
