//! Transaction builders and results.
//!
//! [`Transaction`] is a plain, ordered list of actions from a signer to a
//! receiver. [`ManagedTransaction`] binds one to an
//! [`AccountManager`](crate::AccountManager) so it can be submitted with
//! [`transact`](ManagedTransaction::transact).
//!
//! ```rust,no_run
//! # use near_runner::*;
//! # async fn example(root: Account) -> Result<(), Error> {
//! let key = KeyPair::random();
//! let result = root
//!     .batch("bob.test.near".parse()?)
//!     .create_account()
//!     .transfer(NearToken::from_near(5))
//!     .add_key(key.public_key, AccessKey::full_access())
//!     .transact(None)
//!     .await?;
//! assert!(result.succeeded());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::de::DeserializeOwned;

use crate::error::{Error, RpcError};
use crate::manager::AccountManager;
use crate::types::{
    AccessKey, AccountId, Action, ContractCode, CryptoHash, ExecutionStatus, FinalExecutionOutcome,
    Gas, KeyPair, NearToken, PublicKey,
};

// ============================================================================
// Transaction
// ============================================================================

/// An ordered batch of actions from `signer_id` to `receiver_id`.
///
/// Building is pure: nothing touches the network until the transaction is
/// handed to [`AccountManager::execute_transaction`]. Each submission fetches
/// a fresh nonce, so submitting the same value twice produces two distinct
/// on-chain transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    signer_id: AccountId,
    receiver_id: AccountId,
    actions: Vec<Action>,
}

impl Transaction {
    /// Start an empty transaction.
    pub fn new(signer_id: AccountId, receiver_id: AccountId) -> Self {
        Self {
            signer_id,
            receiver_id,
            actions: Vec::new(),
        }
    }

    pub fn signer_id(&self) -> &AccountId {
        &self.signer_id
    }

    pub fn receiver_id(&self) -> &AccountId {
        &self.receiver_id
    }

    /// Actions in submission order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Whether the transaction creates its receiver.
    pub fn creates_account(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::CreateAccount))
    }

    /// Beneficiary of a `DeleteAccount` action, if there is one.
    pub fn deleted_account_beneficiary(&self) -> Option<&AccountId> {
        self.actions.iter().find_map(|a| match a {
            Action::DeleteAccount { beneficiary_id } => Some(beneficiary_id),
            _ => None,
        })
    }

    /// Append an arbitrary action.
    pub fn add_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Create the receiver account.
    pub fn create_account(self) -> Self {
        self.add_action(Action::CreateAccount)
    }

    /// Transfer NEAR to the receiver.
    pub fn transfer(self, amount: NearToken) -> Self {
        self.add_action(Action::Transfer { deposit: amount })
    }

    /// Call a method on the receiver with pre-encoded arguments.
    pub fn function_call(
        self,
        method_name: impl Into<String>,
        args: impl Into<Vec<u8>>,
        gas: Gas,
        deposit: NearToken,
    ) -> Self {
        self.add_action(Action::FunctionCall {
            method_name: method_name.into(),
            args: args.into(),
            gas,
            deposit,
        })
    }

    /// Add an access key to the receiver.
    pub fn add_key(self, public_key: PublicKey, access_key: AccessKey) -> Self {
        self.add_action(Action::AddKey {
            public_key,
            access_key,
        })
    }

    /// Delete an access key from the receiver.
    pub fn delete_key(self, public_key: PublicKey) -> Self {
        self.add_action(Action::DeleteKey { public_key })
    }

    /// Deploy contract code to the receiver.
    pub fn deploy_contract(self, code: impl Into<Vec<u8>>) -> Self {
        self.add_action(Action::DeployContract {
            code: ContractCode(code.into()),
        })
    }

    /// Deploy contract code read from a file.
    pub async fn deploy_contract_file(self, path: impl AsRef<Path>) -> Result<Self, Error> {
        let code = tokio::fs::read(path.as_ref()).await?;
        Ok(self.deploy_contract(code))
    }

    /// Stake with the given validator key.
    pub fn stake(self, amount: NearToken, public_key: PublicKey) -> Self {
        self.add_action(Action::Stake {
            stake: amount,
            public_key,
        })
    }

    /// Delete the receiver, sending its remaining balance to `beneficiary_id`.
    pub fn delete_account(self, beneficiary_id: AccountId) -> Self {
        self.add_action(Action::DeleteAccount { beneficiary_id })
    }
}

// ============================================================================
// ManagedTransaction
// ============================================================================

/// A [`Transaction`] bound to the manager that will sign and submit it.
#[derive(Clone)]
pub struct ManagedTransaction {
    transaction: Transaction,
    manager: Arc<AccountManager>,
}

impl ManagedTransaction {
    pub(crate) fn new(
        manager: Arc<AccountManager>,
        signer_id: AccountId,
        receiver_id: AccountId,
    ) -> Self {
        Self {
            transaction: Transaction::new(signer_id, receiver_id),
            manager,
        }
    }

    fn map(mut self, f: impl FnOnce(Transaction) -> Transaction) -> Self {
        self.transaction = f(self.transaction);
        self
    }

    /// The underlying action batch.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn create_account(self) -> Self {
        self.map(Transaction::create_account)
    }

    pub fn transfer(self, amount: NearToken) -> Self {
        self.map(|tx| tx.transfer(amount))
    }

    pub fn function_call(
        self,
        method_name: impl Into<String>,
        args: impl Into<Vec<u8>>,
        gas: Gas,
        deposit: NearToken,
    ) -> Self {
        self.map(|tx| tx.function_call(method_name, args, gas, deposit))
    }

    pub fn add_key(self, public_key: PublicKey, access_key: AccessKey) -> Self {
        self.map(|tx| tx.add_key(public_key, access_key))
    }

    pub fn delete_key(self, public_key: PublicKey) -> Self {
        self.map(|tx| tx.delete_key(public_key))
    }

    pub fn deploy_contract(self, code: impl Into<Vec<u8>>) -> Self {
        self.map(|tx| tx.deploy_contract(code))
    }

    pub async fn deploy_contract_file(mut self, path: impl AsRef<Path>) -> Result<Self, Error> {
        self.transaction = self.transaction.deploy_contract_file(path).await?;
        Ok(self)
    }

    pub fn stake(self, amount: NearToken, public_key: PublicKey) -> Self {
        self.map(|tx| tx.stake(amount, public_key))
    }

    pub fn delete_account(self, beneficiary_id: AccountId) -> Self {
        self.map(|tx| tx.delete_account(beneficiary_id))
    }

    /// Sign and submit.
    ///
    /// With `key`, the signer's stored key is swapped for `key` for the
    /// duration of this one submission (see
    /// [`AccountManager::execute_transaction`]). May be called repeatedly;
    /// every call is a new on-chain transaction.
    pub async fn transact(&self, key: Option<KeyPair>) -> Result<TransactionResult, Error> {
        self.manager.execute_transaction(&self.transaction, key).await
    }
}

impl std::fmt::Debug for ManagedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTransaction")
            .field("transaction", &self.transaction)
            .field("network", &self.manager.network())
            .finish()
    }
}

// ============================================================================
// TransactionResult
// ============================================================================

/// The outcome of a submitted transaction.
///
/// A failed on-chain execution is still a `TransactionResult`; inspect
/// [`succeeded`](Self::succeeded) or [`receipt_failures`](Self::receipt_failures).
#[derive(Clone, Debug)]
pub struct TransactionResult {
    outcome: FinalExecutionOutcome,
    elapsed: Duration,
}

impl TransactionResult {
    pub fn new(outcome: FinalExecutionOutcome, elapsed: Duration) -> Self {
        Self { outcome, elapsed }
    }

    /// The raw outcome returned by the node.
    pub fn outcome(&self) -> &FinalExecutionOutcome {
        &self.outcome
    }

    /// Wall-clock time between submission and response.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.status.is_success()
    }

    pub fn failed(&self) -> bool {
        self.outcome.status.is_failure()
    }

    pub fn transaction_hash(&self) -> &CryptoHash {
        &self.outcome.transaction.hash
    }

    /// Logs from the transaction and every receipt, in execution order.
    pub fn logs(&self) -> Vec<&str> {
        std::iter::once(&self.outcome.transaction_outcome)
            .chain(&self.outcome.receipts_outcome)
            .flat_map(|o| o.outcome.logs.iter().map(String::as_str))
            .collect()
    }

    /// Failure payloads of receipts that failed.
    pub fn receipt_failures(&self) -> Vec<&serde_json::Value> {
        self.outcome
            .receipts_outcome
            .iter()
            .filter_map(|o| match &o.outcome.status {
                ExecutionStatus::Failure(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// Base64 return values of receipts that succeeded with a value.
    pub fn receipt_success_values(&self) -> Vec<&str> {
        self.outcome
            .receipts_outcome
            .iter()
            .filter_map(|o| match &o.outcome.status {
                ExecutionStatus::SuccessValue(v) => Some(v.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The decoded value the transaction returned. Empty when it returned
    /// nothing or did not succeed with a value.
    pub fn raw_value(&self) -> Result<Vec<u8>, Error> {
        match &self.outcome.status {
            ExecutionStatus::SuccessValue(v) => STANDARD.decode(v).map_err(|e| {
                RpcError::InvalidResponse(format!("return value is not base64: {e}")).into()
            }),
            _ => Ok(Vec::new()),
        }
    }

    /// The returned value parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.raw_value()?)?)
    }

    /// One-line description: `SUCCESS` or the failure payload.
    pub fn summary(&self) -> String {
        match &self.outcome.status {
            ExecutionStatus::Failure(err) => format!("FAILURE {err}"),
            ExecutionStatus::Unknown | ExecutionStatus::Pending => "PENDING".to_string(),
            _ => "SUCCESS".to_string(),
        }
    }
}
