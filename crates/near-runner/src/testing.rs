//! An in-memory node for unit tests.
//!
//! [`MockRpc`] keeps accounts, access keys and nonces, verifies signatures
//! and applies actions atomically the way a node would, so the account
//! manager can be exercised without a sandbox binary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};

use crate::client::{InMemoryKeyStore, KeyStore, RpcProvider};
use crate::error::RpcError;
use crate::manager::{AccountManager, SandboxBackend};
use crate::types::{
    AccessKeyView, AccountId, AccountView, Action, BlockView, CryptoHash, FinalExecutionOutcome,
    Finality, KeyPair, NearToken, ProtocolConfigView, PublicKey, SignedTransaction,
    TxExecutionStatus, ViewCodeResult, ViewFunctionResult, ViewStateResult,
};

/// Storage every mock account is charged for.
const BASE_STORAGE_USAGE: u64 = 182;

/// A `FinalExecutionOutcome` in its JSON wire form.
pub(crate) fn outcome_json(
    status: Value,
    hash: CryptoHash,
    logs: Vec<String>,
    receipt_statuses: Vec<Value>,
) -> Value {
    let outcome = |status: Value, logs: Vec<String>| {
        json!({
            "id": hash,
            "block_hash": CryptoHash::ZERO,
            "proof": [],
            "outcome": {
                "executor_id": "test.near",
                "logs": logs,
                "receipt_ids": [],
                "status": status,
            },
        })
    };
    json!({
        "status": status,
        "transaction": {
            "signer_id": "test.near",
            "public_key": "ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp",
            "nonce": 1,
            "receiver_id": "test.near",
            "hash": hash,
        },
        "transaction_outcome": outcome(json!({"SuccessReceiptId": hash}), logs),
        "receipts_outcome": receipt_statuses
            .into_iter()
            .map(|s| outcome(s, Vec::new()))
            .collect::<Vec<_>>(),
    })
}

#[derive(Clone, Debug, Default)]
struct MockAccount {
    amount: u128,
    keys: HashMap<PublicKey, u64>,
    code: Vec<u8>,
    state: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<AccountId, MockAccount>,
    height: u64,
    sent: Vec<SignedTransaction>,
    fail_sends: usize,
    fail_receivers: HashSet<AccountId>,
    patches: Vec<Value>,
}

/// Recording node double.
#[derive(Debug, Default)]
pub(crate) struct MockRpc {
    inner: Mutex<Inner>,
}

fn action_error(index: usize, kind: Value) -> Value {
    json!({"ActionError": {"index": index, "kind": kind}})
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_account(&self, account_id: &AccountId, public_key: &PublicKey, amount: NearToken) {
        let mut account = MockAccount {
            amount: amount.as_yoctonear(),
            ..Default::default()
        };
        account.keys.insert(*public_key, 0);
        self.lock().accounts.insert(account_id.clone(), account);
    }

    pub fn add_key(&self, account_id: &AccountId, public_key: &PublicKey) {
        if let Some(account) = self.lock().accounts.get_mut(account_id) {
            account.keys.insert(*public_key, 0);
        }
    }

    pub fn exists(&self, account_id: &AccountId) -> bool {
        self.lock().accounts.contains_key(account_id)
    }

    pub fn has_key(&self, account_id: &AccountId, public_key: &PublicKey) -> bool {
        self.lock()
            .accounts
            .get(account_id)
            .is_some_and(|a| a.keys.contains_key(public_key))
    }

    /// Transactions accepted so far, in order.
    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.lock().sent.clone()
    }

    /// Reject the next `n` submissions before they reach the chain.
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().fail_sends = n;
    }

    /// Fail on chain every transaction sent to `account_id`.
    pub fn fail_receiver(&self, account_id: &AccountId) {
        self.lock().fail_receivers.insert(account_id.clone());
    }

    pub fn patches(&self) -> Vec<Value> {
        self.lock().patches.clone()
    }

    fn block_hash(height: u64) -> CryptoHash {
        CryptoHash::digest(height.to_le_bytes())
    }

    /// Apply all actions or none. Returns the return value or a failure payload.
    fn apply(
        accounts: &mut BTreeMap<AccountId, MockAccount>,
        signer_id: &AccountId,
        receiver_id: &AccountId,
        actions: &[Action],
        logs: &mut Vec<String>,
    ) -> Result<Vec<u8>, Value> {
        let mut next = accounts.clone();
        let mut value = Vec::new();

        for (index, action) in actions.iter().enumerate() {
            if let Action::CreateAccount = action {
                if next.contains_key(receiver_id) {
                    return Err(action_error(
                        index,
                        json!({"AccountAlreadyExists": {"account_id": receiver_id}}),
                    ));
                }
                next.insert(receiver_id.clone(), MockAccount::default());
                continue;
            }

            let deposit = action.deposit().as_yoctonear();
            if deposit > 0 {
                let signer = next.get_mut(signer_id).ok_or_else(|| {
                    action_error(index, json!({"AccountDoesNotExist": {"account_id": signer_id}}))
                })?;
                signer.amount = signer.amount.checked_sub(deposit).ok_or_else(|| {
                    action_error(index, json!({"LackBalanceForState": {"account_id": signer_id}}))
                })?;
            }

            let receiver = next.get_mut(receiver_id).ok_or_else(|| {
                action_error(index, json!({"AccountDoesNotExist": {"account_id": receiver_id}}))
            })?;
            receiver.amount += deposit;

            match action {
                Action::DeployContract { code } => receiver.code = code.0.clone(),
                Action::FunctionCall {
                    method_name, args, ..
                } => {
                    if receiver.code.is_empty() {
                        return Err(action_error(
                            index,
                            json!({"FunctionCallError": {"CompilationError": {"CodeDoesNotExist": {"account_id": receiver_id}}}}),
                        ));
                    }
                    logs.push(format!("called {method_name}"));
                    // Echo the arguments back as the return value.
                    value = args.clone();
                }
                Action::AddKey { public_key, .. } => {
                    receiver.keys.insert(*public_key, 0);
                }
                Action::DeleteKey { public_key } => {
                    if receiver.keys.remove(public_key).is_none() {
                        return Err(action_error(
                            index,
                            json!({"DeleteKeyDoesNotExist": {"account_id": receiver_id}}),
                        ));
                    }
                }
                Action::DeleteAccount { beneficiary_id } => {
                    let balance = receiver.amount;
                    next.remove(receiver_id);
                    if let Some(beneficiary) = next.get_mut(beneficiary_id) {
                        beneficiary.amount += balance;
                    }
                }
                _ => {}
            }
        }

        *accounts = next;
        Ok(value)
    }

    fn view_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl RpcProvider for MockRpc {
    async fn view_account(
        &self,
        account_id: &AccountId,
        _finality: Finality,
    ) -> Result<AccountView, RpcError> {
        let inner = self.lock();
        let account = inner
            .accounts
            .get(account_id)
            .ok_or_else(|| RpcError::AccountNotFound(account_id.clone()))?;
        let code_hash = if account.code.is_empty() {
            CryptoHash::ZERO
        } else {
            CryptoHash::digest(&account.code)
        };
        Self::view_json(json!({
            "amount": account.amount.to_string(),
            "locked": "0",
            "code_hash": code_hash,
            "storage_usage": BASE_STORAGE_USAGE + account.code.len() as u64,
            "block_height": inner.height,
            "block_hash": Self::block_hash(inner.height),
        }))
    }

    async fn view_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
        _finality: Finality,
    ) -> Result<AccessKeyView, RpcError> {
        let inner = self.lock();
        let account = inner
            .accounts
            .get(account_id)
            .ok_or_else(|| RpcError::AccountNotFound(account_id.clone()))?;
        let nonce = account
            .keys
            .get(public_key)
            .ok_or_else(|| RpcError::AccessKeyNotFound {
                account_id: account_id.clone(),
                public_key: *public_key,
            })?;
        Self::view_json(json!({
            "nonce": nonce,
            "permission": "FullAccess",
            "block_height": inner.height,
            "block_hash": Self::block_hash(inner.height),
        }))
    }

    async fn view_state(
        &self,
        account_id: &AccountId,
        prefix: &[u8],
        _finality: Finality,
    ) -> Result<ViewStateResult, RpcError> {
        let inner = self.lock();
        let account = inner
            .accounts
            .get(account_id)
            .ok_or_else(|| RpcError::AccountNotFound(account_id.clone()))?;
        let values: Vec<Value> = account
            .state
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| json!({"key": STANDARD.encode(k), "value": STANDARD.encode(v)}))
            .collect();
        Self::view_json(json!({
            "values": values,
            "block_height": inner.height,
            "block_hash": Self::block_hash(inner.height),
        }))
    }

    async fn view_code(
        &self,
        account_id: &AccountId,
        _finality: Finality,
    ) -> Result<ViewCodeResult, RpcError> {
        let inner = self.lock();
        let account = inner
            .accounts
            .get(account_id)
            .ok_or_else(|| RpcError::AccountNotFound(account_id.clone()))?;
        if account.code.is_empty() {
            return Err(RpcError::ContractNotDeployed(account_id.clone()));
        }
        Self::view_json(json!({
            "code_base64": STANDARD.encode(&account.code),
            "hash": CryptoHash::digest(&account.code),
            "block_height": inner.height,
            "block_hash": Self::block_hash(inner.height),
        }))
    }

    async fn call_function(
        &self,
        account_id: &AccountId,
        _method_name: &str,
        args: &[u8],
        _finality: Finality,
    ) -> Result<ViewFunctionResult, RpcError> {
        let inner = self.lock();
        let account = inner
            .accounts
            .get(account_id)
            .ok_or_else(|| RpcError::AccountNotFound(account_id.clone()))?;
        if account.code.is_empty() {
            return Err(RpcError::ContractNotDeployed(account_id.clone()));
        }
        Ok(ViewFunctionResult {
            result: args.to_vec(),
            logs: Vec::new(),
        })
    }

    async fn block(&self, _finality: Finality) -> Result<BlockView, RpcError> {
        let height = self.lock().height;
        Self::view_json(json!({
            "author": "test.near",
            "header": {
                "height": height,
                "hash": Self::block_hash(height),
                "timestamp": 0,
            },
        }))
    }

    async fn protocol_config(&self, _finality: Finality) -> Result<ProtocolConfigView, RpcError> {
        Self::view_json(json!({
            "protocol_version": 73,
            "chain_id": "sandbox",
            "genesis_height": 0,
            "epoch_length": 500,
        }))
    }

    async fn send_tx(
        &self,
        signed_tx: &SignedTransaction,
        _wait_until: TxExecutionStatus,
    ) -> Result<FinalExecutionOutcome, RpcError> {
        let mut inner = self.lock();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(RpcError::Status {
                status: 502,
                body: "connection reset".to_string(),
            });
        }

        let tx = &signed_tx.transaction;
        let hash = signed_tx.hash();
        if !signed_tx.signature.verify(hash.as_bytes(), &tx.public_key) {
            return Err(RpcError::InvalidTransaction {
                message: "invalid signature".to_string(),
                details: None,
            });
        }

        let signer = inner
            .accounts
            .get_mut(&tx.signer_id)
            .ok_or_else(|| RpcError::AccountNotFound(tx.signer_id.clone()))?;
        let ak_nonce = signer
            .keys
            .get_mut(&tx.public_key)
            .ok_or_else(|| RpcError::AccessKeyNotFound {
                account_id: tx.signer_id.clone(),
                public_key: tx.public_key,
            })?;
        if tx.nonce <= *ak_nonce {
            return Err(RpcError::InvalidNonce {
                tx_nonce: tx.nonce,
                ak_nonce: *ak_nonce,
            });
        }
        *ak_nonce = tx.nonce;
        inner.height += 1;
        inner.sent.push(signed_tx.clone());

        let mut logs = Vec::new();
        let status = if inner.fail_receivers.contains(&tx.receiver_id) {
            Err(action_error(0, json!("InjectedFailure")))
        } else {
            Self::apply(
                &mut inner.accounts,
                &tx.signer_id,
                &tx.receiver_id,
                &tx.actions,
                &mut logs,
            )
        };

        let (status, receipt) = match status {
            Ok(value) => {
                let success = json!({"SuccessValue": STANDARD.encode(value)});
                (success.clone(), success)
            }
            Err(failure) => (
                json!({"Failure": failure.clone()}),
                json!({"Failure": failure}),
            ),
        };

        let mut outcome: FinalExecutionOutcome =
            Self::view_json(outcome_json(status, hash, logs, vec![receipt]))?;
        outcome.transaction.signer_id = tx.signer_id.clone();
        outcome.transaction.receiver_id = tx.receiver_id.clone();
        outcome.transaction.public_key = tx.public_key.to_string();
        outcome.transaction.nonce = tx.nonce;
        Ok(outcome)
    }

    async fn sandbox_patch_state(&self, records: Value) -> Result<(), RpcError> {
        let mut inner = self.lock();
        if let Some(records) = records.as_array() {
            for data in records.iter().filter_map(|r| r.get("Data")) {
                let account_id: AccountId = serde_json::from_value(data["account_id"].clone())?;
                let decode = |field: &str| {
                    data[field]
                        .as_str()
                        .and_then(|s| STANDARD.decode(s).ok())
                        .ok_or_else(|| RpcError::InvalidResponse(format!("bad {field}")))
                };
                let (key, value) = (decode("data_key")?, decode("value")?);
                if let Some(account) = inner.accounts.get_mut(&account_id) {
                    account.state.insert(key, value);
                }
            }
        }
        inner.patches.push(records);
        Ok(())
    }
}

/// A sandbox manager over `rpc` whose root `test.near` holds plenty of NEAR.
pub(crate) async fn sandbox_manager(rpc: Arc<MockRpc>) -> (Arc<AccountManager>, KeyPair) {
    let root: AccountId = "test.near".parse().unwrap();
    let root_key = KeyPair::random();
    rpc.add_account(&root, &root_key.public_key, NearToken::from_near(1_000_000));

    let key_store = Arc::new(InMemoryKeyStore::new());
    key_store.set_key("sandbox", &root, &root_key).await.unwrap();

    let manager = AccountManager::new(rpc, key_store, Arc::new(SandboxBackend), root);
    (Arc::new(manager), root_key)
}
