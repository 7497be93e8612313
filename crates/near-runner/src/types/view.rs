//! What the node answers with, trimmed to the fields the runner reads.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccountId, CryptoHash, NearToken};

/// yoctoNEAR locked per byte of account storage.
pub const STORAGE_AMOUNT_PER_BYTE: u128 = 10u128.pow(19);

/// Which block a query reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Finality {
    #[default]
    Optimistic,
    Final,
}

/// The point at which `send_tx` returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxExecutionStatus {
    /// All receipts ran, possibly in blocks that are not final yet.
    #[default]
    ExecutedOptimistic,
    Final,
}

// ----------------------------------------------------------------------------
// Accounts and keys
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct AccountView {
    pub amount: NearToken,
    pub locked: NearToken,
    /// [`CryptoHash::ZERO`] when nothing is deployed.
    pub code_hash: CryptoHash,
    pub storage_usage: u64,
}

impl AccountView {
    /// Storage stake still owed from the liquid balance. Locked tokens
    /// count towards it first.
    pub fn storage_cost(&self) -> NearToken {
        let owed = u128::from(self.storage_usage).saturating_mul(STORAGE_AMOUNT_PER_BYTE);
        NearToken::from_yoctonear(owed.saturating_sub(self.locked.as_yoctonear()))
    }

    pub fn available(&self) -> NearToken {
        self.amount.saturating_sub(self.storage_cost())
    }

    pub fn has_contract(&self) -> bool {
        !self.code_hash.is_zero()
    }
}

/// An account's balance split into what can and cannot be spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountBalance {
    /// Liquid plus locked.
    pub total: NearToken,
    /// Liquid minus the storage stake.
    pub available: NearToken,
    pub locked: NearToken,
    pub storage_cost: NearToken,
    pub storage_usage: u64,
}

impl From<AccountView> for AccountBalance {
    fn from(view: AccountView) -> Self {
        Self {
            total: view.amount.saturating_add(view.locked),
            available: view.available(),
            locked: view.locked,
            storage_cost: view.storage_cost(),
            storage_usage: view.storage_usage,
        }
    }
}

impl std::fmt::Display for AccountBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} available of {}", self.available, self.total)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccessKeyView {
    /// Nonce of the last transaction this key signed.
    pub nonce: u64,
    /// `"FullAccess"` or `{"FunctionCall": {..}}`, kept as sent.
    pub permission: Value,
}

// ----------------------------------------------------------------------------
// Contracts
// ----------------------------------------------------------------------------

/// Base64 decoding of a view field. Bad encoding is the node's fault.
fn decode_field(field: &str, encoded: &str) -> Result<Vec<u8>, crate::RpcError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| crate::RpcError::InvalidResponse(format!("{field} is not base64: {e}")))
}

/// One storage entry, both halves base64 on the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct StateItem {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ViewStateResult {
    pub values: Vec<StateItem>,
}

impl ViewStateResult {
    /// Value stored under exactly `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let wanted = STANDARD.encode(key);
        self.values
            .iter()
            .find(|item| item.key == wanted)
            .and_then(|item| STANDARD.decode(&item.value).ok())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ViewCodeResult {
    pub code_base64: String,
    pub hash: CryptoHash,
}

impl ViewCodeResult {
    pub fn code(&self) -> Result<Vec<u8>, crate::RpcError> {
        decode_field("code_base64", &self.code_base64)
    }
}

/// Return value and logs of a view call.
#[derive(Clone, Debug, Default)]
pub struct ViewFunctionResult {
    pub result: Vec<u8>,
    pub logs: Vec<String>,
}

impl ViewFunctionResult {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.result)
    }

    pub fn borsh<T: borsh::BorshDeserialize>(&self) -> borsh::io::Result<T> {
        borsh::from_slice(&self.result)
    }
}

// ----------------------------------------------------------------------------
// Chain
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct BlockView {
    pub author: AccountId,
    pub header: BlockHeaderView,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BlockHeaderView {
    pub height: u64,
    pub hash: CryptoHash,
    /// Nanoseconds since the epoch.
    pub timestamp: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolConfigView {
    pub protocol_version: u32,
    pub chain_id: String,
    #[serde(default)]
    pub runtime_config: Value,
}

impl ProtocolConfigView {
    /// Storage price the node runs with, or [`STORAGE_AMOUNT_PER_BYTE`] when
    /// it does not say.
    pub fn storage_amount_per_byte(&self) -> u128 {
        self.runtime_config["storage_amount_per_byte"]
            .as_str()
            .and_then(|price| price.parse().ok())
            .unwrap_or(STORAGE_AMOUNT_PER_BYTE)
    }
}

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

/// `send_tx` result: the transaction's own outcome and every receipt's.
#[derive(Clone, Debug, Deserialize)]
pub struct FinalExecutionOutcome {
    pub status: ExecutionStatus,
    pub transaction: TransactionView,
    pub transaction_outcome: ExecutionOutcomeWithId,
    #[serde(default)]
    pub receipts_outcome: Vec<ExecutionOutcomeWithId>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub enum ExecutionStatus {
    Unknown,
    Pending,
    /// The node's structured error, untouched.
    Failure(Value),
    /// Base64 return value, empty for none.
    SuccessValue(String),
    SuccessReceiptId(CryptoHash),
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessValue(_) | Self::SuccessReceiptId(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransactionView {
    pub hash: CryptoHash,
    pub signer_id: AccountId,
    pub receiver_id: AccountId,
    pub public_key: String,
    pub nonce: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionOutcomeWithId {
    /// Transaction or receipt hash.
    pub id: CryptoHash,
    pub outcome: ExecutionOutcome,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionOutcome {
    pub executor_id: AccountId,
    #[serde(default)]
    pub logs: Vec<String>,
    pub status: ExecutionStatus,
}
