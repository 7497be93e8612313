//! Core types for NEAR Protocol.
//!
//! Account ids and amounts come from the NEAR ecosystem crates. Keys,
//! hashes, actions and node views cover only what the runner needs.

mod action;
mod crypto;
mod network;
mod transaction;
mod view;

pub use near_account_id::AccountId;
pub use near_gas::NearGas as Gas;
pub use near_token::NearToken;

pub use action::{AccessKey, AccessKeyPermission, Action, ContractCode};
pub use crypto::{CryptoHash, KeyPair, PublicKey, SecretKey, Signature};
pub use network::Network;
pub use transaction::{SignedTransaction, UnsignedTransaction};
pub use view::{
    AccessKeyView, AccountBalance, AccountView, BlockHeaderView, BlockView, ExecutionOutcome,
    ExecutionOutcomeWithId, ExecutionStatus, FinalExecutionOutcome, Finality, ProtocolConfigView,
    STORAGE_AMOUNT_PER_BYTE, StateItem, TransactionView, TxExecutionStatus, ViewCodeResult,
    ViewFunctionResult, ViewStateResult,
};

/// Parent of a dotted account id: everything after the first `.`.
///
/// Returns `None` for top-level ids.
pub fn parent_account_id(account_id: &AccountId) -> Option<&str> {
    account_id.as_str().split_once('.').map(|(_, parent)| parent)
}

/// Whether `account_id` is `<prefix>.<parent>` for a non-empty prefix.
pub fn is_sub_account_of(account_id: &AccountId, parent: &AccountId) -> bool {
    account_id
        .as_str()
        .strip_suffix(parent.as_str())
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|prefix| !prefix.is_empty())
}
