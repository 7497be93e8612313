//! Actions and access keys, laid out the way the chain borsh-decodes them.
//!
//! Variant order is part of the wire format: do not reorder.

use std::fmt;
use std::ops::Deref;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{AccountId, Gas, NearToken, PublicKey};

/// What a key may do. Tag 0 is `FunctionCall`, tag 1 is `FullAccess`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AccessKeyPermission {
    /// Calls to `receiver_id` only, optionally limited to `method_names`
    /// (empty means any method) and to an `allowance` for fees.
    FunctionCall {
        allowance: Option<NearToken>,
        receiver_id: AccountId,
        method_names: Vec<String>,
    },
    FullAccess,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccessKey {
    /// Starting nonce; the chain replaces it on `AddKey`.
    pub nonce: u64,
    pub permission: AccessKeyPermission,
}

impl AccessKey {
    pub fn full_access() -> Self {
        Self {
            nonce: 0,
            permission: AccessKeyPermission::FullAccess,
        }
    }

    pub fn function_call(
        receiver_id: AccountId,
        method_names: Vec<String>,
        allowance: Option<NearToken>,
    ) -> Self {
        Self {
            nonce: 0,
            permission: AccessKeyPermission::FunctionCall {
                allowance,
                receiver_id,
                method_names,
            },
        }
    }
}

/// WASM bytes of a `DeployContract` action. Debug output shows the size only.
#[derive(Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractCode(pub Vec<u8>);

impl Deref for ContractCode {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ContractCode {
    fn from(code: Vec<u8>) -> Self {
        Self(code)
    }
}

impl fmt::Debug for ContractCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} bytes of wasm>", self.0.len())
    }
}

/// One step of a transaction. Tags run 0 (`CreateAccount`) to 7
/// (`DeleteAccount`) in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Action {
    CreateAccount,
    DeployContract {
        code: ContractCode,
    },
    FunctionCall {
        method_name: String,
        args: Vec<u8>,
        gas: Gas,
        deposit: NearToken,
    },
    Transfer {
        deposit: NearToken,
    },
    Stake {
        stake: NearToken,
        public_key: PublicKey,
    },
    AddKey {
        public_key: PublicKey,
        access_key: AccessKey,
    },
    DeleteKey {
        public_key: PublicKey,
    },
    DeleteAccount {
        beneficiary_id: AccountId,
    },
}

impl Action {
    /// Tokens this action moves from the signer to the receiver.
    pub fn deposit(&self) -> NearToken {
        match self {
            Action::Transfer { deposit } | Action::FunctionCall { deposit, .. } => *deposit,
            _ => NearToken::from_yoctonear(0),
        }
    }
}
