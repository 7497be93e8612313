//! Signing and encoding transactions for `send_tx`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use borsh::{BorshDeserialize, BorshSerialize};

use super::{AccountId, Action, CryptoHash, KeyPair, PublicKey, Signature};

/// Everything the signer commits to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnsignedTransaction {
    pub signer_id: AccountId,
    pub public_key: PublicKey,
    /// Must exceed the access key's current nonce.
    pub nonce: u64,
    pub receiver_id: AccountId,
    /// A recent block; the transaction expires with it.
    pub block_hash: CryptoHash,
    pub actions: Vec<Action>,
}

impl UnsignedTransaction {
    /// Encode, hash and sign in one go. The SHA-256 of the borsh bytes is
    /// both what gets signed and the hash the chain reports.
    pub fn sign(self, key: &KeyPair) -> borsh::io::Result<SignedTransaction> {
        let hash = CryptoHash::digest(borsh::to_vec(&self)?);
        let signature = key.sign(hash.as_bytes());
        let encoded = borsh::to_vec(&(&self, &signature))?;
        Ok(SignedTransaction {
            transaction: self,
            signature,
            hash,
            encoded,
        })
    }
}

/// A transaction plus its signature, with the hash and wire bytes computed
/// once at signing time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: Signature,
    hash: CryptoHash,
    encoded: Vec<u8>,
}

impl SignedTransaction {
    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    /// The borsh encoding, base64'd, as `send_tx` expects it.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded)
    }
}
