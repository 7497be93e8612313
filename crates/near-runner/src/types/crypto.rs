//! Hashes, keys and signatures.
//!
//! Text form is base58; keys and signatures carry an `ed25519:` prefix.
//! In borsh, keys and signatures start with a one-byte curve tag and hashes
//! are the bare 32 bytes.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;

/// Curve tag written in front of key and signature bytes. NEAR also knows
/// secp256k1 (tag 1), which the runner never produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
enum Curve {
    Ed25519,
}

impl Curve {
    const PREFIX: &'static str = "ed25519:";
}

fn base58<const N: usize>(text: &str) -> Result<[u8; N], DecodeError> {
    let decoded = bs58::decode(text).into_vec()?;
    <[u8; N]>::try_from(decoded.as_slice()).map_err(|_| DecodeError::Length {
        expected: N,
        found: decoded.len(),
    })
}

fn strip_curve(text: &str) -> Result<&str, DecodeError> {
    match text.split_once(':') {
        Some(("ed25519", payload)) => Ok(payload),
        Some((curve, _)) => Err(DecodeError::UnsupportedCurve(curve.to_string())),
        None => Err(DecodeError::MissingCurve),
    }
}

/// Implements `Display` via `$encode`, `Debug` as `Name(text)` and serde as
/// the text form.
macro_rules! text_encoded {
    ($ty:ident, $encode:expr) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&$encode(self))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> String {
                value.to_string()
            }
        }

        impl TryFrom<String> for $ty {
            type Error = DecodeError;

            fn try_from(text: String) -> Result<Self, DecodeError> {
                text.parse()
            }
        }
    };
}

// ----------------------------------------------------------------------------
// CryptoHash
// ----------------------------------------------------------------------------

/// SHA-256 digest naming a block, transaction, receipt or code blob.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// All zeroes. The node reports this as the code hash of an account
    /// without a contract.
    pub const ZERO: Self = Self([0; 32]);

    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut bytes = [0; 32];
        bytes.copy_from_slice(&Sha256::digest(data));
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl FromStr for CryptoHash {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, DecodeError> {
        base58(text).map(Self)
    }
}

text_encoded!(CryptoHash, |h: &CryptoHash| bs58::encode(h.0).into_string());

// ----------------------------------------------------------------------------
// PublicKey
// ----------------------------------------------------------------------------

/// An ed25519 public key.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct PublicKey(Curve, [u8; 32]);

impl PublicKey {
    /// Wrap raw key bytes, rejecting anything that is not a curve point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, DecodeError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| DecodeError::NotOnCurve)?;
        Ok(Self(Curve::Ed25519, bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.1
    }
}

impl FromStr for PublicKey {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, DecodeError> {
        Self::from_bytes(base58(strip_curve(text)?)?)
    }
}

text_encoded!(PublicKey, |k: &PublicKey| format!(
    "{}{}",
    Curve::PREFIX,
    bs58::encode(k.1).into_string()
));

// ----------------------------------------------------------------------------
// Signature
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(Curve, [u8; 64]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.1
    }

    /// Strict ed25519 verification of `message` under `public_key`.
    pub fn verify(&self, message: &[u8], public_key: &PublicKey) -> bool {
        VerifyingKey::from_bytes(public_key.as_bytes()).is_ok_and(|key| {
            key.verify_strict(message, &ed25519_dalek::Signature::from_bytes(&self.1))
                .is_ok()
        })
    }
}

impl FromStr for Signature {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, DecodeError> {
        Ok(Self(Curve::Ed25519, base58(strip_curve(text)?)?))
    }
}

text_encoded!(Signature, |s: &Signature| format!(
    "{}{}",
    Curve::PREFIX,
    bs58::encode(s.1).into_string()
));

// ----------------------------------------------------------------------------
// SecretKey
// ----------------------------------------------------------------------------

/// An ed25519 signing key. Never printed by `Debug`.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(Curve::Ed25519, self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(Curve::Ed25519, self.0.sign(message).to_bytes())
    }
}

impl FromStr for SecretKey {
    type Err = DecodeError;

    /// Accepts the 32-byte seed or the 64-byte `seed || public` form that
    /// near-cli writes. The public half of the long form must match.
    fn from_str(text: &str) -> Result<Self, DecodeError> {
        let payload = strip_curve(text)?;
        match base58::<64>(payload) {
            Ok(pair) => SigningKey::from_keypair_bytes(&pair)
                .map(Self)
                .map_err(|_| DecodeError::MismatchedPublicHalf),
            Err(DecodeError::Length { found: 32, .. }) => base58(payload).map(Self::from_seed),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for SecretKey {
    /// The 64-byte form, so files stay readable by near-cli.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pair = self.0.to_keypair_bytes();
        write!(f, "{}{}", Curve::PREFIX, bs58::encode(pair).into_string())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(for {})", self.public_key())
    }
}

// ----------------------------------------------------------------------------
// KeyPair
// ----------------------------------------------------------------------------

/// A secret key together with its public key.
///
/// This is what a [`KeyStore`](crate::KeyStore) holds per account. Whether a
/// pair is persistent or ephemeral depends only on how it is handed to the
/// [`AccountManager`](crate::AccountManager).
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn random() -> Self {
        SecretKey::generate().into()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.secret_key.sign(message)
    }
}

impl From<SecretKey> for KeyPair {
    fn from(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }
}

impl FromStr for KeyPair {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, DecodeError> {
        text.parse::<SecretKey>().map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validator key written by `near-sandbox init` in older releases.
    const SANDBOX_KEY: &str = "ed25519:3tgdk2wPraJzT4nsTuf86UX41xgPNk3MHnq8epARMdBNs29AFEztAuaQ7iHddDfXG9F2RzV1XNQYgJyAyoW51UBB";

    #[test]
    fn test_hash_text_form() {
        assert_eq!(CryptoHash::ZERO.to_string(), "1".repeat(32));
        assert!(CryptoHash::ZERO.is_zero());

        let hash = CryptoHash::digest(b"near-runner");
        assert!(!hash.is_zero());
        assert_eq!(hash.to_string().parse::<CryptoHash>().unwrap(), hash);
        assert_eq!(
            "1111".parse::<CryptoHash>().unwrap_err(),
            DecodeError::Length {
                expected: 32,
                found: 4
            }
        );
    }

    #[test]
    fn test_hash_serde_is_a_string() {
        let hash = CryptoHash::digest(b"x");
        let json = serde_json::to_value(hash).unwrap();
        assert_eq!(json, serde_json::Value::String(hash.to_string()));
        assert_eq!(serde_json::from_value::<CryptoHash>(json).unwrap(), hash);
        assert!(serde_json::from_str::<CryptoHash>("\"0OIl\"").is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::random();
        let signature = pair.sign(b"payload");
        assert!(signature.verify(b"payload", &pair.public_key));
        assert!(!signature.verify(b"tampered", &pair.public_key));
        assert!(!signature.verify(b"payload", &KeyPair::random().public_key));
    }

    #[test]
    fn test_sandbox_key_forms() {
        let long: SecretKey = SANDBOX_KEY.parse().unwrap();
        assert_eq!(long.to_string(), SANDBOX_KEY);

        let seed_only = format!("ed25519:{}", bs58::encode(long.0.to_bytes()).into_string());
        let short: SecretKey = seed_only.parse().unwrap();
        assert_eq!(short.public_key(), long.public_key());
    }

    #[test]
    fn test_long_form_with_foreign_public_half() {
        let ours = SecretKey::generate().0.to_bytes();
        let theirs = KeyPair::random().public_key;
        let mut forged = [0u8; 64];
        forged[..32].copy_from_slice(&ours);
        forged[32..].copy_from_slice(theirs.as_bytes());
        let text = format!("ed25519:{}", bs58::encode(forged).into_string());
        assert_eq!(
            text.parse::<SecretKey>().unwrap_err(),
            DecodeError::MismatchedPublicHalf
        );
    }

    #[test]
    fn test_key_text_errors() {
        assert_eq!("abc".parse::<PublicKey>().unwrap_err(), DecodeError::MissingCurve);
        assert_eq!(
            "secp256k1:abc".parse::<PublicKey>().unwrap_err(),
            DecodeError::UnsupportedCurve("secp256k1".to_string())
        );
        assert!(matches!(
            "ed25519:0OIl".parse::<PublicKey>().unwrap_err(),
            DecodeError::Base58(_)
        ));
        assert!(matches!(
            "ed25519:111".parse::<SecretKey>().unwrap_err(),
            DecodeError::Length { expected: 64, .. }
        ));
    }

    #[test]
    fn test_borsh_carries_curve_tag() {
        let pair = KeyPair::random();
        let key = borsh::to_vec(&pair.public_key).unwrap();
        assert_eq!(key.len(), 33);
        assert_eq!(key[0], 0);
        assert_eq!(&key[1..], pair.public_key.as_bytes());
        assert_eq!(borsh::from_slice::<PublicKey>(&key).unwrap(), pair.public_key);

        let signature = borsh::to_vec(&pair.sign(b"m")).unwrap();
        assert_eq!((signature.len(), signature[0]), (65, 0));

        let mut secp = key.clone();
        secp[0] = 1;
        assert!(borsh::from_slice::<PublicKey>(&secp).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::random();
        let debug = format!("{pair:?}");
        assert!(debug.contains(&pair.public_key.to_string()));
        assert!(!debug.contains(&pair.secret_key.to_string()));
    }
}
