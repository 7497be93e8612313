//! Error types for near-runner.
//!
//! # Error Hierarchy
//!
//! - [`Error`](enum@Error): Main error type, returned by most operations
//!   - [`RpcError`]: node unreachable, non-200 responses, structured RPC failures
//!   - [`KeyStoreError`]: missing keys, unreadable credential files
//!   - [`SandboxError`]: spawning, health-checking and tearing down the sandbox node
//!   - [`DecodeError`]: malformed hashes, keys and signatures
//!
//! A transaction that reaches the chain and fails there is *not* an error at
//! this layer: [`TransactionResult`](crate::TransactionResult) carries the
//! failure. Only the [`Account::call`](crate::Account::call) convenience turns
//! it into [`Error::TransactionFailed`].
//!
//! # Example
//!
//! ```rust,no_run
//! use near_runner::*;
//!
//! # async fn example(root: Account) -> Result<(), Error> {
//! match root.get_sub_account("alice")?.balance().await {
//!     Ok(balance) => println!("alice holds {}", balance.available),
//!     Err(Error::Rpc(RpcError::AccountNotFound(account))) => {
//!         println!("{account} was never created");
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::transaction::TransactionResult;
use crate::types::{AccountId, PublicKey};

/// A hash, key or signature that is not in NEAR's text encoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected an `ed25519:` prefix")]
    MissingCurve,

    #[error("curve `{0}` is not supported, only ed25519 is")]
    UnsupportedCurve(String),

    #[error("not valid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("decoded to {found} bytes, {expected} expected")]
    Length { expected: usize, found: usize },

    #[error("bytes are not an ed25519 curve point")]
    NotOnCurve,

    #[error("public half of the secret key does not belong to it")]
    MismatchedPublicHalf,
}

/// Error during keystore operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key not found for account {account_id} on {network}")]
    KeyNotFound {
        network: String,
        account_id: AccountId,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid credential format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] DecodeError),

    #[error("Path error: {0}")]
    PathError(String),
}

// ============================================================================
// RPC Errors
// ============================================================================

/// Node failures the runner reacts to individually. Everything else the node
/// reports lands in [`RpcError::Server`].
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode node response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected node response: {0}")]
    InvalidResponse(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("{account_id} has no access key {public_key}")]
    AccessKeyNotFound {
        account_id: AccountId,
        public_key: PublicKey,
    },

    #[error("no contract deployed on {0}")]
    ContractNotDeployed(AccountId),

    #[error("view call {contract_id}.{method_name} failed: {message}")]
    ContractExecution {
        contract_id: AccountId,
        method_name: String,
        message: String,
    },

    #[error("nonce {tx_nonce} is not above the access key nonce {ak_nonce}")]
    InvalidNonce { tx_nonce: u64, ak_nonce: u64 },

    #[error("transaction rejected: {message}")]
    InvalidTransaction {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{cause} ({code}): {message}")]
    Server {
        cause: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

/// Server causes that describe the node's condition rather than the request.
const TRANSIENT_CAUSES: &[&str] = &[
    "TIMEOUT_ERROR",
    "INTERNAL_ERROR",
    "NO_SYNCED_BLOCKS",
    "NOT_SYNCED_YET",
];

impl RpcError {
    /// Whether sending the same request again may succeed.
    ///
    /// Rejections of the request itself (bad nonce, missing account) are
    /// never transient; fixing them means building a different request.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            RpcError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            RpcError::Server { cause, .. } => TRANSIENT_CAUSES.contains(&cause.as_str()),
            _ => false,
        }
    }

    pub fn is_account_not_found(&self) -> bool {
        matches!(self, RpcError::AccountNotFound(_))
    }
}

// ============================================================================
// Sandbox Errors
// ============================================================================

/// Failures of the sandbox node supervisor.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox binary not found at {0}")]
    BinaryNotFound(PathBuf),

    #[error("Failed to install sandbox binary: {0}")]
    Install(String),

    #[error("Failed to spawn sandbox process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox init in {home_dir} failed with {status}: {stderr}")]
    InitFailed {
        home_dir: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Sandbox on port {port} did not become ready within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("Sandbox on port {port} exited during startup with {status}")]
    ExitedDuringStartup { port: u16, status: String },

    #[error("No free port found in range {start}..={end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Port lock error: {0}")]
    PortLock(String),

    #[error("Invalid sandbox state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid validator key file {path}: {message}")]
    ValidatorKey { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Main Error Type
// ============================================================================

/// Main error type for near-runner operations.
#[derive(Debug, Error)]
pub enum Error {
    // ─── Configuration ───
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation not supported on {network}: {operation}")]
    Unsupported {
        network: String,
        operation: &'static str,
    },

    // ─── Parsing ───
    #[error(transparent)]
    ParseAccountId(#[from] near_account_id::ParseAccountError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Account {0} has no parent account")]
    NoParentAccount(AccountId),

    // ─── RPC ───
    #[error(transparent)]
    Rpc(#[from] RpcError),

    // ─── Accounts & Transactions ───
    #[error("Failed to create account {account_id}: {message}")]
    AccountCreation {
        account_id: AccountId,
        message: String,
    },

    #[error("Transaction failed: {}", .0.summary())]
    TransactionFailed(Box<TransactionResult>),

    // ─── KeyStore ───
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    // ─── Sandbox ───
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    // ─── Serialization / IO ───
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the underlying RPC error reports a missing account.
    pub fn is_account_not_found(&self) -> bool {
        matches!(self, Error::Rpc(e) if e.is_account_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::Length {
                expected: 32,
                found: 16
            }
            .to_string(),
            "decoded to 16 bytes, 32 expected"
        );
        let err: Error = DecodeError::MissingCurve.into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_key_store_error_display() {
        let err = KeyStoreError::KeyNotFound {
            network: "sandbox".to_string(),
            account_id: "alice.test.near".parse().unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Key not found for account alice.test.near on sandbox"
        );
    }

    #[test]
    fn test_sandbox_error_names_port_and_timeout() {
        let err = SandboxError::StartupTimeout {
            port: 4321,
            timeout: Duration::from_secs(60),
        };
        let msg = err.to_string();
        assert!(msg.contains("4321"));
        assert!(msg.contains("60s"));

        let err = SandboxError::NoFreePort {
            start: 4000,
            end: 65535,
        };
        assert_eq!(err.to_string(), "No free port found in range 4000..=65535");
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| RpcError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());

        let server = |cause: &str| RpcError::Server {
            cause: cause.to_string(),
            code: -32000,
            message: "Server error".to_string(),
            data: None,
        };
        assert!(server("NO_SYNCED_BLOCKS").is_transient());
        assert!(!server("PARSE_ERROR").is_transient());

        assert!(
            !RpcError::InvalidNonce {
                tx_nonce: 1,
                ak_nonce: 2
            }
            .is_transient()
        );
        assert!(!RpcError::AccountNotFound("alice.test.near".parse().unwrap()).is_transient());
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = SandboxError::NoFreePort { start: 1, end: 2 }.into();
        assert!(matches!(err, Error::Sandbox(_)));

        let err: Error = RpcError::AccountNotFound("bob.test.near".parse().unwrap()).into();
        assert!(err.is_account_not_found());
        assert_eq!(err.to_string(), "Account not found: bob.test.near");
    }
}
