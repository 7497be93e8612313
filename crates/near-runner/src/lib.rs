//! Run NEAR smart-contract tests against a disposable sandbox node or testnet.
//!
//! **near-runner** spawns and supervises a local `near-sandbox` node (or
//! connects to testnet), creates and tracks the accounts a test needs, and
//! tears everything down afterwards.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use near_runner::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), near_runner::Error> {
//!     let runner = Runner::builder().config(Config::from_env()?).build();
//!
//!     runner
//!         .run(|ws| async move {
//!             let alice = ws.root().create_sub_account("alice", Default::default()).await?;
//!             println!("alice has {}", alice.available_balance().await?);
//!             Ok(())
//!         })
//!         .await
//! }
//! ```
//!
//! # Layers
//!
//! - [`Runner`] - init once, run many test bodies, each on a forked sandbox
//! - [`Account`] - per-account calls, views, transfers and sub-accounts
//! - [`AccountManager`] - keys, signing, the created-accounts registry and cleanup
//! - [`sandbox::SandboxServer`] - the node process, its port and home dir
//!
//! # Keys
//!
//! Every signing key lives in a [`KeyStore`] keyed by network and account.
//! [`ManagedTransaction::transact`] can sign with a one-off key; the store is
//! left exactly as it was afterwards, whether or not the transaction
//! succeeded.

pub mod account;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod runner;
pub mod sandbox;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use error::{Error, KeyStoreError, RpcError, SandboxError};
pub use types::*;

pub use account::{Account, CallBuilder, CreateAccountOptions, DEFAULT_CALL_GAS, DeployOptions};
pub use client::{
    FileSystemKeyStore, InMemoryKeyStore, KeyStore, RetryConfig, RpcClient, RpcProvider,
};
pub use config::Config;
pub use manager::{
    AccountManager, CleanupReport, DEFAULT_INITIAL_BALANCE, NetworkBackend, RetryPolicy,
    SandboxBackend, TestnetBackend,
};
pub use runner::{Accounts, RunCounter, Runner, RunnerBuilder, Workspace};
pub use transaction::{ManagedTransaction, Transaction, TransactionResult};
