//! Node and key-storage collaborators.
//!
//! - [`RpcProvider`] - the node operations the runner consumes
//! - [`RpcClient`] - JSON-RPC implementation with retry logic
//! - [`KeyStore`] - keys per (network, account), in memory or on disk

mod keystore;
mod rpc;

pub use keystore::{FileSystemKeyStore, InMemoryKeyStore, KeyStore};
pub use rpc::{RetryConfig, RpcClient, RpcProvider, TESTNET_RPC_URL};
