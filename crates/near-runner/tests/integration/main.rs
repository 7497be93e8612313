//! Integration tests for near-runner.
//!
//! These tests spawn real `near-sandbox` nodes and require the `sandbox`
//! feature. The binary is downloaded on first use unless
//! `NEAR_SANDBOX_BIN_PATH` points at one.
//!
//! Run with: `cargo test --features sandbox --test integration`
//!
//! Set `RUST_LOG=near_runner=debug` to see what the runner is doing.

#![cfg(feature = "sandbox")]

mod account_lifecycle;
mod runner_forking;
mod sandbox_server;

use std::sync::{Arc, Once};

use near_runner::sandbox::{SandboxConfig, SandboxServer};
use near_runner::*;
use tempfile::TempDir;

/// Install a test-friendly tracing subscriber once per binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A running sandbox with a manager for its root account.
///
/// The temp dir holding the home dir must outlive the server.
pub struct TestSandbox {
    pub server: SandboxServer,
    pub manager: Arc<AccountManager>,
    _dir: TempDir,
}

impl TestSandbox {
    pub async fn start() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let mut server = SandboxServer::new(SandboxConfig::new(dir.path().join("home")));
        server.init().await.unwrap();
        server.start().await.unwrap();

        let rpc = Arc::new(RpcClient::new(server.rpc_url().unwrap()));
        let manager = SandboxBackend::connect(rpc, server.home_dir(), None)
            .await
            .unwrap();
        Self {
            server,
            manager: Arc::new(manager),
            _dir: dir,
        }
    }

    pub fn root(&self) -> Account {
        self.manager.root()
    }

    pub async fn close(mut self) {
        self.server.close().await.unwrap();
    }
}
