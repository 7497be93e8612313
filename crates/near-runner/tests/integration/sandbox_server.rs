//! Sandbox process supervision against the real binary.

use std::sync::Arc;

use near_runner::sandbox::{PortAllocator, SandboxConfig, SandboxServer, SandboxState};
use near_runner::*;

use crate::init_tracing;

#[tokio::test]
async fn test_init_start_close() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("home");
    let mut server = SandboxServer::new(SandboxConfig::new(&home));

    server.init().await.unwrap();
    assert!(home.join("validator_key.json").exists());
    assert_eq!(server.state(), SandboxState::Initializing);

    server.start().await.unwrap();
    assert_eq!(server.state(), SandboxState::Running);

    let rpc = RpcClient::new(server.rpc_url().unwrap());
    let block = rpc.block(Finality::Final).await.unwrap();
    println!("Sandbox at height {}", block.header.height);

    server.close().await.unwrap();
    assert_eq!(server.state(), SandboxState::Closed);
    assert!(!home.exists());
}

#[tokio::test]
async fn test_concurrent_servers_use_distinct_ports() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ports = Arc::new(PortAllocator::new(DEFAULT_TEST_RANGE));

    let mut a = SandboxServer::with_port_allocator(
        SandboxConfig::new(dir.path().join("a")),
        ports.clone(),
    );
    let mut b = SandboxServer::with_port_allocator(
        SandboxConfig::new(dir.path().join("b")),
        ports.clone(),
    );
    a.init().await.unwrap();
    b.init().await.unwrap();

    let (started_a, started_b) = tokio::join!(a.start(), b.start());
    started_a.unwrap();
    started_b.unwrap();
    assert_ne!(a.port(), b.port());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

const DEFAULT_TEST_RANGE: std::ops::RangeInclusive<u16> = 30_000..=40_000;
