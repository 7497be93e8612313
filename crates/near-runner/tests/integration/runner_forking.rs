//! Runner state forking: every run starts from the post-init state.

use std::sync::Arc;

use near_runner::*;

use crate::init_tracing;

fn runner(home_root: &std::path::Path) -> Runner {
    Runner::builder()
        .config(Config::sandbox().with_home_root(home_root))
        .init(|ws| async move {
            let alice = ws
                .root()
                .create_sub_account(
                    "alice",
                    CreateAccountOptions {
                        initial_balance: Some(NearToken::from_near(20)),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(Accounts::from([("alice".to_string(), alice)]))
        })
        .build()
}

#[tokio::test]
async fn test_runs_are_isolated() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());

    // The first run spends and deletes alice.
    runner
        .run(|ws| async move {
            assert_eq!(ws.run_number(), 1);
            let alice = ws.account("alice").unwrap();
            assert_eq!(alice.balance().await?.total, NearToken::from_near(20));
            alice.delete(ws.root().account_id(), None).await?;
            assert!(!alice.exists().await?);
            Ok(())
        })
        .await
        .unwrap();

    // The second run still sees alice as init left her.
    runner
        .run(|ws| async move {
            assert_eq!(ws.run_number(), 2);
            let alice = ws.account("alice").unwrap();
            assert!(alice.exists().await?);
            assert_eq!(alice.balance().await?.total, NearToken::from_near(20));
            assert!(alice.get_key().await?.is_some());
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_runs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(runner(dir.path()));

    let body = |ws: Workspace| async move {
        let alice = ws.account("alice").unwrap();
        let bob = alice
            .create_sub_account("bob", CreateAccountOptions::default())
            .await?;
        Ok(bob.account_id().clone())
    };
    let (a, b) = tokio::join!(runner.run(body), runner.run(body));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(runner.counter().current(), 2);
}

#[tokio::test]
async fn test_run_sandbox_runs_on_sandbox() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path());
    let network = runner
        .run_sandbox(|ws| async move { Ok(ws.network()) })
        .await
        .expect("sandbox runner should run")
        .unwrap();
    assert_eq!(network, Network::Sandbox);
}
