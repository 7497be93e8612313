//! Account creation, ephemeral keys, deletion and cleanup on a live sandbox.

use near_runner::*;

use crate::TestSandbox;

#[tokio::test]
async fn test_create_transfer_add_key() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let bob: AccountId = "bob.test.near".parse().unwrap();
    let key = KeyPair::random();
    let amount = NearToken::from_near(5);

    let result = root
        .batch(bob.clone())
        .create_account()
        .transfer(amount)
        .add_key(key.public_key, AccessKey::full_access())
        .transact(None)
        .await
        .unwrap();
    assert!(result.succeeded(), "{}", result.summary());

    let bob = sandbox.manager.get_account(bob);
    assert!(bob.exists().await.unwrap());
    let balance = bob.balance().await.unwrap();
    assert_eq!(balance.total, amount);
    assert_eq!(
        balance.available.as_yoctonear(),
        amount.as_yoctonear() - balance.storage_cost.as_yoctonear()
    );
    assert!(sandbox.manager.accounts_created().contains_key(bob.account_id()));

    sandbox.close().await;
}

#[tokio::test]
async fn test_ephemeral_key_is_not_kept() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let key = KeyPair::random();
    let alice = root
        .create_sub_account(
            "alice",
            CreateAccountOptions {
                key: Some(key.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Forget alice's key, then sign once with it as an ephemeral key.
    sandbox.manager.remove_key(alice.account_id()).await;
    let result = alice
        .batch(root.account_id().clone())
        .transfer(NearToken::from_near(1))
        .transact(Some(key))
        .await
        .unwrap();

    assert!(result.succeeded(), "{}", result.summary());
    assert!(alice.get_key().await.unwrap().is_none());

    sandbox.close().await;
}

#[tokio::test]
async fn test_resubmission_is_a_new_transaction() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let alice = root
        .create_sub_account("alice", CreateAccountOptions::default())
        .await
        .unwrap();

    let tx = root
        .batch(alice.account_id().clone())
        .transfer(NearToken::from_yoctonear(1));
    let first = tx.transact(None).await.unwrap();
    let second = tx.transact(None).await.unwrap();

    assert!(first.succeeded() && second.succeeded());
    assert_ne!(first.transaction_hash(), second.transaction_hash());

    sandbox.close().await;
}

#[tokio::test]
async fn test_delete_with_stale_key_falls_back() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let alice = root
        .create_sub_account("alice", CreateAccountOptions::default())
        .await
        .unwrap();

    // A key alice never had: the first attempt fails, the retry uses the stored key.
    let result = alice
        .delete(root.account_id(), Some(KeyPair::random()))
        .await
        .unwrap();
    assert!(result.succeeded(), "{}", result.summary());
    assert!(!alice.exists().await.unwrap());
    assert!(alice.get_key().await.unwrap().is_none());

    sandbox.close().await;
}

#[tokio::test]
async fn test_cleanup_deletes_registered_accounts() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let alice = root
        .create_sub_account("alice", CreateAccountOptions::default())
        .await
        .unwrap();
    let bob = alice
        .create_sub_account("bob", CreateAccountOptions::default())
        .await
        .unwrap();

    let report = sandbox.manager.cleanup().await;
    assert!(report.is_clean(), "{:?}", report.failed);
    assert_eq!(report.deleted.len(), 2);
    for account in [&alice, &bob] {
        assert!(!account.exists().await.unwrap());
        assert!(account.get_key().await.unwrap().is_none());
    }
    assert!(sandbox.manager.accounts_created().is_empty());

    sandbox.close().await;
}

#[tokio::test]
async fn test_patch_state_is_visible() {
    let sandbox = TestSandbox::start().await;
    let root = sandbox.root();
    let alice = root
        .create_sub_account("alice", CreateAccountOptions::default())
        .await
        .unwrap();

    alice.patch_state(b"STATE", b"patched").await.unwrap();
    let state = alice.view_state(b"STA").await.unwrap();
    assert_eq!(state.get(b"STATE"), Some(b"patched".to_vec()));

    sandbox.close().await;
}
