//! Grant commits racing a concurrent writer.
//!
//! The store is told to reject the next commits with a version conflict.
//! One rejection is absorbed by the engine's retry; a second one surfaces
//! as `StorageConflict` with nothing written.

use keywarden::store::Store;
use keywarden::{EngineError, ShareRequest, ShareStatus};
use keywarden_testkit::{init_tracing, TestFixture};

#[tokio::test]
async fn test_apply_retries_one_conflict() {
    init_tracing();
    let fixture = TestFixture::conflicting();
    let alice = fixture.user("alice").await;
    let bob = fixture.user("bob").await;
    let tree = fixture.vault_tree(&alice, 1, 1, 0).await;

    fixture.store.fail_next_commits(1);
    let request = ShareRequest::new(tree.vault.id)
        .user(alice.user.id, true)
        .user(bob.user.id, false);
    let outcome = fixture
        .engine
        .apply_grants(&alice.current, &alice.password, &request)
        .await
        .unwrap();
    assert_eq!(fixture.store.injected(), 1);
    assert_eq!(outcome.version, Some(1));
    assert!(outcome.share_process_id.is_some());

    let key = fixture
        .engine
        .read_resource_key(&bob.current, &bob.password, &tree.vault.id)
        .await
        .unwrap();
    assert_eq!(key.as_bytes(), tree.key(&tree.vault.id).as_bytes());
}

#[tokio::test]
async fn test_apply_gives_up_after_second_conflict() {
    init_tracing();
    let fixture = TestFixture::conflicting();
    let alice = fixture.user("alice").await;
    let bob = fixture.user("bob").await;
    let tree = fixture.vault_tree(&alice, 1, 1, 0).await;
    let before = fixture.engine.store().get_grants(&tree.vault.id).await.unwrap();

    fixture.store.fail_next_commits(2);
    let request = ShareRequest::new(tree.vault.id)
        .user(alice.user.id, true)
        .user(bob.user.id, false);
    let err = fixture
        .engine
        .apply_grants(&alice.current, &alice.password, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StorageConflict(id) if id == tree.vault.id));
    assert_eq!(fixture.store.injected(), 2);

    let after = fixture.engine.store().get_grants(&tree.vault.id).await.unwrap();
    assert_eq!(after, before);
    assert!(fixture
        .engine
        .share_processes_for(&tree.vault.id)
        .await
        .unwrap()
        .is_empty());
    assert!(fixture.audit.entries().await.is_empty());
    assert!(fixture
        .engine
        .read_resource_key(&bob.current, &bob.password, &tree.vault.id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_revoke_gives_up_after_second_conflict() {
    init_tracing();
    let fixture = TestFixture::conflicting();
    let alice = fixture.user("alice").await;
    let bob = fixture.user("bob").await;
    let tree = fixture.vault_tree(&alice, 0, 0, 1).await;
    let password = &tree.passwords[0];

    let request = ShareRequest::new(password.id)
        .user(alice.user.id, true)
        .user(bob.user.id, false);
    fixture
        .engine
        .apply_grants(&alice.current, &alice.password, &request)
        .await
        .unwrap();
    let before = fixture.engine.store().get_grants(&password.id).await.unwrap();

    fixture.store.fail_next_commits(2);
    let err = fixture
        .engine
        .revoke_grant(&alice.current, &alice.password, &password.id, &bob.private_group())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StorageConflict(id) if id == password.id));

    let after = fixture.engine.store().get_grants(&password.id).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_create_share_process_retries_conflicts() {
    init_tracing();
    let fixture = TestFixture::conflicting();
    let alice = fixture.user("alice").await;
    let bob = fixture.user("bob").await;
    let tree = fixture.vault_tree(&alice, 1, 2, 0).await;
    let request = ShareRequest::new(tree.vault.id)
        .user(alice.user.id, true)
        .user(bob.user.id, false);

    fixture.store.fail_next_commits(2);
    let err = fixture
        .engine
        .create_share_process(&alice.current, &alice.password, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StorageConflict(id) if id == tree.vault.id));
    assert!(fixture
        .engine
        .share_processes_for(&tree.vault.id)
        .await
        .unwrap()
        .is_empty());

    fixture.store.fail_next_commits(1);
    let id = fixture
        .engine
        .create_share_process(&alice.current, &alice.password, &request)
        .await
        .unwrap();
    assert_eq!(fixture.store.injected(), 3);

    let process = fixture.engine.share_process(&id).await.unwrap();
    assert_eq!(process.status, ShareStatus::Pending);
    assert_eq!(process.total_items, 3);
    let grants = fixture.engine.store().get_grants(&tree.vault.id).await.unwrap();
    assert!(grants.grants.iter().all(|g| g.group_id != bob.private_group()));
}
