//! Commit and announce failures, and the compensating unlink.


use std::sync::Arc;
use std::time::Duration;

use job_ingest::error::ErrorKind;
use job_ingest::job_manager::MemoryJobManager;
use test_harness::{owner, owner_request, FailingStore, FlakyJobManager, TestIngest};

#[tokio::test(start_paused = true)]
async fn commit_failure_rejects_whole_batch() {
    let store = Arc::new(FailingStore::new());
    store.fail_commits(true);
    let jm = Arc::new(MemoryJobManager::new());
    let ingest = TestIngest::builder()
        .store(store.clone())
        .job_manager(jm.clone())
        .start();

    let waiters: Vec<_> = (0..3)
        .map(|_| ingest.spawn_submit(owner_request(), owner()))
        .collect();
    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Commit);
        assert!(err.to_string().starts_with("KVS commit failed"), "{err}");
    }

    assert_eq!(store.attempts(), 1);
    assert!(store.inner.keys().await.is_empty(), "nothing durable");
    assert_eq!(jm.submit_count(), 0, "no announcement after failed commit");

    ingest.stop().await;
}

#[tokio::test(start_paused = true)]
async fn announce_failure_removes_committed_records() {
    let store = Arc::new(FailingStore::new());
    let jm = Arc::new(FlakyJobManager::new());
    jm.fail_submits(true);
    let ingest = TestIngest::builder()
        .store(store.clone())
        .job_manager(jm.clone())
        .start();

    let waiters: Vec<_> = (0..2)
        .map(|_| ingest.spawn_submit(owner_request(), owner()))
        .collect();
    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Announce);
    }

    let store_check = store.clone();
    test_harness::assert_eventually(
        || {
            let store = store_check.clone();
            async move { store.inner.keys().await.is_empty() }
        },
        Duration::from_secs(1),
        "records of unannounced jobs are removed",
    )
    .await;
    assert_eq!(store.attempts(), 2, "commit plus compensation");
    assert_eq!(jm.attempts(), 1);

    ingest.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_compensation_is_not_retried() {
    let store = Arc::new(FailingStore::new());
    store.fail_after(1);
    let jm = Arc::new(FlakyJobManager::new());
    jm.fail_submits(true);
    let ingest = TestIngest::builder()
        .store(store.clone())
        .job_manager(jm.clone())
        .start();

    let err = ingest
        .handle
        .submit(owner_request(), owner())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Announce);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.attempts(), 2);
    assert!(
        !store.inner.keys().await.is_empty(),
        "records stay when the unlink itself fails"
    );

    ingest.stop().await;
}

#[tokio::test(start_paused = true)]
async fn service_recovers_after_failed_batch() {
    let store = Arc::new(FailingStore::new());
    let jm = Arc::new(FlakyJobManager::new());
    jm.fail_submits(true);
    let ingest = TestIngest::builder()
        .store(store.clone())
        .job_manager(jm.clone())
        .start();

    let failed = ingest.handle.submit(owner_request(), owner()).await;
    assert!(failed.is_err());

    jm.fail_submits(false);
    let id = ingest
        .handle
        .submit(owner_request(), owner())
        .await
        .expect("next batch succeeds");

    assert!(store.inner.contains_dir(&id.kvs_dir()).await);
    assert_eq!(jm.inner.jobs().await.len(), 1);

    ingest.stop().await;
}
