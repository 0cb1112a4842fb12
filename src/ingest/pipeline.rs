use std::sync::Arc;

use crate::error::IngestError;
use crate::job_manager::JobManager;
use crate::store::{KvStore, Transaction};

use super::batch::Batch;

/// How a flushed batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Submitted { jobs: usize },
    CommitFailed { jobs: usize },
    AnnounceFailed { jobs: usize, compensated: bool },
}

/// Commit the batch, announce it, then answer every submitter.
///
/// A failed announcement answers every job with the error first and then
/// unlinks the records the commit wrote. Compensation failures are
/// logged only: the submitters already know their jobs were refused.
pub async fn flush(
    batch: Batch,
    store: Arc<dyn KvStore>,
    job_manager: Arc<dyn JobManager>,
) -> FlushOutcome {
    let (jobs, txn, announcements) = batch.into_parts();
    let count = jobs.len();
    tracing::debug!(jobs = count, ops = txn.len(), "Flushing batch");

    if let Err(e) = store.commit(txn).await {
        tracing::warn!(jobs = count, error = %e, "Batch commit failed");
        let err = IngestError::Commit(format!("KVS commit failed: {e}"));
        for job in jobs {
            job.respond(Err(err.clone()));
        }
        return FlushOutcome::CommitFailed { jobs: count };
    }

    if let Err(e) = job_manager.submit(&announcements).await {
        tracing::warn!(jobs = count, error = %e, "Batch announce failed");
        let err = IngestError::Announce(format!("job-manager submit failed: {e}"));

        let mut undo = Transaction::new();
        for job in &jobs {
            undo.unlink(job.id.kvs_dir());
        }
        for job in jobs {
            job.respond(Err(err.clone()));
        }

        let compensated = match store.commit(undo).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(jobs = count, error = %e, "Failed to remove records of unannounced jobs");
                false
            }
        };
        return FlushOutcome::AnnounceFailed {
            jobs: count,
            compensated,
        };
    }

    for job in jobs {
        let id = job.id;
        job.respond(Ok(id));
    }
    FlushOutcome::Submitted { jobs: count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::JobId;
    use crate::job::{Credentials, Job, JobFlags};
    use crate::job_manager::{JobAnnouncement, JobManagerError, MemoryJobManager};
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    struct RejectingJobManager;

    #[async_trait]
    impl JobManager for RejectingJobManager {
        async fn submit(&self, _jobs: &[JobAnnouncement]) -> Result<(), JobManagerError> {
            Err(JobManagerError::Rejected("queue disabled".into()))
        }

        async fn max_jobid(&self) -> Result<JobId, JobManagerError> {
            Ok(JobId::new(0))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn commit(&self, _txn: Transaction) -> Result<(), StoreError> {
            Err(StoreError::Commit("disk full".into()))
        }
    }

    fn batch_of(n: u32) -> (Batch, Vec<oneshot::Receiver<Result<JobId, IngestError>>>) {
        let mut batch = Batch::new();
        let mut replies = Vec::new();
        for seq in 0..n {
            let (tx, rx) = oneshot::channel();
            let job = Job::new(
                "J".into(),
                Credentials::owner(0),
                16,
                JobFlags::empty(),
                Bytes::from_static(b"{}"),
                tx,
            );
            batch.add_job(JobId::from_parts(10, 0, seq), job).unwrap();
            replies.push(rx);
        }
        (batch, replies)
    }

    #[tokio::test]
    async fn success_answers_in_order() {
        let store = Arc::new(MemoryStore::new());
        let jm = Arc::new(MemoryJobManager::new());
        let (batch, replies) = batch_of(3);
        let ids = batch.job_ids();

        let outcome = flush(batch, store.clone(), jm.clone()).await;
        assert_eq!(outcome, FlushOutcome::Submitted { jobs: 3 });

        for (rx, id) in replies.into_iter().zip(ids) {
            assert_eq!(rx.await.unwrap(), Ok(id));
            assert!(store.contains_dir(&id.kvs_dir()).await);
        }
        assert_eq!(store.commit_count(), 1);
        assert_eq!(jm.submit_count(), 1);
    }

    #[tokio::test]
    async fn commit_failure_skips_announce() {
        let jm = Arc::new(MemoryJobManager::new());
        let (batch, replies) = batch_of(2);

        let outcome = flush(batch, Arc::new(BrokenStore), jm.clone()).await;
        assert_eq!(outcome, FlushOutcome::CommitFailed { jobs: 2 });
        for rx in replies {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Commit);
        }
        assert_eq!(jm.submit_count(), 0);
    }

    #[tokio::test]
    async fn announce_failure_removes_records() {
        let store = Arc::new(MemoryStore::new());
        let (batch, replies) = batch_of(2);
        let ids = batch.job_ids();

        let outcome = flush(batch, store.clone(), Arc::new(RejectingJobManager)).await;
        assert_eq!(
            outcome,
            FlushOutcome::AnnounceFailed {
                jobs: 2,
                compensated: true
            }
        );
        for rx in replies {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Announce);
        }
        for id in ids {
            assert!(!store.contains_dir(&id.kvs_dir()).await);
        }
        assert_eq!(store.commit_count(), 2);
    }
}
