//! Downstream job manager boundary.
//!
//! The announcer tells the job manager about every newly committed job in
//! one request per batch; at startup the primary component asks it for the
//! highest id it has ever accepted.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::ids::JobId;

/// Summary of one new job as announced downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAnnouncement {
    pub id: JobId,
    pub userid: u32,
    pub priority: i32,
    pub t_submit: f64,
    pub flags: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobManagerError {
    #[error("job manager unavailable: {0}")]
    Unavailable(String),

    #[error("job manager rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait JobManager: Send + Sync {
    /// Announce a batch of committed jobs.
    async fn submit(&self, jobs: &[JobAnnouncement]) -> Result<(), JobManagerError>;

    /// Highest job id ever accepted, or id 0 when none.
    async fn max_jobid(&self) -> Result<JobId, JobManagerError>;
}

/// In-process job manager that records announcements.
#[derive(Debug, Default)]
pub struct MemoryJobManager {
    jobs: RwLock<Vec<JobAnnouncement>>,
    submits: AtomicUsize,
}

impl MemoryJobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<JobAnnouncement> {
        self.jobs.read().await.clone()
    }

    /// Number of announce requests received.
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobManager for MemoryJobManager {
    async fn submit(&self, jobs: &[JobAnnouncement]) -> Result<(), JobManagerError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let mut known = self.jobs.write().await;
        for job in jobs {
            tracing::info!(job_id = %job.id, userid = job.userid, priority = job.priority, "Job announced");
        }
        known.extend_from_slice(jobs);
        Ok(())
    }

    async fn max_jobid(&self) -> Result<JobId, JobManagerError> {
        let known = self.jobs.read().await;
        Ok(known
            .iter()
            .map(|job| job.id)
            .max()
            .unwrap_or_else(|| JobId::new(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(id: u64) -> JobAnnouncement {
        JobAnnouncement {
            id: JobId::new(id),
            userid: 100,
            priority: 16,
            t_submit: 1.5,
            flags: 0,
        }
    }

    #[tokio::test]
    async fn max_jobid_is_zero_when_empty() {
        let jm = MemoryJobManager::new();
        assert_eq!(jm.max_jobid().await.unwrap(), JobId::new(0));
    }

    #[tokio::test]
    async fn records_batches() {
        let jm = MemoryJobManager::new();
        jm.submit(&[announcement(5), announcement(9)]).await.unwrap();
        jm.submit(&[announcement(7)]).await.unwrap();
        assert_eq!(jm.submit_count(), 2);
        assert_eq!(jm.jobs().await.len(), 3);
        assert_eq!(jm.max_jobid().await.unwrap(), JobId::new(9));
    }
}
