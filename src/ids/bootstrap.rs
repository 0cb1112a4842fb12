use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::{IdError, IdGenerator};
use crate::job_manager::{JobManager, JobManagerError};

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("job manager getinfo failed: {0}")]
    JobManager(#[from] JobManagerError),

    #[error("primary job-ingest getinfo failed: {0}")]
    Primary(String),

    #[error(transparent)]
    Generator(#[from] IdError),
}

/// Where a component learns the high-water timestamp it must start past.
#[async_trait]
pub trait HighWaterSource: Send + Sync {
    async fn starting_timestamp(&self) -> Result<u64, BootstrapError>;
}

/// Seeds the primary component from the downstream job manager's highest
/// issued id.
pub struct JobManagerSeed {
    job_manager: Arc<dyn JobManager>,
}

impl JobManagerSeed {
    pub fn new(job_manager: Arc<dyn JobManager>) -> Self {
        Self { job_manager }
    }
}

#[async_trait]
impl HighWaterSource for JobManagerSeed {
    async fn starting_timestamp(&self) -> Result<u64, BootstrapError> {
        let max_jobid = self.job_manager.max_jobid().await?;
        Ok(max_jobid.timestamp() + 1)
    }
}

/// Build the generator for `component_id`. Must complete before the
/// component accepts submissions.
pub async fn bootstrap(
    component_id: u32,
    source: &dyn HighWaterSource,
) -> Result<IdGenerator, BootstrapError> {
    IdGenerator::check_generator_id(component_id)?;
    let timestamp = source.starting_timestamp().await?;
    let generator = IdGenerator::new(component_id, timestamp)?;
    tracing::debug!(component_id, timestamp, "id generator initialized");
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{JobId, MAX_GENERATOR_ID};
    use crate::job_manager::{JobAnnouncement, MemoryJobManager};

    struct FixedSource(u64);

    #[async_trait]
    impl HighWaterSource for FixedSource {
        async fn starting_timestamp(&self) -> Result<u64, BootstrapError> {
            Ok(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn primary_starts_past_job_manager_max() {
        let jm = Arc::new(MemoryJobManager::new());
        let prior = JobId::from_parts(900, 0, 12);
        jm.submit(&[JobAnnouncement {
            id: prior,
            userid: 1,
            priority: 16,
            t_submit: 0.0,
            flags: 0,
        }])
        .await
        .unwrap();

        let mut gen = bootstrap(0, &JobManagerSeed::new(jm)).await.unwrap();
        let id = gen.allocate().unwrap();
        assert_eq!(id.timestamp(), 901);
        assert!(id > prior);
    }

    #[tokio::test]
    async fn declines_out_of_range_component() {
        let err = bootstrap(MAX_GENERATOR_ID + 1, &FixedSource(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Generator(IdError::GeneratorIdOutOfRange { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_uses_reported_timestamp() {
        let mut gen = bootstrap(7, &FixedSource(4242)).await.unwrap();
        let id = gen.allocate().unwrap();
        assert_eq!(id.timestamp(), 4242);
        assert_eq!(id.generator_id(), 7);
    }
}
