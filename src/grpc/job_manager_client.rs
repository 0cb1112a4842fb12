use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Code;

use crate::ids::JobId;
use crate::job_manager::{JobAnnouncement, JobManager, JobManagerError};
use crate::proto::job_manager_client::JobManagerClient;
use crate::proto::{
    AnnounceRequest, JobAnnouncement as ProtoJobAnnouncement, JobManagerInfoRequest,
};

/// Remote job manager reached over gRPC.
#[derive(Clone)]
pub struct GrpcJobManager {
    client: JobManagerClient<Channel>,
}

impl GrpcJobManager {
    pub async fn connect(addr: &str) -> Result<Self, JobManagerError> {
        let channel = super::client::connect(addr)
            .await
            .map_err(|e| JobManagerError::Unavailable(e.message().to_string()))?;
        Ok(Self {
            client: JobManagerClient::new(channel),
        })
    }
}

fn to_error(status: tonic::Status) -> JobManagerError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            JobManagerError::Unavailable(status.message().to_string())
        }
        _ => JobManagerError::Rejected(status.message().to_string()),
    }
}

impl From<&JobAnnouncement> for ProtoJobAnnouncement {
    fn from(job: &JobAnnouncement) -> Self {
        Self {
            id: job.id.get(),
            userid: job.userid,
            priority: job.priority,
            t_submit: job.t_submit,
            flags: job.flags,
        }
    }
}

impl From<ProtoJobAnnouncement> for JobAnnouncement {
    fn from(job: ProtoJobAnnouncement) -> Self {
        Self {
            id: JobId::new(job.id),
            userid: job.userid,
            priority: job.priority,
            t_submit: job.t_submit,
            flags: job.flags,
        }
    }
}

#[async_trait]
impl JobManager for GrpcJobManager {
    async fn submit(&self, jobs: &[JobAnnouncement]) -> Result<(), JobManagerError> {
        let request = AnnounceRequest {
            jobs: jobs.iter().map(ProtoJobAnnouncement::from).collect(),
        };
        // Clients share one channel; cloning is cheap.
        let mut client = self.client.clone();
        client.submit(request).await.map_err(to_error)?;
        Ok(())
    }

    async fn max_jobid(&self) -> Result<JobId, JobManagerError> {
        let mut client = self.client.clone();
        let response = client
            .get_info(JobManagerInfoRequest {})
            .await
            .map_err(to_error)?;
        Ok(JobId::new(response.into_inner().max_jobid))
    }
}
