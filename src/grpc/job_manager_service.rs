use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::job_manager::{JobAnnouncement, JobManager, JobManagerError};
use crate::proto::job_manager_server::JobManager as JobManagerRpc;
use crate::proto::{AnnounceRequest, AnnounceResponse, JobManagerInfoRequest, JobManagerInfoResponse};

/// Serves any [`JobManager`] over gRPC, so a remote component can announce
/// to it through [`GrpcJobManager`](super::GrpcJobManager).
pub struct JobManagerGrpcService {
    inner: Arc<dyn JobManager>,
}

impl JobManagerGrpcService {
    pub fn new(inner: Arc<dyn JobManager>) -> Self {
        Self { inner }
    }
}

fn to_status(err: JobManagerError) -> Status {
    match err {
        JobManagerError::Unavailable(msg) => Status::unavailable(msg),
        JobManagerError::Rejected(msg) => Status::failed_precondition(msg),
    }
}

#[tonic::async_trait]
impl JobManagerRpc for JobManagerGrpcService {
    async fn submit(
        &self,
        request: Request<AnnounceRequest>,
    ) -> Result<Response<AnnounceResponse>, Status> {
        let jobs: Vec<JobAnnouncement> = request
            .into_inner()
            .jobs
            .into_iter()
            .map(JobAnnouncement::from)
            .collect();
        self.inner.submit(&jobs).await.map_err(to_status)?;
        Ok(Response::new(AnnounceResponse {}))
    }

    async fn get_info(
        &self,
        _request: Request<JobManagerInfoRequest>,
    ) -> Result<Response<JobManagerInfoResponse>, Status> {
        let max_jobid = self.inner.max_jobid().await.map_err(to_status)?;
        Ok(Response::new(JobManagerInfoResponse {
            max_jobid: max_jobid.get(),
        }))
    }
}
