use tonic::{Request, Response, Status};

use crate::grpc::credentials;
use crate::ingest::IngestHandle;
use crate::job::{Credentials, SubmitRequest};
use crate::proto::job_ingest_server::JobIngest;
use crate::proto::{
    GetInfoRequest, GetInfoResponse, ShutdownRequest, ShutdownResponse,
    SubmitRequest as ProtoSubmitRequest, SubmitResponse,
};

/// Client-facing gRPC surface over an [`IngestHandle`].
pub struct IngestGrpcService {
    handle: IngestHandle,
}

impl IngestGrpcService {
    pub fn new(handle: IngestHandle) -> Self {
        Self { handle }
    }
}

fn require_owner(credentials: &Credentials, method: &str) -> Result<(), Status> {
    if credentials.is_owner() {
        return Ok(());
    }
    Err(Status::permission_denied(format!(
        "{method} is restricted to the instance owner"
    )))
}

#[tonic::async_trait]
impl JobIngest for IngestGrpcService {
    async fn submit(
        &self,
        request: Request<ProtoSubmitRequest>,
    ) -> Result<Response<SubmitResponse>, Status> {
        let credentials = credentials::from_metadata(request.metadata())?;
        let req = request.into_inner();
        let submit = SubmitRequest {
            signed_spec: req.signed_spec,
            priority: req.priority,
            flags: req.flags,
        };

        match self.handle.submit(submit, credentials).await {
            Ok(id) => {
                tracing::info!(job_id = %id, userid = credentials.userid, "Job submitted");
                Ok(Response::new(SubmitResponse { id: id.get() }))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_info(
        &self,
        request: Request<GetInfoRequest>,
    ) -> Result<Response<GetInfoResponse>, Status> {
        let credentials = credentials::from_metadata(request.metadata())?;
        require_owner(&credentials, "getinfo")?;
        let timestamp = self.handle.get_info().await?;
        Ok(Response::new(GetInfoResponse { timestamp }))
    }

    async fn shutdown(
        &self,
        request: Request<ShutdownRequest>,
    ) -> Result<Response<ShutdownResponse>, Status> {
        let credentials = credentials::from_metadata(request.metadata())?;
        require_owner(&credentials, "shutdown")?;
        let active = self.handle.shutdown().await?;
        Ok(Response::new(ShutdownResponse {
            active_validators: u32::try_from(active).unwrap_or(u32::MAX),
        }))
    }
}
