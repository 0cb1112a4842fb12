use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::grpc::credentials::with_credentials;
use crate::ids::{BootstrapError, HighWaterSource, JobId};
use crate::job::{Credentials, SubmitRequest};
use crate::proto::job_ingest_client::JobIngestClient;
use crate::proto::{GetInfoRequest, ShutdownRequest, SubmitRequest as ProtoSubmitRequest};

pub(crate) async fn connect(addr: &str) -> Result<Channel, Status> {
    let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| Status::internal(format!("Invalid endpoint: {}", e)))?;
    endpoint
        .connect()
        .await
        .map_err(|e| Status::unavailable(format!("Failed to connect to {}: {}", addr, e)))
}

/// Client for a running job-ingest component.
#[derive(Clone)]
pub struct IngestClient {
    client: JobIngestClient<Channel>,
    credentials: Credentials,
}

impl IngestClient {
    pub async fn connect(addr: &str, credentials: Credentials) -> Result<Self, Status> {
        let channel = connect(addr).await?;
        Ok(Self {
            client: JobIngestClient::new(channel),
            credentials,
        })
    }

    pub async fn submit(&mut self, request: SubmitRequest) -> Result<JobId, Status> {
        let message = ProtoSubmitRequest {
            signed_spec: request.signed_spec,
            priority: request.priority,
            flags: request.flags,
        };
        let response = self
            .client
            .submit(with_credentials(message, self.credentials))
            .await?;
        Ok(JobId::new(response.into_inner().id))
    }

    pub async fn get_info(&mut self) -> Result<u64, Status> {
        let response = self
            .client
            .get_info(with_credentials(GetInfoRequest {}, self.credentials))
            .await?;
        Ok(response.into_inner().timestamp)
    }

    pub async fn shutdown(&mut self) -> Result<u32, Status> {
        let response = self
            .client
            .shutdown(with_credentials(ShutdownRequest {}, self.credentials))
            .await?;
        Ok(response.into_inner().active_validators)
    }
}

/// Seeds a non-primary component from the primary's high-water timestamp.
pub struct PrimarySeed {
    addr: String,
    credentials: Credentials,
}

impl PrimarySeed {
    /// `owner` is the instance owner's userid; getinfo is owner-only.
    pub fn new(addr: impl Into<String>, owner: u32) -> Self {
        Self {
            addr: addr.into(),
            credentials: Credentials::owner(owner),
        }
    }
}

#[async_trait]
impl HighWaterSource for PrimarySeed {
    async fn starting_timestamp(&self) -> Result<u64, BootstrapError> {
        let mut client = IngestClient::connect(&self.addr, self.credentials)
            .await
            .map_err(|e| BootstrapError::Primary(e.message().to_string()))?;
        client
            .get_info()
            .await
            .map_err(|e| BootstrapError::Primary(e.message().to_string()))
    }
}
