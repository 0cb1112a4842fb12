use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::grpc::ingest_service::IngestGrpcService;
use crate::ingest::IngestHandle;
use crate::proto::job_ingest_server::JobIngestServer;

pub struct GrpcServer {
    addr: SocketAddr,
    handle: IngestHandle,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, handle: IngestHandle) -> Self {
        Self { addr, handle }
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(JobIngestServer::new(IngestGrpcService::new(self.handle)))
            .serve_with_shutdown(self.addr, shutdown)
            .await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn run_on<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(JobIngestServer::new(IngestGrpcService::new(self.handle)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await
    }
}
