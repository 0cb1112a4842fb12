pub mod client;
pub mod credentials;
pub mod ingest_service;
pub mod job_manager_client;
pub mod job_manager_service;
pub mod server;

pub use client::{IngestClient, PrimarySeed};
pub use ingest_service::IngestGrpcService;
pub use job_manager_client::GrpcJobManager;
pub use job_manager_service::JobManagerGrpcService;
pub use server::GrpcServer;
