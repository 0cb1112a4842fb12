pub mod config;
pub mod error;
pub mod grpc;
pub mod ids;
pub mod ingest;
pub mod job;
pub mod job_manager;
pub mod node;
pub mod shutdown;
pub mod sign;
pub mod store;
pub mod validator;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("ingest");
}
