use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::{BootstrapError, IdError};
use crate::job_manager::JobManagerError;
use crate::sign::SignError;

/// Category of a client-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    InvalidArgument,
    Permission,
    Validation,
    Allocation,
    Commit,
    Announce,
    Unavailable,
}

/// Terminal error delivered to a submitter. Cloned when one failure answers
/// every job in a batch, so the message should make sense to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("{0}")]
    Protocol(String),

    /// Submissions refused while the service drains.
    #[error("not supported")]
    NotSupported,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    Validation(String),

    #[error("id allocation failed: {0}")]
    Allocation(#[from] IdError),

    #[error("{0}")]
    Commit(String),

    #[error("{0}")]
    Announce(String),

    #[error("{0}")]
    Unavailable(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Protocol(_) | IngestError::NotSupported => ErrorKind::Protocol,
            IngestError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            IngestError::Permission(_) => ErrorKind::Permission,
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::Allocation(_) => ErrorKind::Allocation,
            IngestError::Commit(_) => ErrorKind::Commit,
            IngestError::Announce(_) => ErrorKind::Announce,
            IngestError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

impl From<IngestError> for tonic::Status {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::NotSupported => tonic::Status::unimplemented(message),
            IngestError::Protocol(_)
            | IngestError::InvalidArgument(_)
            | IngestError::Validation(_) => tonic::Status::invalid_argument(message),
            IngestError::Permission(_) => tonic::Status::permission_denied(message),
            IngestError::Allocation(_) => tonic::Status::resource_exhausted(message),
            IngestError::Commit(_) => tonic::Status::internal(message),
            IngestError::Announce(_) | IngestError::Unavailable(_) => {
                tonic::Status::unavailable(message)
            }
        }
    }
}

/// Errors that stop a component from starting or serving.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Security setup failed: {0}")]
    Security(#[from] SignError),

    #[error("Job manager error: {0}")]
    JobManager(#[from] JobManagerError),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_is_a_protocol_error() {
        let err = IngestError::NotSupported;
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "not supported");
        assert_eq!(tonic::Status::from(err).code(), tonic::Code::Unimplemented);
    }

    #[test]
    fn status_codes() {
        let cases = [
            (IngestError::Protocol("bad".into()), tonic::Code::InvalidArgument),
            (IngestError::Permission("no".into()), tonic::Code::PermissionDenied),
            (IngestError::Validation("reason".into()), tonic::Code::InvalidArgument),
            (IngestError::Allocation(IdError::Exhausted), tonic::Code::ResourceExhausted),
            (IngestError::Commit("kvs".into()), tonic::Code::Internal),
            (IngestError::Announce("jm".into()), tonic::Code::Unavailable),
        ];
        for (err, code) in cases {
            assert_eq!(tonic::Status::from(err).code(), code);
        }
    }

    #[test]
    fn validation_reason_is_preserved() {
        let status = tonic::Status::from(IngestError::Validation("missing tasks".into()));
        assert_eq!(status.message(), "missing tasks");
    }
}
