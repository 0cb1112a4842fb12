//! Jobspec validation.
//!
//! The ingest loop hands each unwrapped jobspec to a [`Validate`]
//! implementation and gets back a future resolving to the verdict. Multiple
//! validations may be outstanding at once; completion order is up to the
//! implementation.

mod pool;
mod worker;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};

pub use pool::ValidatorPool;
pub use worker::ValidatorError;

/// Verdict of one validation. `Err` carries the reason given to the user.
pub type Verdict = Result<(), String>;

/// Outcome of asking a validator to stop.
pub struct Drain {
    /// Workers still running when the drain was requested.
    pub active: usize,
    /// Resolves once every worker has exited.
    pub all_exited: BoxFuture<'static, ()>,
}

impl Drain {
    pub fn idle() -> Self {
        Self {
            active: 0,
            all_exited: future::ready(()).boxed(),
        }
    }
}

impl std::fmt::Debug for Drain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain").field("active", &self.active).finish()
    }
}

pub trait Validate: Send + Sync {
    fn validate(&self, jobspec: Bytes) -> BoxFuture<'static, Verdict>;

    /// Stop accepting work and let workers finish what they hold.
    fn request_drain(&self) -> Drain;

    /// Number of running workers.
    fn active(&self) -> usize {
        0
    }
}

/// In-process fallback used when no validator program is configured:
/// the jobspec must parse as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonValidator;

impl JsonValidator {
    fn check(jobspec: &[u8]) -> Verdict {
        match serde_json::from_slice::<serde_json::Value>(jobspec) {
            Ok(serde_json::Value::Object(_)) => Ok(()),
            Ok(_) => Err("jobspec must be a JSON object".to_string()),
            Err(e) => Err(format!("jobspec is not valid JSON: {e}")),
        }
    }
}

impl Validate for JsonValidator {
    fn validate(&self, jobspec: Bytes) -> BoxFuture<'static, Verdict> {
        future::ready(Self::check(&jobspec)).boxed()
    }

    fn request_drain(&self) -> Drain {
        Drain::idle()
    }
}
