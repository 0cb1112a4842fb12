//! The ingest pipeline: admission checks, validation, id allocation,
//! batching, commit and announcement.

pub mod admission;
pub mod batch;
pub mod pipeline;
pub mod service;

pub use admission::{admit, Admission};
pub use batch::{Batch, BatchedJob};
pub use pipeline::{flush, FlushOutcome};
pub use service::{IngestHandle, IngestParts, IngestRequest, IngestService};
