//! Job identifiers and the distributed id generator.
//!
//! Ids are 64-bit FLUIDs: a millisecond timestamp in the high 40 bits, the
//! generating component in the next 14, and a per-millisecond sequence in
//! the low 10. Two generators started with distinct component ids never
//! produce the same id, and a generator seeded past the last issued
//! timestamp never goes backward across a restart.

pub mod bootstrap;
pub mod generator;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bootstrap::{bootstrap, BootstrapError, HighWaterSource, JobManagerSeed};
pub use generator::IdGenerator;

pub const TIMESTAMP_BITS: u32 = 40;
pub const GENERATOR_BITS: u32 = 14;
pub const SEQUENCE_BITS: u32 = 10;

/// Largest component id the encoding can address.
pub const MAX_GENERATOR_ID: u32 = (1 << GENERATOR_BITS) - 1;
pub const MAX_SEQUENCE: u32 = (1 << SEQUENCE_BITS) - 1;
pub const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("generator id {id} exceeds maximum {max}")]
    GeneratorIdOutOfRange { id: u32, max: u32 },

    #[error("id timestamp space exhausted")]
    Exhausted,
}

/// A globally unique job id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn from_parts(timestamp: u64, generator_id: u32, sequence: u32) -> Self {
        Self(
            (timestamp << (GENERATOR_BITS + SEQUENCE_BITS))
                | (u64::from(generator_id) << SEQUENCE_BITS)
                | u64::from(sequence),
        )
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn timestamp(self) -> u64 {
        self.0 >> (GENERATOR_BITS + SEQUENCE_BITS)
    }

    pub fn generator_id(self) -> u32 {
        ((self.0 >> SEQUENCE_BITS) & u64::from(MAX_GENERATOR_ID)) as u32
    }

    pub fn sequence(self) -> u32 {
        (self.0 & u64::from(MAX_SEQUENCE)) as u32
    }

    /// Four 16-bit groups in 0-padded hex, e.g. `0000.0004.b200.0000`.
    pub fn dothex(self) -> String {
        let v = self.0;
        format!(
            "{:04x}.{:04x}.{:04x}.{:04x}",
            (v >> 48) & 0xffff,
            (v >> 32) & 0xffff,
            (v >> 16) & 0xffff,
            v & 0xffff
        )
    }

    /// Store directory holding every record of this job.
    pub fn kvs_dir(self) -> String {
        format!("job.{}", self.dothex())
    }

    pub fn kvs_key(self, name: &str) -> String {
        format!("job.{}.{}", self.dothex(), name)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<JobId> for u64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}
