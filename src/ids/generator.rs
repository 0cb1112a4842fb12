use tokio::time::Instant;

use super::{IdError, JobId, MAX_GENERATOR_ID, MAX_SEQUENCE, MAX_TIMESTAMP};

/// FLUID generator owned by a single ingest service.
///
/// The timestamp component tracks milliseconds elapsed since `epoch`, offset
/// by the starting timestamp the generator was seeded with. When more than
/// `MAX_SEQUENCE + 1` ids are requested within one millisecond the logical
/// timestamp is advanced instead of waiting for the clock, so allocation
/// never blocks and never goes backward.
#[derive(Debug)]
pub struct IdGenerator {
    generator_id: u32,
    epoch: Instant,
    base_timestamp: u64,
    timestamp: u64,
    next_sequence: u32,
}

impl IdGenerator {
    pub fn new(generator_id: u32, starting_timestamp: u64) -> Result<Self, IdError> {
        Self::check_generator_id(generator_id)?;
        if starting_timestamp > MAX_TIMESTAMP {
            return Err(IdError::Exhausted);
        }
        Ok(Self {
            generator_id,
            epoch: Instant::now(),
            base_timestamp: starting_timestamp,
            timestamp: starting_timestamp,
            next_sequence: 0,
        })
    }

    pub fn check_generator_id(generator_id: u32) -> Result<(), IdError> {
        if generator_id > MAX_GENERATOR_ID {
            return Err(IdError::GeneratorIdOutOfRange {
                id: generator_id,
                max: MAX_GENERATOR_ID,
            });
        }
        Ok(())
    }

    pub fn generator_id(&self) -> u32 {
        self.generator_id
    }

    fn clock(&self) -> u64 {
        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_timestamp.saturating_add(elapsed)
    }

    /// Allocate the next id. Successive calls return strictly increasing ids.
    pub fn allocate(&mut self) -> Result<JobId, IdError> {
        let now = self.clock();
        if now > self.timestamp {
            self.timestamp = now;
            self.next_sequence = 0;
        } else if self.next_sequence > MAX_SEQUENCE {
            self.timestamp += 1;
            self.next_sequence = 0;
        }
        if self.timestamp > MAX_TIMESTAMP {
            return Err(IdError::Exhausted);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(JobId::from_parts(self.timestamp, self.generator_id, sequence))
    }

    /// Greatest timestamp this generator has issued or could issue now.
    /// A peer seeded from this value cannot collide with ids issued here.
    pub fn high_water_timestamp(&self) -> u64 {
        self.clock().max(self.timestamp)
    }
}
