use super::random::UniformSource;
use crate::network::Micros;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of probability mass: a uniform range of jitter in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    pub lo: u32,
    pub hi: u32,
}

const fn range(lo: u32, hi: u32) -> JitterRange {
    JitterRange { lo, hi }
}

/// Default TX jitter distribution. Repeated entries weight that part of the curve.
pub const DEFAULT_JITTER_TABLE: [JitterRange; 32] = [
    range(20, 100), range(20, 150), range(20, 200), range(20, 300),
    range(20, 400), range(20, 500), range(20, 600), range(20, 700),
    range(20, 800), range(20, 850), range(20, 900), range(20, 950),
    range(20, 800), range(20, 850), range(20, 900), range(20, 950),
    range(20, 1000), range(20, 1050), range(50, 1100), range(20, 1150),
    range(20, 1000), range(20, 1050), range(50, 1100), range(20, 1150),
    range(20, 1000), range(20, 1050), range(50, 1100), range(20, 1150),
    range(50, 1500), range(50, 2500), range(100, 3500), range(100, 8000),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JitterTableError {
    #[error("jitter table is empty")]
    Empty,
    #[error("jitter table holds more than 256 ranges ({0})")]
    TooLarge(usize),
    #[error("jitter range {index} is empty ({lo}..{hi})")]
    EmptyRange { index: usize, lo: u32, hi: u32 },
}

#[derive(Debug, Clone)]
pub struct JitterSampler {
    ranges: Vec<JitterRange>,
    mean: u32,
}

impl JitterSampler {
    pub fn new(ranges: Vec<JitterRange>) -> Result<Self, JitterTableError> {
        if ranges.is_empty() {
            return Err(JitterTableError::Empty);
        }
        // The range index comes from the top byte of a draw
        if ranges.len() > 256 {
            return Err(JitterTableError::TooLarge(ranges.len()));
        }
        if let Some((index, r)) = ranges.iter().enumerate().find(|(_, r)| r.hi <= r.lo) {
            return Err(JitterTableError::EmptyRange { index, lo: r.lo, hi: r.hi });
        }

        let mean = table_mean(&ranges);
        Ok(Self { ranges, mean })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn mean(&self) -> u32 {
        self.mean
    }

    /// One jitter sample scaled so that samples average out to `average_us`.
    pub fn sample(&self, source: &mut dyn UniformSource, average_us: u32) -> Micros {
        if average_us == 0 {
            return 0;
        }
        let draw = source.next_u32();
        let entry = self.ranges[(draw >> 24) as usize % self.ranges.len()];
        let base = entry.lo + draw % (entry.hi - entry.lo);
        base as u64 * average_us as u64 / self.mean.max(1) as u64
    }
}

impl Default for JitterSampler {
    fn default() -> Self {
        let ranges = DEFAULT_JITTER_TABLE.to_vec();
        let mean = table_mean(&ranges);
        Self { ranges, mean }
    }
}

fn table_mean(ranges: &[JitterRange]) -> u32 {
    let total: u64 = ranges.iter().map(|r| r.lo as u64 + r.hi as u64).sum();
    (total / (ranges.len() as u64 * 2)) as u32
}
