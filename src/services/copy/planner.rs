//! Part planning: split a source of known size into contiguous byte ranges.

use crate::{
    models::copy::{ByteRange, PartJob, UploadSession},
    services::copy::error::CopyError,
};
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// Smallest part the service accepts (all parts but the last).
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Smallest source a multipart copy is attempted for.
pub const MIN_COPY_SIZE: u64 = 5 * MIB;

/// Maximum number of parts in one multipart session.
pub const MAX_PARTS: u64 = 10_000;

pub const DEFAULT_MIN_PART_SIZE: u64 = 50 * MIB;

/// The planned ranges for one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartPlan {
    part_size: u64,
    ranges: Vec<ByteRange>,
}

impl PartPlan {
    /// Plan the copy of `source_size` bytes.
    ///
    /// `part_size = max(ceil(source_size / MAX_PARTS), min_part_size)`, so the
    /// part count never exceeds `MAX_PARTS` and no part except the last is
    /// shorter than `min_part_size`.
    pub fn new(source_size: u64, min_part_size: u64) -> Result<Self, CopyError> {
        if source_size < MIN_COPY_SIZE {
            return Err(CopyError::SourceTooSmall {
                size: source_size,
                minimum: MIN_COPY_SIZE,
            });
        }

        let part_size = compute_part_size(source_size, min_part_size);
        let mut ranges = Vec::with_capacity(source_size.div_ceil(part_size) as usize);
        let mut offset = 0;
        while offset < source_size {
            let last = (offset + part_size).min(source_size) - 1;
            ranges.push(ByteRange::new(offset, last));
            offset = last + 1;
        }

        Ok(Self { part_size, ranges })
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Bind the ranges to a session. Part numbers start at 1.
    pub fn into_jobs(self, session: &Arc<UploadSession>) -> Vec<PartJob> {
        self.ranges
            .into_iter()
            .zip(1u32..)
            .map(|(range, part_number)| PartJob {
                part_number,
                range,
                session: Arc::clone(session),
            })
            .collect()
    }
}

/// Part size for `source_size`, honoring both `MAX_PARTS` and the
/// configured minimum. A zero minimum is treated as one byte.
pub fn compute_part_size(source_size: u64, min_part_size: u64) -> u64 {
    source_size.div_ceil(MAX_PARTS).max(min_part_size).max(1)
}
