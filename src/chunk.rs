use crate::error::ConfigError;
use std::ops::{Range, RangeInclusive};

/// One contiguous slice of a source table. `index` is 1-based; `end` is
/// exclusive and only the last range of a plan may be shorter than the chunk
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

pub fn chunk_count(row_count: usize, chunk_size: usize) -> Result<usize, ConfigError> {
    if chunk_size == 0 {
        return Err(ConfigError::ChunkSize(chunk_size));
    }
    Ok(row_count.div_ceil(chunk_size))
}

/// Splits `[0, row_count)` into `ceil(row_count / chunk_size)` ranges.
pub fn plan(row_count: usize, chunk_size: usize) -> Result<Vec<ChunkRange>, ConfigError> {
    let count = chunk_count(row_count, chunk_size)?;
    Ok((0..count)
        .map(|i| {
            let start = i * chunk_size;
            ChunkRange {
                index: (i + 1) as u32,
                start,
                end: (start + chunk_size).min(row_count),
            }
        })
        .collect())
}

/// Validates an inclusive range of 1-based chunk numbers picked by hand.
pub fn chunk_numbers(start: u32, end: u32) -> Result<RangeInclusive<u32>, ConfigError> {
    if start == 0 || start > end {
        return Err(ConfigError::ChunkNumberRange { start, end });
    }
    Ok(start..=end)
}
