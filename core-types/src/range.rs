// Copyright (c) James Kassemi, SC, US. All rights reserved.

use thiserror::Error;

/// Largest number of documents a single range may span.
pub const MAX_RANGE: usize = 1000;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("`to` ({to}) must not be smaller than `from` ({from})")]
    Inverted { from: usize, to: usize },
    #[error("range {from}..{to} spans {size} documents, limit is {max}")]
    TooLarge {
        from: usize,
        to: usize,
        size: usize,
        max: usize,
    },
}

/// Checks a half-open `[from, to)` range against [`MAX_RANGE`].
pub fn validate_range(from: usize, to: usize) -> Result<(), RangeError> {
    if to < from {
        return Err(RangeError::Inverted { from, to });
    }
    let size = to - from;
    if size > MAX_RANGE {
        return Err(RangeError::TooLarge {
            from,
            to,
            size,
            max: MAX_RANGE,
        });
    }
    Ok(())
}
