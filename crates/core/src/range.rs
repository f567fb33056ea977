//! Key ranges and request validation.
//!
//! Every read/write entry point validates its keys against the region range
//! before touching storage. Range-in-range comparison truncates both sides
//! to the shorter length and applies a prefix-next adjustment when one side
//! carries a longer suffix.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::region::{Region, RegionState};

/// A half-open key range `[start_key, end_key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start key
    pub start_key: Vec<u8>,
    /// Exclusive end key
    pub end_key: Vec<u8>,
}

impl Range {
    /// Construct a range from raw keys.
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Range {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// True iff `start_key <= key < end_key`.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.start_key.as_slice() <= key && key < self.end_key.as_slice()
    }
}

/// Smallest key strictly greater than every key with prefix `key`:
/// increment the last non-0xFF byte and drop the suffix. An all-0xFF key
/// has no successor and returns the key unchanged.
pub fn prefix_next(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return next;
        }
    }
    next
}

/// A range is valid iff both keys are non-empty and start < end.
pub fn validate_range(range: &Range) -> Result<()> {
    if range.start_key.is_empty() || range.end_key.is_empty() {
        return Err(Error::illegal_parameters("range key is empty"));
    }
    if range.start_key >= range.end_key {
        return Err(Error::range_invalid(format!(
            "start {:02x?} >= end {:02x?}",
            range.start_key, range.end_key
        )));
    }
    Ok(())
}

/// Every key must satisfy `start_key <= key < end_key`.
pub fn validate_key_in_range(range: &Range, keys: &[&[u8]]) -> Result<()> {
    for key in keys {
        if !range.contains_key(key) {
            return Err(Error::key_out_of_range(format!(
                "region range [{:02x?}-{:02x?}) key {:02x?}",
                range.start_key, range.end_key, key
            )));
        }
    }
    Ok(())
}

/// Validate that `req_range` is covered by `region_range`.
///
/// Comparison happens on prefixes truncated to the shorter length; when the
/// end keys differ in length, the longer side's truncated prefix is
/// prefix-next adjusted so that a longer suffix counts as "greater".
pub fn validate_range_in_range(region_range: &Range, req_range: &Range) -> Result<()> {
    let out_of_range = || {
        Error::key_out_of_range(format!(
            "region range [{:02x?}-{:02x?}) req range [{:02x?}-{:02x?})",
            region_range.start_key, region_range.end_key, req_range.start_key, req_range.end_key
        ))
    };

    let min_len = region_range.start_key.len().min(req_range.start_key.len());
    if req_range.start_key[..min_len] < region_range.start_key[..min_len] {
        return Err(out_of_range());
    }

    let min_len = region_range.end_key.len().min(req_range.end_key.len());
    let mut req_end = req_range.end_key[..min_len].to_vec();
    let mut region_end = region_range.end_key[..min_len].to_vec();
    if req_range.end_key.len() > region_range.end_key.len() {
        req_end = prefix_next(&req_end);
    } else if req_range.end_key.len() < region_range.end_key.len() {
        region_end = prefix_next(&region_end);
    }

    if req_end > region_end {
        return Err(out_of_range());
    }

    Ok(())
}

/// Only `Normal` regions accept reads and writes.
pub fn validate_region_state(region: &Region) -> Result<()> {
    let state = region.state();
    match state {
        RegionState::Normal => Ok(()),
        _ => Err(Error::RegionUnavailable {
            region_id: region.id(),
            state,
        }),
    }
}
