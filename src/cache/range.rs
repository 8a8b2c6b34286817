use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte span `[offset, offset + length)` of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Build a range from its start and exclusive end. Returns an empty range if `end <= start`.
    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            offset: start,
            length: end.saturating_sub(start),
        }
    }

    /// Whether `offset + length` fits in a u64
    pub fn is_addressable(&self) -> bool {
        self.offset.checked_add(self.length).is_some()
    }

    /// Exclusive end offset, saturating at `u64::MAX` for non-addressable ranges
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Overlapping part of two ranges, `None` if they share no byte
    pub fn intersection(&self, other: &ByteRange) -> Option<ByteRange> {
        let start = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        if start < end {
            Some(ByteRange::from_bounds(start, end))
        } else {
            None
        }
    }

    /// True when `other` lies completely inside `self`
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}
