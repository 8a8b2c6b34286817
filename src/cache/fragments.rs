use serde::{Deserialize, Serialize};

use super::range::ByteRange;

/// Sorted set of byte ranges already present in a resource's cache file.
///
/// Fragments are kept ascending by offset, pairwise disjoint and never adjacent:
/// touching or overlapping inserts are coalesced into a single fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ByteRange>", into = "Vec<ByteRange>")]
pub struct FragmentIndex {
    fragments: Vec<ByteRange>,
}

impl FragmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sub-range of `range` covered by a fragment, in ascending order
    pub fn intersect(&self, range: &ByteRange) -> Vec<ByteRange> {
        let mut pieces = Vec::new();
        if range.is_empty() {
            return pieces;
        }

        for fragment in &self.fragments {
            if fragment.offset >= range.end() {
                break;
            }
            if let Some(piece) = fragment.intersection(range) {
                pieces.push(piece);
            }
        }

        pieces
    }

    /// Record `range` as cached, merging it with any overlapping or adjacent fragments
    pub fn add(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }

        // Fragments in [first, last) touch or overlap the new range
        let first = self.fragments.partition_point(|f| f.end() < range.offset);
        let last = self.fragments.partition_point(|f| f.offset <= range.end());

        let merged = if first < last {
            ByteRange::from_bounds(
                self.fragments[first].offset.min(range.offset),
                self.fragments[last - 1].end().max(range.end()),
            )
        } else {
            range
        };

        self.fragments.splice(first..last, std::iter::once(merged));
    }

    /// Whether `range` is fully cached
    pub fn contains(&self, range: &ByteRange) -> bool {
        if range.is_empty() {
            return true;
        }
        let idx = self.fragments.partition_point(|f| f.end() <= range.offset);
        self.fragments
            .get(idx)
            .is_some_and(|fragment| fragment.contains(range))
    }

    /// Drop everything at or beyond `len`, clipping a fragment that straddles it
    pub fn truncate(&mut self, len: u64) {
        self.fragments.retain(|f| f.offset < len);
        if let Some(last) = self.fragments.last_mut()
            && last.end() > len
        {
            *last = ByteRange::from_bounds(last.offset, len);
        }
    }

    /// Total number of cached bytes
    pub fn cached_bytes(&self) -> u64 {
        self.fragments.iter().map(|f| f.length).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ByteRange> {
        self.fragments.iter()
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl From<Vec<ByteRange>> for FragmentIndex {
    fn from(ranges: Vec<ByteRange>) -> Self {
        let mut index = FragmentIndex::new();
        for range in ranges {
            index.add(range);
        }
        index
    }
}

impl From<FragmentIndex> for Vec<ByteRange> {
    fn from(index: FragmentIndex) -> Self {
        index.fragments
    }
}
