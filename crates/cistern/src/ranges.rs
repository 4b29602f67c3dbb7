//! # Range Index
//!
//! Sorted, non-overlapping byte ranges describing which parts of a resource
//! are already cached. Ranges that overlap or touch are merged at insert
//! time, so the set is always in its canonical minimal form and queries
//! never have to coalesce on the fly.

use serde::{Deserialize, Serialize};

/// A half-open byte interval `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end of the range, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Whether `[offset, offset + length)` lies entirely inside this range.
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        offset >= self.offset && offset.saturating_add(length) <= self.end()
    }
}

/// The set of byte ranges known to be cached for one resource.
///
/// Invariant: ranges are sorted by offset and no two of them overlap or
/// touch. Because adjacent spans merge immediately, "fully covered" always
/// means "contained in a single range".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[offset, offset + length)` as cached.
    ///
    /// Zero-length inserts are ignored and a range reaching past `u64::MAX`
    /// is clamped to the addressable space. Every stored range the new one
    /// overlaps or touches is folded into a single entry, so inserting
    /// `[0, 100)` and then `[100, 50)` leaves just `[0, 150)`.
    pub fn insert(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let end = offset.saturating_add(length);
        if end == offset {
            // Nothing representable at or past u64::MAX.
            return;
        }

        // Candidates for merging: the first range whose end reaches our
        // start, up to (exclusive) the first range starting past our end.
        let lo = self.ranges.partition_point(|r| r.end() < offset);
        let hi = self.ranges.partition_point(|r| r.offset <= end);

        let mut merged_start = offset;
        let mut merged_end = end;
        if lo < hi {
            merged_start = merged_start.min(self.ranges[lo].offset);
            merged_end = merged_end.max(self.ranges[hi - 1].end());
        }

        self.ranges.splice(
            lo..hi,
            [ByteRange::new(merged_start, merged_end - merged_start)],
        );
    }

    /// Whether a single cached range fully contains `[offset, offset + length)`.
    ///
    /// Empty windows are trivially covered.
    pub fn is_covered(&self, offset: u64, length: u64) -> bool {
        if length == 0 {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.offset <= offset);
        if idx == 0 {
            return false;
        }
        self.ranges[idx - 1].contains(offset, length)
    }

    /// Uncovered sub-intervals of `[offset, offset + length)`, ascending.
    ///
    /// An empty result means the window is fully covered; a caller planning
    /// network fetches requests exactly these intervals.
    pub fn gaps(&self, offset: u64, length: u64) -> Vec<ByteRange> {
        let end = offset.saturating_add(length);
        let mut gaps = Vec::new();
        let mut cursor = offset;

        for range in &self.ranges {
            if range.end() <= cursor {
                continue;
            }
            if range.offset >= end {
                break;
            }
            if range.offset > cursor {
                gaps.push(ByteRange::new(cursor, range.offset - cursor));
            }
            cursor = range.end();
            if cursor >= end {
                return gaps;
            }
        }

        if cursor < end {
            gaps.push(ByteRange::new(cursor, end - cursor));
        }
        gaps
    }

    pub fn iter(&self) -> impl Iterator<Item = &ByteRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of cached bytes across all ranges.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    /// Re-establish the invariant after deserializing externally produced
    /// data. A record written by this engine is already canonical and passes
    /// the cheap check.
    pub(crate) fn canonicalize(&mut self) {
        let canonical = self
            .ranges
            .iter()
            .all(|r| r.length > 0 && r.offset.checked_add(r.length).is_some())
            && self.ranges.windows(2).all(|w| w[0].end() < w[1].offset);
        if canonical {
            return;
        }
        let old = std::mem::take(&mut self.ranges);
        for range in old {
            self.insert(range.offset, range.length);
        }
    }
}
