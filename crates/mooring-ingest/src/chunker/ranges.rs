//! Sorted, disjoint set of half-open byte ranges.

use mooring_common::types::ByteRange;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary ranges, merging overlaps and dropping empties.
    pub fn from_ranges(ranges: impl IntoIterator<Item = ByteRange>) -> Self {
        let mut set = Self::new();
        for range in ranges {
            set.insert(range);
        }
        set
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn into_vec(self) -> Vec<ByteRange> {
        self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    /// Add `[start, end)`, coalescing with overlapping or adjacent ranges.
    pub fn insert(&mut self, (start, end): ByteRange) {
        if start >= end {
            return;
        }
        let mut merged = (start, end);
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;

        for &(s, e) in &self.ranges {
            if e < merged.0 {
                out.push((s, e));
            } else if s > merged.1 {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push((s, e));
            } else {
                merged = (merged.0.min(s), merged.1.max(e));
            }
        }
        if !placed {
            out.push(merged);
        }
        self.ranges = out;
    }

    /// Remove `[start, end)` from the set.
    pub fn remove(&mut self, (start, end): ByteRange) {
        if start >= end {
            return;
        }
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e <= start || s >= end {
                out.push((s, e));
                continue;
            }
            if s < start {
                out.push((s, start));
            }
            if e > end {
                out.push((end, e));
            }
        }
        self.ranges = out;
    }

    /// Whether `[start, end)` lies entirely inside one range of the set.
    pub fn contains(&self, (start, end): ByteRange) -> bool {
        self.ranges.iter().any(|&(s, e)| s <= start && end <= e)
    }

    /// Whether any byte of `[start, end)` is in the set.
    pub fn overlaps(&self, (start, end): ByteRange) -> bool {
        self.ranges.iter().any(|&(s, e)| s < end && start < e)
    }

    /// Parts of `[start, end)` that are in the set.
    pub fn intersection(&self, (start, end): ByteRange) -> Vec<ByteRange> {
        self.ranges
            .iter()
            .filter_map(|&(s, e)| {
                let lo = s.max(start);
                let hi = e.min(end);
                (lo < hi).then_some((lo, hi))
            })
            .collect()
    }
}

impl From<Vec<ByteRange>> for RangeSet {
    fn from(ranges: Vec<ByteRange>) -> Self {
        Self::from_ranges(ranges)
    }
}
