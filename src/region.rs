// ABOUTME: Physical address ranges and a sorted, merged range set
// ABOUTME: RangeSet subtracts claimed memory from the address space to find untyped regions

use core::fmt;
use core::ops::Range;
use serde::Serialize;

/// A `[base, base + size)` range of physical addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AddressRange {
    /// First address of the range
    pub base: u64,
    /// Length in bytes
    pub size: u64,
}

impl AddressRange {
    /// Create a range from base and size
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Exclusive end address, `None` when it does not fit in 64 bits
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.size)
    }

    /// Exclusive end address, clamped to `u64::MAX`
    pub fn end_saturating(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Zero-sized ranges claim nothing
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the two ranges share at least one address
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.base < other.end_saturating()
            && other.base < self.end_saturating()
    }

    /// Whether `other` lies entirely inside `self`
    pub fn contains(&self, other: &AddressRange) -> bool {
        other.base >= self.base && other.end_saturating() <= self.end_saturating()
    }

    /// Shrink to whole pages of `1 << page_bits` bytes; `None` if no page is left
    pub fn align_inward(&self, page_bits: u8) -> Option<AddressRange> {
        let page = 1u64 << page_bits;
        let mask = page - 1;
        let base = self.base.checked_add(mask)? & !mask;
        let end = self.end_saturating() & !mask;
        (end > base).then(|| AddressRange::new(base, end - base))
    }

    fn as_range(&self) -> Range<u64> {
        self.base..self.end_saturating()
    }
}

impl From<Range<u64>> for AddressRange {
    fn from(range: Range<u64>) -> Self {
        Self::new(range.start, range.end.saturating_sub(range.start))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:x}, 0x{:x})", self.base, self.end_saturating())
    }
}

/// Sorted set of disjoint, non-adjacent, non-empty ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    inner: Vec<Range<u64>>,
}

impl RangeSet {
    /// An empty set
    pub const fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Iterate the ranges in address order
    pub fn iter(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.inner.iter().cloned().map(AddressRange::from)
    }

    /// The set covers no address
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Add a range, merging it with anything it touches
    pub fn add(&mut self, range: AddressRange) {
        let range = range.as_range();
        if range.is_empty() {
            return;
        }
        let at = self.inner.partition_point(|r| r.start < range.start);
        self.inner.insert(at, range);
        self.combine();
    }

    fn combine(&mut self) {
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.inner.len());
        for current in self.inner.drain(..) {
            match merged.last_mut() {
                Some(last) if current.start <= last.end => last.end = last.end.max(current.end),
                _ => merged.push(current),
            }
        }
        self.inner = merged;
    }

    /// Remove a range, splitting whatever it cuts through
    pub fn sub(&mut self, range: AddressRange) {
        let cut = range.as_range();
        if cut.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.inner.len() + 1);
        for current in self.inner.drain(..) {
            if current.end <= cut.start || current.start >= cut.end {
                kept.push(current);
                continue;
            }
            // [      ]
            //    [      ]
            if current.start < cut.start {
                kept.push(current.start..cut.start);
            }
            //     [      ]
            //  [       ]
            if current.end > cut.end {
                kept.push(cut.end..current.end);
            }
        }
        self.inner = kept;
    }

    /// Remove every range of `other`
    pub fn sub_set(&mut self, other: &RangeSet) {
        for range in other.iter() {
            self.sub(range);
        }
    }

    /// Drop everything at or above `limit`
    pub fn clip(&mut self, limit: u64) {
        self.sub(AddressRange::from(limit..u64::MAX));
    }
}

impl FromIterator<AddressRange> for RangeSet {
    fn from_iter<I: IntoIterator<Item = AddressRange>>(iter: I) -> Self {
        let mut set = RangeSet::new();
        for range in iter {
            set.add(range);
        }
        set
    }
}
