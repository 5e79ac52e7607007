//! Byte key ranges
//!
//! All scans and range clears operate on half-open byte ranges
//! `[start, end)`. A missing bound means unbounded on that side.

/// Iteration direction for range scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Ascending key order
    #[default]
    Forward,
    /// Descending key order
    Reverse,
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    /// The whole keyspace
    pub fn all() -> Self {
        Self::default()
    }

    /// `[start, end)`
    pub fn new(start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self { start, end }
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: prefix_end(prefix),
        }
    }

    /// True if `key` falls inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_slice() {
                return false;
            }
        }
        true
    }

    /// True if no key can fall inside the range
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => s >= e,
            _ => false,
        }
    }
}

/// Smallest key strictly greater than every key with the given prefix.
///
/// Returns `None` when the prefix is empty or all `0xFF` (no upper bound).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Immediate successor of `key` in byte order (`key ‖ 0x00`)
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}
