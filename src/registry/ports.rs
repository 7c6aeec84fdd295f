//! TCP host port allocation.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::errors::{Error, Result};

/// Picks the lowest free port of a fixed range.
///
/// Stateless: the caller passes the ports already taken and commits the
/// result together with the exposure record under its own lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAllocator {
    range: Range<u16>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self { range }
    }

    pub fn range(&self) -> &Range<u16> {
        &self.range
    }

    pub fn capacity(&self) -> usize {
        self.range.len()
    }

    /// First port of the range not present in `taken`.
    pub fn allocate(&self, taken: &BTreeSet<u16>) -> Result<u16> {
        self.range.clone().find(|port| !taken.contains(port)).ok_or_else(|| {
            Error::resource_exhausted(format!(
                "no available ports in range {}-{}",
                self.range.start, self.range.end
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_set_yields_range_start() {
        let allocator = PortAllocator::new(10000..60000);
        assert_eq!(allocator.allocate(&BTreeSet::new()).unwrap(), 10000);
    }

    #[test]
    fn fills_lowest_gap_first() {
        let allocator = PortAllocator::new(10000..60000);
        let taken: BTreeSet<u16> = [10000, 10001, 10003].into_iter().collect();
        assert_eq!(allocator.allocate(&taken).unwrap(), 10002);
    }

    #[test]
    fn ports_outside_range_are_ignored() {
        let allocator = PortAllocator::new(20000..20002);
        let taken: BTreeSet<u16> = [80, 443, 20000].into_iter().collect();
        assert_eq!(allocator.allocate(&taken).unwrap(), 20001);
    }

    #[test]
    fn full_range_is_exhausted() {
        let allocator = PortAllocator::new(20000..20003);
        let taken: BTreeSet<u16> = (20000..20003).collect();
        let err = allocator.allocate(&taken).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(allocator.capacity(), 3);
    }

    proptest! {
        #[test]
        fn allocation_is_in_range_and_free(taken in proptest::collection::btree_set(10000u16..10064, 0..64)) {
            let allocator = PortAllocator::new(10000..10064);
            match allocator.allocate(&taken) {
                Ok(port) => {
                    prop_assert!(allocator.range().contains(&port));
                    prop_assert!(!taken.contains(&port));
                    prop_assert!((10000..port).all(|p| taken.contains(&p)));
                }
                Err(_) => prop_assert_eq!(taken.len(), 64),
            }
        }
    }
}
