//! Typed address regions and the region map.
//!
//! The analyser partitions each object's address range into contiguous,
//! non-overlapping typed regions. The map starts with one region per
//! object and is refined by splitting and re-merging as tracing decides
//! what each byte range is.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::Error;

/// Classification of a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Not yet decided.
    Unknown,
    /// Traced machine code.
    Code,
    /// Plain data.
    Data,
    /// An array of relocated code pointers.
    Vtable,
}

/// A contiguous typed byte range inside one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First address of the range.
    pub address: u32,
    /// Length in bytes; always non-zero in a map.
    pub size: u32,
    /// What the range holds.
    pub kind: RegionKind,
}

impl Region {
    /// Creates a new region.
    pub fn new(address: u32, size: u32, kind: RegionKind) -> Self {
        Self {
            address,
            size,
            kind,
        }
    }

    /// One past the last address of the range.
    pub fn end_address(&self) -> u32 {
        self.address + self.size
    }

    /// Returns true if `addr` lies within the range.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && addr < self.end_address()
    }
}

/// Address-ordered map of non-overlapping regions.
///
/// Invariants: regions tile the address ranges they were seeded with
/// (no gaps, no overlaps), and no two adjacent regions share a kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMap {
    map: BTreeMap<u32, Region>,
}

impl RegionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level region without splitting.
    ///
    /// Used for seeding only; `insert` is the operation that maintains
    /// the tiling invariant against existing regions.
    pub fn add(&mut self, region: Region) {
        self.map.insert(region.address, region);
    }

    /// Returns the region whose range contains `addr`.
    pub fn get_at(&self, addr: u32) -> Option<&Region> {
        self.map
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    /// Returns the region starting exactly at `addr`.
    pub fn get(&self, addr: u32) -> Option<&Region> {
        self.map.get(&addr)
    }

    /// Returns the region strictly preceding the one at `addr` in key order.
    pub fn prev_of(&self, addr: u32) -> Option<&Region> {
        self.map.range(..addr).next_back().map(|(_, r)| r)
    }

    /// Returns the region strictly following the one at `addr` in key order.
    pub fn next_of(&self, addr: u32) -> Option<&Region> {
        self.map
            .range((Bound::Excluded(addr), Bound::Unbounded))
            .next()
            .map(|(_, r)| r)
    }

    /// Splits the parent region containing `child` and inserts `child`.
    ///
    /// The parent is cut into up to three pieces: an optional leading
    /// piece and an optional trailing piece keep the parent's kind.
    /// Afterwards equal-kind neighbors of `child` are fused back.
    ///
    /// Fails if `child` is empty, starts outside every region, or runs
    /// past the end of its parent.
    pub fn insert(&mut self, child: Region) -> Result<(), Error> {
        if child.size == 0 {
            return Err(Error::EmptyRegion(child.address));
        }

        // Copy the parent out before mutating; the splice below
        // invalidates any reference into the map.
        let parent = *self
            .get_at(child.address)
            .ok_or(Error::UnmappedRegion(child.address))?;

        if child.end_address() > parent.end_address() {
            return Err(Error::RegionOutOfBounds {
                child_start: child.address,
                child_end: child.end_address(),
                parent_start: parent.address,
                parent_end: parent.end_address(),
            });
        }

        if child.end_address() != parent.end_address() {
            self.map.insert(
                child.end_address(),
                Region::new(
                    child.end_address(),
                    parent.end_address() - child.end_address(),
                    parent.kind,
                ),
            );
        }

        if child.address != parent.address {
            self.map.insert(
                parent.address,
                Region::new(parent.address, child.address - parent.address, parent.kind),
            );
            self.map.insert(child.address, child);
        } else {
            self.map.insert(parent.address, child);
        }

        self.merge_neighbors(child.address);
        Ok(())
    }

    /// Fuses the region starting at `addr` with contiguous equal-kind
    /// neighbors. At most one merge happens on each side.
    pub fn merge_neighbors(&mut self, addr: u32) {
        let Some(mut reg) = self.map.get(&addr).copied() else {
            return;
        };

        if let Some(prev) = self.prev_of(reg.address).copied() {
            if prev.kind == reg.kind && prev.end_address() == reg.address {
                self.map.remove(&reg.address);
                let merged = self
                    .map
                    .get_mut(&prev.address)
                    .expect("predecessor vanished during merge");
                merged.size += reg.size;
                reg = *merged;
            }
        }

        if let Some(next) = self.next_of(reg.address).copied() {
            if next.kind == reg.kind && reg.end_address() == next.address {
                self.map.remove(&next.address);
                let merged = self
                    .map
                    .get_mut(&reg.address)
                    .expect("region vanished during merge");
                merged.size += next.size;
            }
        }
    }

    /// Iterates regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.map.values()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the map holds no regions.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown_map() -> RegionMap {
        let mut map = RegionMap::new();
        map.add(Region::new(0x10000, 0x1000, RegionKind::Unknown));
        map
    }

    #[test]
    fn get_at_boundaries() {
        let map = unknown_map();
        assert!(map.get_at(0xffff).is_none());
        assert_eq!(map.get_at(0x10000).unwrap().address, 0x10000);
        assert_eq!(map.get_at(0x10fff).unwrap().address, 0x10000);
        assert!(map.get_at(0x11000).is_none());
    }

    #[test]
    fn insert_splits_three_ways() {
        let mut map = unknown_map();
        map.insert(Region::new(0x10100, 0x50, RegionKind::Code))
            .unwrap();

        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(
            regions,
            vec![
                Region::new(0x10000, 0x100, RegionKind::Unknown),
                Region::new(0x10100, 0x50, RegionKind::Code),
                Region::new(0x10150, 0xeb0, RegionKind::Unknown),
            ]
        );
    }

    #[test]
    fn insert_at_parent_start_keeps_two_regions() {
        let mut map = unknown_map();
        map.insert(Region::new(0x10000, 0x80, RegionKind::Code))
            .unwrap();

        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(
            regions,
            vec![
                Region::new(0x10000, 0x80, RegionKind::Code),
                Region::new(0x10080, 0xf80, RegionKind::Unknown),
            ]
        );
    }

    #[test]
    fn insert_covering_whole_parent_replaces_it() {
        let mut map = unknown_map();
        map.insert(Region::new(0x10000, 0x1000, RegionKind::Data))
            .unwrap();
        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(regions, vec![Region::new(0x10000, 0x1000, RegionKind::Data)]);
    }

    #[test]
    fn insert_past_parent_end_is_rejected() {
        let mut map = unknown_map();
        let err = map
            .insert(Region::new(0x10f00, 0x200, RegionKind::Code))
            .unwrap_err();
        assert!(matches!(err, Error::RegionOutOfBounds { .. }));
    }

    #[test]
    fn insert_outside_any_region_is_rejected() {
        let mut map = unknown_map();
        let err = map
            .insert(Region::new(0x20000, 0x10, RegionKind::Code))
            .unwrap_err();
        assert_eq!(err, Error::UnmappedRegion(0x20000));
    }

    #[test]
    fn insert_empty_region_is_rejected() {
        let mut map = unknown_map();
        let err = map
            .insert(Region::new(0x10000, 0, RegionKind::Code))
            .unwrap_err();
        assert_eq!(err, Error::EmptyRegion(0x10000));
    }

    #[test]
    fn contiguous_equal_kinds_merge() {
        let mut map = RegionMap::new();
        map.add(Region::new(0x10000, 0x100, RegionKind::Code));
        map.add(Region::new(0x10100, 0x100, RegionKind::Code));
        map.merge_neighbors(0x10100);

        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(regions, vec![Region::new(0x10000, 0x200, RegionKind::Code)]);
    }

    #[test]
    fn merge_works_on_both_sides() {
        let mut map = unknown_map();
        map.insert(Region::new(0x10100, 0x100, RegionKind::Code))
            .unwrap();
        map.insert(Region::new(0x10300, 0x100, RegionKind::Code))
            .unwrap();
        // Typing the gap as code must collapse all three into one region.
        map.insert(Region::new(0x10200, 0x100, RegionKind::Code))
            .unwrap();

        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(
            regions,
            vec![
                Region::new(0x10000, 0x100, RegionKind::Unknown),
                Region::new(0x10100, 0x300, RegionKind::Code),
                Region::new(0x10400, 0xc00, RegionKind::Unknown),
            ]
        );
    }

    #[test]
    fn insert_same_kind_as_parent_is_a_no_op_after_merge() {
        let mut map = unknown_map();
        map.insert(Region::new(0x10200, 0x40, RegionKind::Unknown))
            .unwrap();
        let regions: Vec<Region> = map.iter().copied().collect();
        assert_eq!(
            regions,
            vec![Region::new(0x10000, 0x1000, RegionKind::Unknown)]
        );
    }
}
