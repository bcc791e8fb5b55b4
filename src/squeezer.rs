//! Page squeezing: packing logical child-pointer pages onto fewer physical pages.
//!
//! Every node prefix byte selects a logical page (`prefix >> 1`, so 128 logical
//! pages) whose child pointers occupy some of the 512 slots of a physical
//! page. Logical pages whose occupied slots don't collide can share one
//! physical page. The squeezer decides, greedily and in input order, which
//! logical page lands on which physical page:
//!
//! 1. First fit: the first opened physical page whose occupancy is disjoint
//!    from the requirement takes it.
//! 2. Rotation repair: otherwise, if the colliding slots moved one position up
//!    land on free slots, the page takes it with the collisions shifted. A
//!    collision on slot 511 is never repaired since it would wrap to slot 0.
//! 3. Otherwise a new physical page is opened, named after the logical page
//!    that opened it.
//!
//! There is no backtracking, so the result depends on the input order.

use crate::error::{Result, RewireError};
use crate::region::SlotMapping;
use crate::slots::SlotSet;

/// Number of logical pages addressable by a prefix byte.
pub const LOGICAL_PAGES: usize = 128;

/// Marks a logical page with no physical page assigned.
pub const UNMAPPED: u8 = 0xFF;

/// One physical page opened during a squeezer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListEntry {
    /// Physical page index, the logical page that opened it.
    pub physical: u8,
    /// Slots already claimed on this page.
    pub occupancy: SlotSet,
}

/// Greedy bin-packer for one node conversion.
#[derive(Debug, Clone)]
pub struct PageSqueezer {
    mapping: [u8; LOGICAL_PAGES],
    free_list: Vec<FreeListEntry>,
}

impl PageSqueezer {
    /// Create a squeezer with every logical page unmapped.
    pub fn new() -> Self {
        Self {
            mapping: [UNMAPPED; LOGICAL_PAGES],
            free_list: Vec::new(),
        }
    }

    /// Place the logical page of `prefix`, which needs the slots in `required`.
    ///
    /// Returns the physical page the logical page was assigned to. Feeding the
    /// same logical page twice in one run is rejected without changing state.
    pub fn squeeze(&mut self, prefix: u8, required: &SlotSet) -> Result<u8> {
        let page = prefix >> 1;
        if self.mapping[page as usize] != UNMAPPED {
            return Err(RewireError::DuplicateLogicalPage { page });
        }

        for entry in &mut self.free_list {
            if entry.occupancy.is_disjoint(required) {
                entry.occupancy |= *required;
                self.mapping[page as usize] = entry.physical;
                return Ok(entry.physical);
            }

            let overlaps = entry.occupancy & *required;
            if overlaps.contains(SlotSet::LAST) {
                continue;
            }
            let shifted = overlaps.rotate_left(1);
            let still_free = entry.occupancy | *required;
            if shifted.is_disjoint(&still_free) {
                entry.occupancy = still_free | shifted;
                self.mapping[page as usize] = entry.physical;
                return Ok(entry.physical);
            }
        }

        self.mapping[page as usize] = page;
        self.free_list.push(FreeListEntry {
            physical: page,
            occupancy: *required,
        });
        tracing::trace!(logical = page, opened = self.free_list.len(), "opened physical page");
        Ok(page)
    }

    /// Squeeze every `(prefix, required)` pair in order.
    pub fn squeeze_all<'a, I>(&mut self, input: I) -> Result<()>
    where
        I: IntoIterator<Item = (u8, &'a SlotSet)>,
    {
        for (prefix, required) in input {
            self.squeeze(prefix, required)?;
        }
        Ok(())
    }

    /// Number of physical pages opened so far.
    pub fn num_pages(&self) -> usize {
        self.free_list.len()
    }

    /// Finish the run and hand out the mapping.
    pub fn finish(self) -> SqueezedMapping {
        SqueezedMapping {
            mapping: self.mapping,
            pages: self.free_list,
        }
    }
}

impl Default for PageSqueezer {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a squeezer run: logical page to physical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqueezedMapping {
    mapping: [u8; LOGICAL_PAGES],
    pages: Vec<FreeListEntry>,
}

impl SqueezedMapping {
    /// Physical page of `logical`, or `None` if it was never squeezed.
    pub fn physical_of(&self, logical: u8) -> Option<u8> {
        match self.mapping.get(logical as usize) {
            Some(&UNMAPPED) | None => None,
            Some(&p) => Some(p),
        }
    }

    /// Number of distinct physical pages needed.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// The raw table, [`UNMAPPED`] for unassigned logical pages.
    pub fn raw(&self) -> &[u8; LOGICAL_PAGES] {
        &self.mapping
    }

    /// Final occupancy of every opened physical page, in opening order.
    pub fn occupancy(&self) -> &[FreeListEntry] {
        &self.pages
    }

    /// Mappings for [`RewiringRegion::init`](crate::RewiringRegion::init).
    ///
    /// Opened physical pages are ranked densely in opening order, so the
    /// result addresses physical slots `0..num_pages()` of the target region
    /// and logical pages map to virtual slots of the same index.
    pub fn slot_mappings(&self) -> Vec<SlotMapping> {
        let mut rank = [UNMAPPED; LOGICAL_PAGES];
        for (dense, entry) in self.pages.iter().enumerate() {
            rank[entry.physical as usize] = dense as u8;
        }
        self.mapping
            .iter()
            .enumerate()
            .filter(|(_, &p)| p != UNMAPPED)
            .map(|(logical, &p)| SlotMapping::new(logical, rank[p as usize] as usize))
            .collect()
    }
}
