//! Rewiring regions: virtual page ranges whose pages can be pointed at
//! different physical pages without copying.
//!
//! A region is created by a [`RegionFactory`], which owns the resource shared
//! by all of its regions (a memfd backing store or a handle to the rewiring
//! kernel module). [`RewiringRegion::init`] installs the initial
//! virtual-to-physical mapping once; [`RewiringRegion::rewire`] changes one
//! page afterwards.
//!
//! Regions are not synchronized. All calls on one region, and the squeezer run
//! preceding them, must come from a single writer. Readers of *other* regions
//! are unaffected, and a reader of a page being rewired sees either the old or
//! the new physical page.

pub mod device;
pub mod in_process;
pub mod module;

use crate::config::{Backend, RewireConfig};
use crate::error::{Result, RewireError};
use crate::reservation::Reservation;

pub use device::{DeviceHandle, PageId, PageIdDevice};
pub use in_process::{InProcessFactory, InProcessRegion};
pub use module::{ModuleAssistedFactory, ModuleAssistedRegion};

/// Size of one page, the unit of rewiring.
pub const PAGE_SIZE: usize = 4096;

/// Points one virtual slot of a region at one physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotMapping {
    pub virtual_slot: usize,
    pub physical_slot: usize,
}

impl SlotMapping {
    pub const fn new(virtual_slot: usize, physical_slot: usize) -> Self {
        Self {
            virtual_slot,
            physical_slot,
        }
    }
}

impl From<(usize, usize)> for SlotMapping {
    fn from((virtual_slot, physical_slot): (usize, usize)) -> Self {
        Self::new(virtual_slot, physical_slot)
    }
}

/// A reserved range of `pages` virtual pages.
///
/// Pages are addressed by slot index; addresses are only computed from the
/// base, never subtracted from each other.
#[derive(Debug)]
pub struct VirtualRegion {
    reservation: Reservation,
    pages: usize,
}

impl VirtualRegion {
    /// Reserve `pages` pages of address space.
    pub fn reserve(pages: usize) -> Result<Self> {
        let bytes = pages
            .checked_mul(PAGE_SIZE)
            .ok_or_else(|| RewireError::Reserve {
                bytes: usize::MAX,
                source: std::io::ErrorKind::InvalidInput.into(),
            })?;
        Ok(Self {
            reservation: Reservation::new(bytes)?,
            pages,
        })
    }

    /// First byte of the region, null if it has no pages.
    pub fn base(&self) -> *mut u8 {
        self.reservation.as_ptr()
    }

    /// Number of pages.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn len_bytes(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    /// Address of page `slot`.
    pub fn page_ptr(&self, slot: usize) -> Option<*mut u8> {
        if slot < self.pages {
            // SAFETY: slot is within the reservation.
            Some(unsafe { self.base().add(slot * PAGE_SIZE) })
        } else {
            None
        }
    }

    /// Slot whose page starts at `addr`.
    pub fn slot_of(&self, addr: *const u8) -> Option<usize> {
        let base = self.base() as usize;
        let offset = (addr as usize).checked_sub(base)?;
        if self.pages == 0 || offset % PAGE_SIZE != 0 {
            return None;
        }
        let slot = offset / PAGE_SIZE;
        (slot < self.pages).then_some(slot)
    }

    pub(crate) fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < self.pages {
            Ok(())
        } else {
            Err(RewireError::SlotOutOfRange {
                slot,
                len: self.pages,
            })
        }
    }

    pub(crate) fn check_mapping(&self, mapping: &SlotMapping) -> Result<()> {
        self.check_slot(mapping.virtual_slot)?;
        self.check_slot(mapping.physical_slot)
    }
}

/// The capability set shared by both rewiring implementations.
pub trait RewiringRegion {
    /// The virtual range managed by this region.
    fn region(&self) -> &VirtualRegion;

    /// Establish the initial mapping. Called once, when the region is first
    /// materialized. Virtual slots not listed read as zeros.
    fn init(&mut self, mappings: &[SlotMapping]) -> Result<()>;

    /// Point `virtual_slot` at `physical_slot`.
    fn rewire(&mut self, virtual_slot: usize, physical_slot: usize) -> Result<()>;

    /// [`rewire`](Self::rewire) the page starting at `addr`.
    fn rewire_addr(&mut self, addr: *const u8, physical_slot: usize) -> Result<()> {
        let slot = self
            .region()
            .slot_of(addr)
            .ok_or(RewireError::NotAPage { addr: addr as usize })?;
        self.rewire(slot, physical_slot)
    }

    /// Number of pages.
    fn len(&self) -> usize {
        self.region().pages()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hands out regions sharing one backing resource.
pub trait RegionFactory {
    type Region: RewiringRegion;

    /// Reserve a region of `pages` pages.
    fn create_region(&self, pages: usize) -> Result<Self::Region>;
}

/// A factory whose backend was picked from [`RewireConfig`].
pub enum AnyFactory {
    InProcess(InProcessFactory),
    ModuleAssisted(ModuleAssistedFactory),
}

impl AnyFactory {
    /// Build the factory for `config.backend`.
    pub fn open(config: &RewireConfig) -> Result<Self> {
        Ok(match config.backend {
            Backend::InProcess => AnyFactory::InProcess(InProcessFactory::new(config)?),
            Backend::ModuleAssisted => {
                AnyFactory::ModuleAssisted(ModuleAssistedFactory::open(config)?)
            }
        })
    }

    pub fn backend(&self) -> Backend {
        match self {
            AnyFactory::InProcess(_) => Backend::InProcess,
            AnyFactory::ModuleAssisted(_) => Backend::ModuleAssisted,
        }
    }
}

impl RegionFactory for AnyFactory {
    type Region = AnyRegion;

    fn create_region(&self, pages: usize) -> Result<AnyRegion> {
        Ok(match self {
            AnyFactory::InProcess(f) => AnyRegion::InProcess(f.create_region(pages)?),
            AnyFactory::ModuleAssisted(f) => AnyRegion::ModuleAssisted(f.create_region(pages)?),
        })
    }
}

/// A region created by an [`AnyFactory`].
pub enum AnyRegion {
    InProcess(InProcessRegion),
    ModuleAssisted(ModuleAssistedRegion),
}

impl RewiringRegion for AnyRegion {
    fn region(&self) -> &VirtualRegion {
        match self {
            AnyRegion::InProcess(r) => r.region(),
            AnyRegion::ModuleAssisted(r) => r.region(),
        }
    }

    fn init(&mut self, mappings: &[SlotMapping]) -> Result<()> {
        match self {
            AnyRegion::InProcess(r) => r.init(mappings),
            AnyRegion::ModuleAssisted(r) => r.init(mappings),
        }
    }

    fn rewire(&mut self, virtual_slot: usize, physical_slot: usize) -> Result<()> {
        match self {
            AnyRegion::InProcess(r) => r.rewire(virtual_slot, physical_slot),
            AnyRegion::ModuleAssisted(r) => r.rewire(virtual_slot, physical_slot),
        }
    }
}
