//! Rewiring through the kernel-resident page allocator.
//!
//! Each region remembers the page id backing each of its physical slots,
//! allocating one from the module the first time the slot is used. Virtual
//! slots that were never pointed anywhere show the factory's shared zero page.
//!
//! Page ids are never returned to the module, not even when a region is
//! dropped: the module has no release command.

use std::io;
use std::sync::Arc;

use smallvec::SmallVec;

use super::device::{is_reserved, CommandKind, DeviceHandle, PageId, PageIdDevice, PAGEID_UNASSIGNED};
use super::{RegionFactory, RewiringRegion, SlotMapping, VirtualRegion};
use crate::config::{DeviceErrorPolicy, RewireConfig};
use crate::error::{Result, RewireError};

/// Apply `policy` to the outcome of a control call.
fn settle(policy: DeviceErrorPolicy, command: CommandKind, outcome: io::Result<()>) -> Result<()> {
    match (outcome, policy) {
        (Ok(()), _) => Ok(()),
        (Err(source), DeviceErrorPolicy::FailFast) => Err(RewireError::Device { command, source }),
        (Err(source), DeviceErrorPolicy::LogAndContinue) => {
            tracing::warn!(?command, error = %source, "rewiring device command failed, continuing");
            Ok(())
        }
    }
}

/// Reject reserved ids coming back from `CREATE`.
fn check_ids(policy: DeviceErrorPolicy, ids: &[PageId]) -> Result<()> {
    let Some(&id) = ids.iter().find(|&&id| is_reserved(id)) else {
        return Ok(());
    };
    match policy {
        DeviceErrorPolicy::FailFast => Err(RewireError::InvalidPageId { id }),
        DeviceErrorPolicy::LogAndContinue => {
            tracing::warn!(id, "rewiring device returned a reserved page id, continuing");
            Ok(())
        }
    }
}

/// Factory for [`ModuleAssistedRegion`]s sharing one device handle and zero page.
pub struct ModuleAssistedFactory<D: PageIdDevice = DeviceHandle> {
    device: Arc<D>,
    zero_page: PageId,
    policy: DeviceErrorPolicy,
}

impl ModuleAssistedFactory<DeviceHandle> {
    /// Open `config.device_path` and allocate the zero page.
    pub fn open(config: &RewireConfig) -> Result<Self> {
        let device = DeviceHandle::open(&config.device_path)?;
        Self::with_device(device, config.device_errors)
    }
}

impl<D: PageIdDevice> ModuleAssistedFactory<D> {
    /// Use `device` as the allocator and allocate the zero page from it.
    pub fn with_device(device: D, policy: DeviceErrorPolicy) -> Result<Self> {
        let mut zero = [PAGEID_UNASSIGNED];
        settle(
            policy,
            CommandKind::CreatePageIds,
            device.create_page_ids(std::ptr::null_mut(), &mut zero),
        )?;
        check_ids(policy, &zero)?;
        tracing::debug!(zero_page = zero[0], ?policy, "opened rewiring device");
        Ok(Self {
            device: Arc::new(device),
            zero_page: zero[0],
            policy,
        })
    }

    /// Page id shown by never-assigned virtual slots.
    pub fn zero_page(&self) -> PageId {
        self.zero_page
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: PageIdDevice> RegionFactory for ModuleAssistedFactory<D> {
    type Region = ModuleAssistedRegion<D>;

    fn create_region(&self, pages: usize) -> Result<ModuleAssistedRegion<D>> {
        let region = VirtualRegion::reserve(pages)?;
        tracing::debug!(pages, "created module-assisted region");
        Ok(ModuleAssistedRegion {
            device: Arc::clone(&self.device),
            region,
            page_ids: vec![PAGEID_UNASSIGNED; pages],
            zero_page: self.zero_page,
            policy: self.policy,
        })
    }
}

/// A region whose physical pages are page ids of the kernel module.
pub struct ModuleAssistedRegion<D: PageIdDevice = DeviceHandle> {
    device: Arc<D>,
    region: VirtualRegion,
    /// Page id of each physical slot, [`PAGEID_UNASSIGNED`] until first use.
    page_ids: Vec<PageId>,
    zero_page: PageId,
    policy: DeviceErrorPolicy,
}

impl<D: PageIdDevice> ModuleAssistedRegion<D> {
    /// Page id of each physical slot.
    pub fn page_ids(&self) -> &[PageId] {
        &self.page_ids
    }

    fn create(&self, out: &mut [PageId]) -> Result<()> {
        settle(
            self.policy,
            CommandKind::CreatePageIds,
            self.device.create_page_ids(self.region.base(), out),
        )?;
        check_ids(self.policy, out)
    }

    fn sync(&self, start: usize, ids: &[PageId]) -> Result<()> {
        settle(
            self.policy,
            CommandKind::SetPageIds,
            self.device.set_page_ids(self.region.base(), start, ids),
        )
    }
}

impl<D: PageIdDevice> RewiringRegion for ModuleAssistedRegion<D> {
    fn region(&self) -> &VirtualRegion {
        &self.region
    }

    fn init(&mut self, mappings: &[SlotMapping]) -> Result<()> {
        for mapping in mappings {
            self.region.check_mapping(mapping)?;
        }
        let pages = self.region.pages();
        if pages == 0 {
            return Ok(());
        }

        // SAFETY: the window is exactly our own reservation.
        unsafe { self.device.map_window(self.region.base(), self.region.len_bytes()) }
            .map_err(|source| RewireError::MapDevice {
                bytes: self.region.len_bytes(),
                source,
            })?;

        // Distinct physical slots, in first-seen order.
        let mut seen = vec![false; pages];
        let mut distinct: SmallVec<[usize; 16]> = SmallVec::new();
        for mapping in mappings {
            if !seen[mapping.physical_slot] {
                seen[mapping.physical_slot] = true;
                distinct.push(mapping.physical_slot);
            }
        }

        let mut fresh = vec![PAGEID_UNASSIGNED; distinct.len()];
        self.create(&mut fresh)?;
        for (&slot, &id) in distinct.iter().zip(&fresh) {
            self.page_ids[slot] = id;
        }

        let mut all = vec![self.zero_page; pages];
        for mapping in mappings {
            all[mapping.virtual_slot] = self.page_ids[mapping.physical_slot];
        }
        self.sync(0, &all)?;
        tracing::debug!(
            pages,
            mapped = mappings.len(),
            allocated = distinct.len(),
            "initialized module-assisted region"
        );
        Ok(())
    }

    fn rewire(&mut self, virtual_slot: usize, physical_slot: usize) -> Result<()> {
        self.region.check_slot(virtual_slot)?;
        self.region.check_slot(physical_slot)?;
        if self.page_ids[physical_slot] == PAGEID_UNASSIGNED {
            let mut fresh = [PAGEID_UNASSIGNED];
            self.create(&mut fresh)?;
            self.page_ids[physical_slot] = fresh[0];
        }
        let id = self.page_ids[physical_slot];
        self.sync(virtual_slot, &[id])?;
        tracing::trace!(virtual_slot, physical_slot, id, "rewired page");
        Ok(())
    }
}
