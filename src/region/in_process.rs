//! Rewiring by remapping pages of a process-local memfd.
//!
//! The factory creates one large, sparse memfd and bump-allocates disjoint
//! page ranges of it to its regions. Physical slot `p` of a region is file
//! page `region_offset + p`; rewiring maps that file page over the virtual
//! page with `mmap(MAP_FIXED | MAP_SHARED)`, which atomically replaces
//! whatever was mapped there before.

use std::fs::File;
use std::ops::Range;
use std::os::fd::{AsRawFd, FromRawFd};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{RegionFactory, RewiringRegion, SlotMapping, VirtualRegion, PAGE_SIZE};
use crate::config::RewireConfig;
use crate::error::{Result, RewireError};

const MEMFD_NAME: &[u8] = b"rewiring-backing\0";

fn create_backing(bytes: u64) -> Result<File> {
    // SAFETY: MEMFD_NAME is NUL-terminated.
    let fd = unsafe { libc::memfd_create(MEMFD_NAME.as_ptr().cast(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(RewireError::Backing(std::io::Error::last_os_error()));
    }
    // SAFETY: fd was just created and is owned by nobody else.
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(bytes).map_err(RewireError::Backing)?;
    Ok(file)
}

/// Factory for [`InProcessRegion`]s sharing one memfd backing store.
pub struct InProcessFactory {
    backing: Arc<File>,
    capacity: u64,
    /// Next free page of the backing store. Never moves backwards.
    cursor: Mutex<u64>,
    prefetch: bool,
}

impl InProcessFactory {
    /// Create the backing store described by `config`.
    pub fn new(config: &RewireConfig) -> Result<Self> {
        let backing = create_backing(config.backing_bytes)?;
        tracing::debug!(
            capacity = config.backing_bytes,
            prefetch = config.prefetch,
            "created in-process backing store"
        );
        Ok(Self {
            backing: Arc::new(backing),
            capacity: config.backing_bytes,
            cursor: Mutex::new(0),
            prefetch: config.prefetch,
        })
    }

    /// Backing store page the next region will start at.
    pub fn next_offset(&self) -> u64 {
        *self.cursor.lock()
    }
}

impl RegionFactory for InProcessFactory {
    type Region = InProcessRegion;

    fn create_region(&self, pages: usize) -> Result<InProcessRegion> {
        let mut cursor = self.cursor.lock();
        let offset = *cursor;
        let end = offset
            .checked_add(pages as u64)
            .filter(|&end| end.saturating_mul(PAGE_SIZE as u64) <= self.capacity)
            .ok_or(RewireError::BackingExhausted {
                requested: (pages as u64).saturating_mul(PAGE_SIZE as u64),
                capacity: self.capacity,
            })?;
        let region = VirtualRegion::reserve(pages)?;
        *cursor = end;
        tracing::debug!(offset, pages, "created in-process region");
        Ok(InProcessRegion {
            backing: Arc::clone(&self.backing),
            offset,
            region,
            prefetch: self.prefetch,
        })
    }
}

/// A region whose physical slots are a fixed page range of the backing store.
pub struct InProcessRegion {
    backing: Arc<File>,
    /// First backing store page owned by this region.
    offset: u64,
    region: VirtualRegion,
    prefetch: bool,
}

impl InProcessRegion {
    /// Byte range of the backing store owned by this region.
    pub fn backing_range(&self) -> Range<u64> {
        let start = self.offset * PAGE_SIZE as u64;
        start..start + self.region.len_bytes() as u64
    }

    fn remap(&self, virtual_slot: usize, physical_slot: usize) -> Result<()> {
        self.region.check_slot(virtual_slot)?;
        self.region.check_slot(physical_slot)?;
        let addr = self.region.base().wrapping_add(virtual_slot * PAGE_SIZE);
        let file_offset = (self.offset + physical_slot as u64) * PAGE_SIZE as u64;

        // SAFETY: addr is a page inside our own reservation, so MAP_FIXED only
        // replaces mappings this region owns.
        let res = unsafe {
            libc::mmap(
                addr.cast(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                self.backing.as_raw_fd(),
                file_offset as libc::off_t,
            )
        };
        if res == libc::MAP_FAILED {
            return Err(RewireError::remap(virtual_slot));
        }
        if self.prefetch {
            // SAFETY: res is the page just mapped. The hint's result is irrelevant.
            unsafe {
                libc::madvise(res, PAGE_SIZE, libc::MADV_WILLNEED);
            }
        }
        Ok(())
    }
}

impl RewiringRegion for InProcessRegion {
    fn region(&self) -> &VirtualRegion {
        &self.region
    }

    fn init(&mut self, mappings: &[SlotMapping]) -> Result<()> {
        for mapping in mappings {
            self.region.check_mapping(mapping)?;
        }
        for mapping in mappings {
            self.remap(mapping.virtual_slot, mapping.physical_slot)?;
        }
        tracing::debug!(
            offset = self.offset,
            pages = self.region.pages(),
            mapped = mappings.len(),
            "initialized in-process region"
        );
        Ok(())
    }

    fn rewire(&mut self, virtual_slot: usize, physical_slot: usize) -> Result<()> {
        self.remap(virtual_slot, physical_slot)?;
        tracing::trace!(virtual_slot, physical_slot, "rewired page");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> InProcessFactory {
        let config = RewireConfig::default().with_backing_bytes(1024 * PAGE_SIZE as u64);
        InProcessFactory::new(&config).unwrap()
    }

    unsafe fn write(region: &InProcessRegion, slot: usize, byte: u8) {
        let p = region.region().page_ptr(slot).unwrap();
        unsafe { std::ptr::write_bytes(p, byte, PAGE_SIZE) };
    }

    unsafe fn read(region: &InProcessRegion, slot: usize) -> u8 {
        let p = region.region().page_ptr(slot).unwrap();
        unsafe { std::ptr::read_volatile(p.add(PAGE_SIZE / 2)) }
    }

    #[test]
    fn test_init_aliases_shared_physical_page() {
        let f = factory();
        let mut r = f.create_region(4).unwrap();
        r.init(&[(0, 0).into(), (1, 0).into(), (2, 1).into()]).unwrap();
        unsafe {
            write(&r, 0, 0xAB);
            write(&r, 2, 0x11);
            assert_eq!(read(&r, 1), 0xAB);
            assert_eq!(read(&r, 2), 0x11);
            // Never mapped: still the zero reservation.
            assert_eq!(read(&r, 3), 0);
        }
    }

    #[test]
    fn test_rewire_moves_single_page() {
        let f = factory();
        let mut r = f.create_region(3).unwrap();
        r.init(&[(0, 0).into(), (1, 1).into()]).unwrap();
        unsafe {
            write(&r, 0, 1);
            write(&r, 1, 2);
        }
        r.rewire(2, 1).unwrap();
        r.rewire(0, 1).unwrap();
        unsafe {
            assert_eq!(read(&r, 0), 2);
            assert_eq!(read(&r, 2), 2);
        }
        // Data of physical slot 0 is still there.
        r.rewire(1, 0).unwrap();
        unsafe { assert_eq!(read(&r, 1), 1) };
    }

    #[test]
    fn test_rewire_is_idempotent() {
        let f = factory();
        let mut r = f.create_region(2).unwrap();
        r.init(&[(0, 0).into()]).unwrap();
        unsafe { write(&r, 0, 7) };
        r.rewire(1, 0).unwrap();
        r.rewire(1, 0).unwrap();
        unsafe {
            assert_eq!(read(&r, 1), 7);
            write(&r, 1, 9);
            assert_eq!(read(&r, 0), 9);
        }
    }

    #[test]
    fn test_regions_get_disjoint_backing() {
        let f = factory();
        let mut a = f.create_region(3).unwrap();
        let mut b = f.create_region(5).unwrap();
        let (ra, rb) = (a.backing_range(), b.backing_range());
        assert_eq!(ra, 0..3 * PAGE_SIZE as u64);
        assert!(ra.end <= rb.start);
        assert_eq!(f.next_offset(), 8);

        a.init(&[(0, 0).into()]).unwrap();
        b.init(&[(0, 0).into()]).unwrap();
        unsafe {
            write(&a, 0, 0x55);
            assert_eq!(read(&b, 0), 0);
        }
    }

    #[test]
    fn test_out_of_range_slots() {
        let f = factory();
        let mut r = f.create_region(2).unwrap();
        assert!(matches!(
            r.init(&[(0, 2).into()]),
            Err(RewireError::SlotOutOfRange { slot: 2, len: 2 })
        ));
        assert!(matches!(
            r.rewire(5, 0),
            Err(RewireError::SlotOutOfRange { slot: 5, len: 2 })
        ));
    }

    #[test]
    fn test_backing_exhausted() {
        let config = RewireConfig::default().with_backing_bytes(4 * PAGE_SIZE as u64);
        let f = InProcessFactory::new(&config).unwrap();
        f.create_region(3).unwrap();
        assert!(matches!(
            f.create_region(2),
            Err(RewireError::BackingExhausted { .. })
        ));
        // A failed request does not move the cursor.
        assert_eq!(f.next_offset(), 3);
        f.create_region(1).unwrap();
    }

    #[test]
    fn test_zero_length_region() {
        let f = factory();
        let mut r = f.create_region(0).unwrap();
        assert!(r.is_empty());
        r.init(&[]).unwrap();
        assert!(r.rewire(0, 0).is_err());
        assert_eq!(f.next_offset(), 0);
    }
}
