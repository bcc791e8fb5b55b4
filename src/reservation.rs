//! Address-space reservations.
//!
//! A [`Reservation`] maps `/dev/zero` read-only and shared, which pins a
//! stable virtual range without committing memory. Rewiring later installs
//! writable mappings on top of individual pages; until then every page reads
//! as zeros. Dropping the reservation unmaps the whole range, including any
//! pages rewired into it.

use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use crate::error::{Result, RewireError};

const DEV_ZERO: &str = "/dev/zero";

/// An owned, read-only virtual address range.
///
/// Zero-length reservations map nothing. Reassigning a reservation drops the
/// old range.
#[derive(Debug, Default)]
pub struct Reservation {
    map: Option<Mmap>,
}

impl Reservation {
    /// An empty reservation.
    pub const fn empty() -> Self {
        Self { map: None }
    }

    /// Reserve `bytes` bytes of address space.
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Ok(Self::empty());
        }
        let zero = File::open(DEV_ZERO).map_err(|source| RewireError::Reserve { bytes, source })?;
        // SAFETY: /dev/zero cannot be truncated underneath the mapping.
        let map = unsafe { MmapOptions::new().len(bytes).map(&zero) }
            .map_err(|source| RewireError::Reserve { bytes, source })?;
        Ok(Self { map: Some(map) })
    }

    /// Start of the range, null for an empty reservation.
    pub fn as_ptr(&self) -> *mut u8 {
        match &self.map {
            Some(map) => map.as_ptr() as *mut u8,
            None => std::ptr::null_mut(),
        }
    }

    /// Reserved length in bytes.
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::PAGE_SIZE;

    #[test]
    fn test_reserve_reads_zero() {
        let r = Reservation::new(4 * PAGE_SIZE).unwrap();
        assert_eq!(r.len(), 4 * PAGE_SIZE);
        assert!(!r.as_ptr().is_null());
        let bytes = unsafe { std::slice::from_raw_parts(r.as_ptr(), r.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let r = Reservation::new(0).unwrap();
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
        assert!(r.as_ptr().is_null());
        drop(r);
    }

    /// True if every page of `ptr..ptr + len` is mapped in this process.
    fn is_mapped(ptr: *mut u8, len: usize) -> bool {
        let mut residency = vec![0u8; len.div_ceil(PAGE_SIZE)];
        // SAFETY: mincore only inspects the page tables; residency has one
        // byte per page.
        let ret = unsafe { libc::mincore(ptr.cast(), len, residency.as_mut_ptr()) };
        if ret == 0 {
            return true;
        }
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ENOMEM)
        );
        false
    }

    // Sizes are large and odd so no other mapping made meanwhile by a
    // concurrent test covers the whole released range.
    const BIG: usize = 3001 * PAGE_SIZE;

    #[test]
    fn test_drop_releases_range() {
        for _ in 0..64 {
            let r = Reservation::new(BIG).unwrap();
            let (ptr, len) = (r.as_ptr(), r.len());
            assert!(is_mapped(ptr, len));
            drop(r);
            assert!(!is_mapped(ptr, len));
        }
        let r = Reservation::new(BIG).unwrap();
        assert_eq!(r.len(), BIG);
    }

    #[test]
    fn test_reassignment_releases_old_range() {
        let mut r = Reservation::new(BIG).unwrap();
        let (old_ptr, old_len) = (r.as_ptr(), r.len());
        r = Reservation::new(BIG + PAGE_SIZE).unwrap();
        assert!(!is_mapped(old_ptr, old_len));
        assert_eq!(r.len(), BIG + PAGE_SIZE);

        let (ptr, len) = (r.as_ptr(), r.len());
        r = Reservation::empty();
        assert!(r.is_empty());
        assert!(!is_mapped(ptr, len));
    }
}
