//! Control-call protocol of the rewiring kernel module.
//!
//! The module owns physical pages and names them with 32-bit page ids. It is
//! driven through one ioctl on its device file, carrying a fixed [`Command`]
//! record: `CREATE` allocates fresh ids, `SET` installs ids as the mapping of a
//! page range of a region previously mapped from the device, `GET` reads that
//! mapping back.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::{Result, RewireError};

/// Identifier of a physical page owned by the kernel module.
pub type PageId = u32;

/// A slot whose physical page was never allocated.
pub const PAGEID_UNASSIGNED: PageId = 0xFFFF_FFFF;

/// Returned by the module for offsets outside a mapped region.
pub const PAGEID_OFFSET_INVALID: PageId = 0xFFFF_FFFE;

/// True for ids the module never hands out for a real page.
pub fn is_reserved(id: PageId) -> bool {
    id == PAGEID_UNASSIGNED || id == PAGEID_OFFSET_INVALID
}

/// Ioctl request number of the rewiring command.
///
/// The device header builds it as `_IOC(IOC_INOUT, 'k', 0, 1)`. `IOC_INOUT`
/// is already shifted into the direction field, so shifting it again drops it
/// off the 32-bit word and only size and type remain.
pub const REWIRE_CMD: libc::c_ulong = (1 << 16) | ((b'k' as libc::c_ulong) << 8);

/// Command kinds understood by the module.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    GetPageIds = 0,
    SetPageIds = 1,
    CreatePageIds = 2,
}

/// The record passed by pointer to [`REWIRE_CMD`]. Only the module reads it.
#[repr(C)]
#[derive(Debug)]
#[allow(dead_code)]
struct Command {
    kind: CommandKind,
    start: libc::c_ulong,
    len: libc::c_ulong,
    mapping_start: *mut c_void,
    payload: *mut c_void,
}

/// Operations of the kernel-resident page allocator.
///
/// Implemented by [`DeviceHandle`] for the real module; tests substitute an
/// in-memory allocator.
pub trait PageIdDevice {
    /// Fill `out` with freshly allocated page ids.
    fn create_page_ids(&self, mapping_start: *mut u8, out: &mut [PageId]) -> io::Result<()>;

    /// Read the ids currently installed at pages `start..start + out.len()` of
    /// the region mapped at `mapping_start`.
    fn get_page_ids(&self, mapping_start: *mut u8, start: usize, out: &mut [PageId])
        -> io::Result<()>;

    /// Install `ids` at pages `start..start + ids.len()` of the region mapped at
    /// `mapping_start`.
    fn set_page_ids(&self, mapping_start: *mut u8, start: usize, ids: &[PageId]) -> io::Result<()>;

    /// Map the device over `bytes` bytes at `addr` so that installed ids become
    /// visible there.
    ///
    /// # Safety
    /// `addr..addr + bytes` must be address space owned by the caller; any
    /// existing mapping there is replaced.
    unsafe fn map_window(&self, addr: *mut u8, bytes: usize) -> io::Result<()>;
}

/// An open handle on the rewiring device file.
#[derive(Debug)]
pub struct DeviceHandle {
    file: File,
}

impl DeviceHandle {
    /// Open the device file read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| RewireError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }

    fn send(&self, mut cmd: Command) -> io::Result<()> {
        // SAFETY: cmd and its payload outlive the call; the module reads or
        // writes exactly `len` ids through `payload`.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                REWIRE_CMD as _,
                &mut cmd as *mut Command,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl PageIdDevice for DeviceHandle {
    fn create_page_ids(&self, mapping_start: *mut u8, out: &mut [PageId]) -> io::Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.send(Command {
            kind: CommandKind::CreatePageIds,
            start: 0,
            len: out.len() as libc::c_ulong,
            mapping_start: mapping_start.cast(),
            payload: out.as_mut_ptr().cast(),
        })
    }

    fn get_page_ids(
        &self,
        mapping_start: *mut u8,
        start: usize,
        out: &mut [PageId],
    ) -> io::Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.send(Command {
            kind: CommandKind::GetPageIds,
            start: start as libc::c_ulong,
            len: out.len() as libc::c_ulong,
            mapping_start: mapping_start.cast(),
            payload: out.as_mut_ptr().cast(),
        })
    }

    fn set_page_ids(&self, mapping_start: *mut u8, start: usize, ids: &[PageId]) -> io::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.send(Command {
            kind: CommandKind::SetPageIds,
            start: start as libc::c_ulong,
            len: ids.len() as libc::c_ulong,
            mapping_start: mapping_start.cast(),
            // The module only reads SET payloads.
            payload: ids.as_ptr() as *mut c_void,
        })
    }

    unsafe fn map_window(&self, addr: *mut u8, bytes: usize) -> io::Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: the caller owns addr..addr + bytes.
        let res = unsafe {
            libc::mmap(
                addr.cast(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )
        };
        if res == libc::MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
