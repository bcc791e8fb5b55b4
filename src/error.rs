//! Error types for rewiring operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::region::device::{CommandKind, PageId};

/// Result type alias using [`RewireError`].
pub type Result<T> = std::result::Result<T, RewireError>;

/// Errors that can occur while reserving, remapping or packing pages.
///
/// OS and device failures are fatal to the conversion in progress: a region
/// that returned one of them must be discarded, not retried.
#[derive(Debug, Error)]
pub enum RewireError {
    // Address space
    #[error("reserving {bytes} bytes of address space failed: {source}")]
    Reserve { bytes: usize, source: io::Error },

    #[error("remapping virtual slot {slot} failed: {source}")]
    Remap { slot: usize, source: io::Error },

    #[error("mapping {bytes} bytes of the rewiring device failed: {source}")]
    MapDevice { bytes: usize, source: io::Error },

    // In-process backing store
    #[error("backing store setup failed: {0}")]
    Backing(#[source] io::Error),

    #[error("backing store exhausted: requested {requested} bytes, capacity {capacity}")]
    BackingExhausted { requested: u64, capacity: u64 },

    // Kernel-resident allocator
    #[error("opening rewiring device {path:?} failed: {source}")]
    DeviceOpen { path: PathBuf, source: io::Error },

    #[error("device command {command:?} failed: {source}")]
    Device {
        command: CommandKind,
        source: io::Error,
    },

    #[error("device returned reserved page id {id:#010x}")]
    InvalidPageId { id: PageId },

    // Caller misuse
    #[error("slot {slot} out of range for region of {len} pages")]
    SlotOutOfRange { slot: usize, len: usize },

    #[error("address {addr:#x} is not a page of this region")]
    NotAPage { addr: usize },

    #[error("logical page {page} squeezed twice in one run")]
    DuplicateLogicalPage { page: u8 },
}

impl RewireError {
    /// Wrap the current `errno` for a failed remap of `slot`.
    pub(crate) fn remap(slot: usize) -> Self {
        RewireError::Remap {
            slot,
            source: io::Error::last_os_error(),
        }
    }
}
