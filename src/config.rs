//! Factory configuration.

use std::path::PathBuf;

/// Default device file of the kernel-resident page allocator.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/rewiring";

/// Default size of the in-process backing store. The memfd is sparse, so
/// only pages that are actually touched consume memory.
pub const DEFAULT_BACKING_BYTES: u64 = i64::MAX as u64;

/// Which rewiring implementation a factory hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Remap pages of a process-local memfd with `mmap(MAP_FIXED)`.
    #[default]
    InProcess,
    /// Delegate page bookkeeping to the rewiring kernel module.
    ModuleAssisted,
}

/// What to do when the kernel-resident allocator reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceErrorPolicy {
    /// Return the failure to the caller, which must discard the region.
    #[default]
    FailFast,
    /// Log the failure and carry on as if the call succeeded.
    LogAndContinue,
}

/// Configuration for creating a region factory.
#[derive(Debug, Clone)]
pub struct RewireConfig {
    /// Implementation selected once at factory construction.
    pub backend: Backend,
    /// Size in bytes of the in-process backing store.
    pub backing_bytes: u64,
    /// Device file used by the module-assisted backend.
    pub device_path: PathBuf,
    /// Handling of control-call failures.
    pub device_errors: DeviceErrorPolicy,
    /// Issue `MADV_WILLNEED` after every in-process remap.
    pub prefetch: bool,
}

impl Default for RewireConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            backing_bytes: DEFAULT_BACKING_BYTES,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            device_errors: DeviceErrorPolicy::default(),
            prefetch: true,
        }
    }
}

impl RewireConfig {
    /// Select the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the in-process backing store size.
    pub fn with_backing_bytes(mut self, bytes: u64) -> Self {
        self.backing_bytes = bytes;
        self
    }

    /// Set the device file of the kernel-resident allocator.
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Set the control-call failure policy.
    pub fn with_device_errors(mut self, policy: DeviceErrorPolicy) -> Self {
        self.device_errors = policy;
        self
    }

    /// Enable or disable the post-remap prefetch hint.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }
}
