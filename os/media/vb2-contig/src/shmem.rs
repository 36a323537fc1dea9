//! Shared-memory (PMEM file) resolution for user-pointer buffers.
//!
//! A user-pointer buffer does not carry a real CPU pointer: user space passes
//! the descriptor of a shared-memory file in the pointer slot. Binding the
//! buffer asks a [`SharedMemoryResolver`] to turn that descriptor into the
//! physical range behind it, plus a file reference that keeps the range
//! alive until it is handed back through [`SharedMemoryResolver::release`].

use vb2_addresses::{PhysicalAddress, VirtualAddress};

/// Descriptor of a shared-memory file in the calling process.
pub type Descriptor = i32;

/// What a descriptor resolves to.
#[derive(Debug)]
pub struct ResolvedRegion<F> {
    /// Physical start of the shared region.
    pub phys_base: PhysicalAddress,
    /// Kernel-side virtual alias of the same region.
    pub kernel_alias: VirtualAddress,
    /// Length of the region in bytes.
    pub len: u64,
    /// Reference pinning the region; must be returned via `release`.
    pub file: F,
}

/// Error code reported by the shared-memory mechanism (negative errno style).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("shared memory lookup failed with error {0}")]
pub struct ResolveError(pub i32);

/// Looks up shared-memory files by descriptor.
pub trait SharedMemoryResolver {
    /// Reference to an open shared-memory file.
    type File;

    /// Resolve `descriptor` to its physical range.
    ///
    /// # Errors
    /// Whatever the underlying mechanism reports, e.g. a stale descriptor.
    fn resolve(&self, descriptor: Descriptor) -> Result<ResolvedRegion<Self::File>, ResolveError>;

    /// Drop the reference obtained from [`resolve`](Self::resolve).
    fn release(&self, file: Self::File);
}

impl<R: SharedMemoryResolver + ?Sized> SharedMemoryResolver for &R {
    type File = R::File;

    fn resolve(&self, descriptor: Descriptor) -> Result<ResolvedRegion<Self::File>, ResolveError> {
        (**self).resolve(descriptor)
    }

    fn release(&self, file: Self::File) {
        (**self).release(file);
    }
}

/// Resolver for platforms without shared-memory support.
///
/// Every lookup fails with `-ENODEV`; use it for queues that only offer
/// driver-allocated buffers.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoSharedMemory;

impl SharedMemoryResolver for NoSharedMemory {
    type File = core::convert::Infallible;

    fn resolve(&self, _descriptor: Descriptor) -> Result<ResolvedRegion<Self::File>, ResolveError> {
        Err(ResolveError(-19))
    }

    fn release(&self, file: Self::File) {
        match file {}
    }
}
