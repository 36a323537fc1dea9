//! # Contiguous Buffer Handles
//!
//! A [`ContigBuffer`] is the backend-private state the buffer-queue framework
//! keeps per plane. Its memory comes from one of two places, recorded once at
//! creation in [`Backing`]:
//!
//! ```text
//!              ┌──────────────────────────┐
//!  alloc() ───►│ Backing::Contiguous      │ phys owned here, freed by put()
//!              └──────────────────────────┘
//!              ┌──────────────────────────┐
//!  get_userptr │ Backing::UserPtr         │ phys owned by the caller's
//!         ───► │   binding: None ─bind──► │ shared-memory file, never freed
//!              │   binding: Some(..) ◄─── │ here; release() drops the file
//!              └──────────────────────────┘
//! ```
//!
//! Mapping a handle into user space never creates or destroys it; it only
//! moves the shared [`MappingCount`] and records the mapped address.

use crate::vb2::AllocContext;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use vb2_addresses::{PhysicalAddress, VirtualAddress};

/// Sentinel stored in every live handle.
pub const MAGIC_CONTIG: u32 = 0x0733_ac64;

/// How the planes of a multi-planar image sit inside the buffer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferLayoutKind {
    #[default]
    Unspecified,
    /// Separate Y, Cb and Cr planes.
    Planar,
    /// Y plane followed by an interleaved `CbCr` plane (NV12/NV21).
    SemiPlanar,
    /// Single interleaved plane (YUYV, RGB, Bayer).
    Packed,
}

/// Plane geometry inside one contiguous buffer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PlaneLayout {
    /// Byte offset of the luma plane.
    pub y_offset: u32,
    /// Byte offset of the chroma plane(s).
    pub cbcr_offset: u32,
    pub kind: BufferLayoutKind,
}

impl PlaneLayout {
    #[must_use]
    pub const fn new(y_offset: u32, cbcr_offset: u32, kind: BufferLayoutKind) -> Self {
        Self {
            y_offset,
            cbcr_offset,
            kind,
        }
    }
}

/// Number of live user-space views of a buffer.
///
/// Shared between the handle and every region it is mapped into, so a late
/// close after the handle is gone still has a counter to decrement. The
/// value is a best-effort liveness signal for reclamation decisions; the
/// queue framework's own locking serialises everything else.
#[derive(Debug, Default)]
pub struct MappingCount(AtomicU32);

impl MappingCount {
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Account one more view; returns the new count.
    pub(crate) fn open(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Account one view fewer; returns the new count.
    ///
    /// Saturates at zero: a close without a matching open returns `None`
    /// and leaves the counter untouched.
    pub(crate) fn close(&self) -> Option<u32> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }
}

/// Caller-owned memory resolved through a shared-memory file.
#[derive(Debug)]
pub struct UserBinding<F> {
    phys: PhysicalAddress,
    kernel_alias: VirtualAddress,
    len: u64,
    file: F,
}

impl<F> UserBinding<F> {
    pub(crate) const fn new(
        phys: PhysicalAddress,
        kernel_alias: VirtualAddress,
        len: u64,
        file: F,
    ) -> Self {
        Self {
            phys,
            kernel_alias,
            len,
            file,
        }
    }

    /// Physical address of the buffer, offset already applied.
    #[must_use]
    pub const fn phys(&self) -> PhysicalAddress {
        self.phys
    }

    /// Kernel-side virtual alias of the shared region's start.
    #[must_use]
    pub const fn kernel_alias(&self) -> VirtualAddress {
        self.kernel_alias
    }

    /// Length of the shared region as reported by the resolver.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn file(&self) -> &F {
        &self.file
    }

    pub(crate) fn into_file(self) -> F {
        self.file
    }
}

/// Where a buffer's memory comes from. Fixed for the life of the handle.
#[derive(Debug)]
pub enum Backing<F> {
    /// Allocated by this backend; freed when the handle is put.
    Contiguous { phys: PhysicalAddress },
    /// Supplied by user space; never freed here.
    UserPtr {
        /// Raw value user space passed as the buffer pointer.
        user_ptr: VirtualAddress,
        writable: bool,
        binding: Option<UserBinding<F>>,
    },
}

/// Backend state for one buffer plane.
#[derive(Debug)]
pub struct ContigBuffer<F> {
    magic: u32,
    size: u64,
    vaddr: Option<VirtualAddress>,
    layout: PlaneLayout,
    backing: Backing<F>,
    mappings: Arc<MappingCount>,
    alloc_ctx: AllocContext,
}

impl<F> ContigBuffer<F> {
    pub(crate) fn contiguous(size: u64, phys: PhysicalAddress, alloc_ctx: AllocContext) -> Self {
        Self {
            magic: MAGIC_CONTIG,
            size,
            vaddr: None,
            layout: PlaneLayout::default(),
            backing: Backing::Contiguous { phys },
            mappings: Arc::default(),
            alloc_ctx,
        }
    }

    pub(crate) fn user_ptr(
        user_ptr: VirtualAddress,
        size: u64,
        writable: bool,
        alloc_ctx: AllocContext,
    ) -> Self {
        Self {
            magic: MAGIC_CONTIG,
            size,
            vaddr: Some(user_ptr),
            layout: PlaneLayout::default(),
            backing: Backing::UserPtr {
                user_ptr,
                writable,
                binding: None,
            },
            mappings: Arc::default(),
            alloc_ctx,
        }
    }

    /// Sanity check of the handle sentinel.
    ///
    /// # Panics
    /// On a corrupted handle. This is a broken caller contract, not a
    /// runtime condition.
    #[inline]
    #[track_caller]
    pub(crate) fn validate(&self) {
        if cfg!(any(debug_assertions, feature = "strict-magic")) && self.magic != MAGIC_CONTIG {
            magic_mismatch(self.magic);
        }
    }

    /// Size in bytes; page-rounded for driver-allocated buffers.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Physical start of the buffer, or zero while a user pointer is unbound.
    #[must_use]
    pub const fn phys_addr(&self) -> PhysicalAddress {
        match &self.backing {
            Backing::Contiguous { phys } => *phys,
            Backing::UserPtr {
                binding: Some(binding),
                ..
            } => binding.phys,
            Backing::UserPtr { binding: None, .. } => PhysicalAddress::zero(),
        }
    }

    /// Last mapped user address, or the raw user pointer before any mapping.
    #[must_use]
    pub const fn vaddr(&self) -> Option<VirtualAddress> {
        self.vaddr
    }

    #[must_use]
    pub const fn layout(&self) -> PlaneLayout {
        self.layout
    }

    #[must_use]
    pub const fn backing(&self) -> &Backing<F> {
        &self.backing
    }

    #[must_use]
    pub const fn is_user_ptr(&self) -> bool {
        matches!(self.backing, Backing::UserPtr { .. })
    }

    /// Whether the buffer has a physical range behind it.
    ///
    /// Driver-allocated buffers always do; a user-pointer buffer does once a
    /// binding is stored, whatever address it resolved to.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        match &self.backing {
            Backing::Contiguous { .. } => true,
            Backing::UserPtr { binding, .. } => binding.is_some(),
        }
    }

    #[must_use]
    pub const fn binding(&self) -> Option<&UserBinding<F>> {
        match &self.backing {
            Backing::UserPtr { binding, .. } => binding.as_ref(),
            Backing::Contiguous { .. } => None,
        }
    }

    #[must_use]
    pub const fn alloc_ctx(&self) -> &AllocContext {
        &self.alloc_ctx
    }

    /// Describe the plane geometry of an already backed buffer.
    ///
    /// No allocation or mapping happens here.
    pub fn set_plane_layout(&mut self, layout: PlaneLayout) {
        self.validate();
        self.layout = layout;
    }

    pub(crate) const fn set_vaddr(&mut self, vaddr: VirtualAddress) {
        self.vaddr = Some(vaddr);
    }

    pub(crate) const fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub(crate) const fn backing_mut(&mut self) -> &mut Backing<F> {
        &mut self.backing
    }

    pub(crate) fn mappings(&self) -> &Arc<MappingCount> {
        &self.mappings
    }

    #[cfg(test)]
    pub(crate) const fn corrupt_magic(&mut self) {
        self.magic = 0xdead_beef;
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn magic_mismatch(is: u32) -> ! {
    log::error!("magic mismatch: {is:#x} expected {MAGIC_CONTIG:#x}");
    panic!("magic mismatch: {is:#x} expected {MAGIC_CONTIG:#x}");
}
