//! # Mapping Regions
//!
//! The address-space side of `mmap`: a [`VmArea`] is one process's view of a
//! mapped buffer. The address-space subsystem owns it and notifies the
//! installed [`VmOperations`] whenever a view is duplicated (e.g. `fork`) or
//! torn down. Page-table programming is delegated to a [`PageRemapper`] for
//! the owning address space.
//!
//! ## Attributes
//!
//! | Field | Set by | Meaning |
//! |-------|--------|---------|
//! | `page_prot` | mapper | Cache policy and access bits for the leaf PTEs. |
//! | `flags` | mapper | Region behaviour, e.g. [`VmFlags::dont_expand`]. |
//! | `vm_ops` | mapper | Open/close notification table. |
//! | `private_data` | mapper | Opaque per-region context for `vm_ops`. |

use alloc::sync::Arc;
use bitfield_struct::bitfield;
use core::any::Any;
use core::fmt;
use vb2_addresses::VirtualAddress;

/// Protection bits applied to the pages of a region.
///
/// Mirrors the low attribute bits of a leaf page-table entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageProtection {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User accessible (bit 2).
    pub user: bool,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    ///
    /// Set for memory the CPU must not cache, such as buffers written by a
    /// DMA master behind the CPU's back.
    pub cache_disable: bool,
    #[bits(58)]
    __: u64,
    /// No-execute (bit 63).
    pub no_execute: bool,
}

impl PageProtection {
    /// Typical protection for a shared read/write user mapping.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_no_execute(true)
    }

    /// Same protection with CPU caching disabled.
    #[must_use]
    pub const fn noncached(self) -> Self {
        self.with_cache_disable(true).with_write_through(false)
    }

    #[must_use]
    pub const fn is_noncached(self) -> bool {
        self.cache_disable()
    }
}

/// Behaviour flags of a region.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct VmFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub shared: bool,
    /// Region maps I/O or raw PFNs and has no `struct page` backing.
    pub io: bool,
    /// The region must not grow via `mremap`.
    pub dont_expand: bool,
    #[bits(26)]
    __: u32,
}

/// Open/close notifications for a region.
///
/// `open` runs for every new view of the region (the initial mapping is
/// accounted by the mapper itself), `close` when a view goes away.
pub trait VmOperations: Sync {
    fn open(&self, vma: &VmArea);
    fn close(&self, vma: &VmArea);
}

/// Opaque per-region context.
pub type VmPrivate = Arc<dyn Any + Send + Sync>;

/// Error from the page-table programming step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemapError {
    #[error("out of memory while building page tables")]
    OutOfMemory,
    #[error("range {start}+{len:#x} is not inside the region")]
    OutOfRange { start: VirtualAddress, len: u64 },
    #[error("page-table update failed with error {0}")]
    Other(i32),
}

/// Page-table programming for one address space.
pub trait PageRemapper {
    /// Map `len` bytes at `start` to the physical pages beginning at frame `pfn`.
    ///
    /// # Errors
    /// When the mapping cannot be established; nothing is left mapped then.
    fn remap_pfn_range(
        &mut self,
        start: VirtualAddress,
        pfn: u64,
        len: u64,
        prot: PageProtection,
    ) -> Result<(), RemapError>;
}

/// One process's view of a mapped buffer.
pub struct VmArea {
    start: VirtualAddress,
    end: VirtualAddress,
    page_prot: PageProtection,
    flags: VmFlags,
    vm_ops: Option<&'static dyn VmOperations>,
    private_data: Option<VmPrivate>,
}

impl VmArea {
    /// A fresh, not yet populated region covering `[start, end)`.
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress, page_prot: PageProtection) -> Self {
        Self {
            start,
            end,
            page_prot,
            flags: VmFlags::new().with_read(true).with_write(true).with_shared(true),
            vm_ops: None,
            private_data: None,
        }
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Size of the region in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.start.distance_to(self.end)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn page_prot(&self) -> PageProtection {
        self.page_prot
    }

    pub const fn set_page_prot(&mut self, prot: PageProtection) {
        self.page_prot = prot;
    }

    #[must_use]
    pub const fn flags(&self) -> VmFlags {
        self.flags
    }

    pub const fn set_flags(&mut self, flags: VmFlags) {
        self.flags = flags;
    }

    #[must_use]
    pub fn vm_ops(&self) -> Option<&'static dyn VmOperations> {
        self.vm_ops
    }

    pub fn set_vm_ops(&mut self, ops: &'static dyn VmOperations) {
        self.vm_ops = Some(ops);
    }

    #[must_use]
    pub fn private_data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.private_data.as_deref()
    }

    pub fn set_private_data(&mut self, data: VmPrivate) {
        self.private_data = Some(data);
    }

    /// Notify the installed operations that a new view was created.
    pub fn open(&self) {
        if let Some(ops) = self.vm_ops {
            ops.open(self);
        }
    }

    /// Copy this region into another address space, as `fork` does.
    ///
    /// The copy shares operations and private data and is announced through
    /// [`VmOperations::open`].
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let copy = Self {
            start: self.start,
            end: self.end,
            page_prot: self.page_prot,
            flags: self.flags,
            vm_ops: self.vm_ops,
            private_data: self.private_data.clone(),
        };
        copy.open();
        copy
    }

    /// Tear the region down, notifying [`VmOperations::close`].
    pub fn close(self) {
        if let Some(ops) = self.vm_ops {
            ops.close(&self);
        }
    }
}

impl fmt::Debug for VmArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmArea")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("page_prot", &self.page_prot)
            .field("flags", &self.flags)
            .field("vm_ops", &self.vm_ops.is_some())
            .field("private_data", &self.private_data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicI32, Ordering};

    struct Counting;

    static BALANCE: AtomicI32 = AtomicI32::new(0);

    impl VmOperations for Counting {
        fn open(&self, _vma: &VmArea) {
            BALANCE.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self, _vma: &VmArea) {
            BALANCE.fetch_sub(1, Ordering::SeqCst);
        }
    }

    static COUNTING: Counting = Counting;

    fn area() -> VmArea {
        VmArea::new(
            VirtualAddress::new(0x4000_0000),
            VirtualAddress::new(0x4000_4000),
            PageProtection::user_rw(),
        )
    }

    #[test]
    fn length_follows_bounds() {
        let vma = area();
        assert_eq!(vma.len(), 0x4000);
        assert!(!vma.is_empty());
    }

    #[test]
    fn noncached_sets_cache_disable_only() {
        let prot = PageProtection::user_rw().noncached();
        assert!(prot.is_noncached());
        assert!(prot.writable());
        assert!(prot.user());
        assert!(!PageProtection::user_rw().is_noncached());
    }

    #[test]
    fn notifications_without_ops_are_ignored() {
        let vma = area();
        vma.open();
        let dup = vma.duplicate();
        dup.close();
        vma.close();
    }

    #[test]
    fn duplicate_and_close_notify_ops() {
        let mut vma = area();
        vma.set_vm_ops(&COUNTING);
        vma.set_private_data(Arc::new(7_u32));

        let dup = vma.duplicate();
        assert_eq!(BALANCE.load(Ordering::SeqCst), 1);
        assert_eq!(dup.private_data().and_then(|p| p.downcast_ref::<u32>()), Some(&7));

        dup.close();
        vma.close();
        assert_eq!(BALANCE.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn flags_round_trip_dont_expand() {
        let mut vma = area();
        assert!(!vma.flags().dont_expand());
        vma.set_flags(vma.flags().with_dont_expand(true));
        assert!(vma.flags().dont_expand());
        assert!(vma.flags().shared());
    }
}
