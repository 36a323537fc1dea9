//! Physically contiguous memory allocation.
//!
//! The platform allocator (a PMEM/EBI carveout, CMA, ...) is abstracted by
//! [`ContiguousAllocator`]. Buffer code never talks to it directly but goes
//! through [`mem_allocate`] / [`mem_free`], which pin the alignment to
//! [`CONTIG_ALIGN`] and turn the allocator's "no address" answer into an
//! [`AllocError`].

use vb2_addresses::{PageSize, PhysicalAddress, Size4K};

/// Alignment of every contiguous allocation made for a video buffer.
pub const CONTIG_ALIGN: u64 = Size4K::SIZE;

/// Source of physically contiguous memory ranges.
///
/// Implementations hand out ranges of at least `size` bytes whose start is a
/// multiple of `align`. `None` means the request cannot be satisfied; a valid
/// range never starts at physical address zero.
pub trait ContiguousAllocator {
    /// Reserve `size` contiguous bytes aligned to `align`.
    fn allocate_contiguous(&self, size: u64, align: u64) -> Option<PhysicalAddress>;

    /// Return a range previously obtained from [`allocate_contiguous`](Self::allocate_contiguous).
    ///
    /// Callers must free every range exactly once.
    fn free_contiguous(&self, phys: PhysicalAddress);
}

impl<A: ContiguousAllocator + ?Sized> ContiguousAllocator for &A {
    fn allocate_contiguous(&self, size: u64, align: u64) -> Option<PhysicalAddress> {
        (**self).allocate_contiguous(size, align)
    }

    fn free_contiguous(&self, phys: PhysicalAddress) {
        (**self).free_contiguous(phys);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("contiguous allocation of {size:#x} bytes failed")]
    OutOfMemory { size: u64 },
    #[error("zero-sized buffer requested")]
    ZeroSize,
}

/// Allocate `size` bytes of 4 KiB aligned contiguous memory.
///
/// There is no retry here; a failure is final for this request.
///
/// # Errors
/// [`AllocError::OutOfMemory`] if the allocator cannot satisfy the request.
/// A range starting at physical zero is freed again and counts as failure.
pub fn mem_allocate<A>(allocator: &A, size: u64) -> Result<PhysicalAddress, AllocError>
where
    A: ContiguousAllocator + ?Sized,
{
    let phys = match allocator.allocate_contiguous(size, CONTIG_ALIGN) {
        Some(pa) if pa.is_null() => {
            // zero is "no memory" to buffer code; give the range back
            log::warn!("allocator handed out a range at physical zero, returning it");
            allocator.free_contiguous(pa);
            return Err(AllocError::OutOfMemory { size });
        }
        Some(pa) => pa,
        None => return Err(AllocError::OutOfMemory { size }),
    };

    debug_assert!(
        phys.is_aligned::<Size4K>(),
        "allocator returned unaligned range {phys}"
    );
    Ok(phys)
}

/// Release a range obtained from [`mem_allocate`].
pub fn mem_free<A>(allocator: &A, phys: PhysicalAddress)
where
    A: ContiguousAllocator + ?Sized,
{
    allocator.free_contiguous(phys);
}
