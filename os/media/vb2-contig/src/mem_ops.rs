//! The [`MemOps`] implementation for physically contiguous buffers.

use crate::buffer::{Backing, ContigBuffer, PlaneLayout, UserBinding};
use crate::mmap::{MapError, active_mapping_count, map_into_process};
use crate::pmem::{AllocError, ContiguousAllocator, mem_allocate, mem_free};
use crate::shmem::{Descriptor, SharedMemoryResolver};
use crate::vb2::{AllocContext, MemOps, MemOpsError};
use crate::vma::{PageRemapper, VmArea};
use vb2_addresses::{Size4K, VirtualAddress, checked_align_up};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("user pointer {0} is not a shared memory descriptor")]
    InvalidDescriptor(VirtualAddress),
    #[error("shared memory descriptor {descriptor} could not be resolved")]
    Resolve {
        descriptor: Descriptor,
        #[source]
        source: crate::shmem::ResolveError,
    },
    #[error("offset {offset:#x} overflows the shared region")]
    OffsetOverflow { offset: u64 },
}

impl From<AllocError> for MemOpsError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory { .. } => Self::NoMemory,
            AllocError::ZeroSize => Self::InvalidArgument,
        }
    }
}

impl From<MapError> for MemOpsError {
    fn from(_: MapError) -> Self {
        Self::MapFailed
    }
}

/// Memory operations backed by a contiguous allocator and a shared-memory
/// resolver.
///
/// This is a plain value: each queue is bound to the instance it is given,
/// so queues with different allocators can coexist.
#[derive(Debug, Default)]
pub struct ContigMemOps<A, R> {
    allocator: A,
    resolver: R,
}

impl<A, R> ContigMemOps<A, R>
where
    A: ContiguousAllocator,
    R: SharedMemoryResolver,
{
    #[must_use]
    pub const fn new(allocator: A, resolver: R) -> Self {
        Self {
            allocator,
            resolver,
        }
    }

    #[must_use]
    pub const fn allocator(&self) -> &A {
        &self.allocator
    }

    #[must_use]
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Allocate a driver-owned buffer of `size` bytes, rounded up to whole pages.
    ///
    /// # Errors
    /// [`AllocError`] if `size` is zero or the allocator is exhausted. Nothing
    /// is left allocated in that case.
    pub fn allocate(
        &self,
        alloc_ctx: &AllocContext,
        size: u64,
    ) -> Result<ContigBuffer<R::File>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let size = checked_align_up::<Size4K>(size).ok_or(AllocError::OutOfMemory { size })?;
        let phys = mem_allocate(&self.allocator, size).inspect_err(|_| {
            log::error!("contiguous memory allocation of {size:#x} bytes failed");
        })?;

        log::debug!("allocated {size:#x} bytes at {phys}");
        Ok(ContigBuffer::contiguous(size, phys, alloc_ctx.clone()))
    }

    /// Resolve the shared-memory file behind a user-pointer buffer.
    ///
    /// A buffer that is already bound is left as it is. On success the
    /// physical address is the resolved base plus `addr_offset`, and `layout`
    /// is recorded.
    ///
    /// # Errors
    /// [`BindError`] if the descriptor cannot be resolved; the buffer stays
    /// unbound then.
    ///
    /// # Panics
    /// On a corrupted handle.
    pub fn bind_user_memory(
        &self,
        buf: &mut ContigBuffer<R::File>,
        layout: PlaneLayout,
        addr_offset: u64,
    ) -> Result<(), BindError> {
        buf.validate();
        if buf.is_bound() {
            return Ok(());
        }

        // driver-allocated buffers are always bound
        let Backing::UserPtr { user_ptr, .. } = *buf.backing() else {
            return Ok(());
        };
        let descriptor = Descriptor::try_from(user_ptr.as_u64())
            .map_err(|_| BindError::InvalidDescriptor(user_ptr))?;

        let region = self.resolver.resolve(descriptor).map_err(|source| {
            log::error!("shared memory fd {descriptor} error {}", source.0);
            BindError::Resolve { descriptor, source }
        })?;

        let Some(phys) = region.phys_base.checked_add(addr_offset) else {
            self.resolver.release(region.file);
            return Err(BindError::OffsetOverflow {
                offset: addr_offset,
            });
        };

        if let Backing::UserPtr { binding, .. } = buf.backing_mut() {
            *binding = Some(UserBinding::new(
                phys,
                region.kernel_alias,
                region.len,
                region.file,
            ));
        }
        buf.set_plane_layout(layout);

        log::debug!("bound user buffer fd {descriptor} at {phys} ({:#x} bytes)", region.len);
        Ok(())
    }

    /// Undo [`bind_user_memory`](Self::bind_user_memory).
    ///
    /// Drops the file reference and returns the buffer to the unbound state
    /// with a size of zero. Calling it on an unbound buffer does nothing.
    ///
    /// # Panics
    /// On a corrupted handle.
    pub fn release_user_memory(&self, buf: &mut ContigBuffer<R::File>) {
        buf.validate();
        let binding = match buf.backing_mut() {
            Backing::UserPtr { binding, .. } => binding.take(),
            Backing::Contiguous { phys } => {
                log::warn!("user memory release on driver-allocated buffer {phys}");
                return;
            }
        };

        if let Some(binding) = binding {
            log::debug!("releasing user buffer at {}", binding.phys());
            self.resolver.release(binding.into_file());
            buf.set_size(0);
        }
    }
}

impl<A, R> MemOps for ContigMemOps<A, R>
where
    A: ContiguousAllocator,
    R: SharedMemoryResolver,
{
    type Buffer = ContigBuffer<R::File>;
    type Cookie = ContigBuffer<R::File>;

    fn alloc(&self, alloc_ctx: &AllocContext, size: u64) -> Result<Self::Buffer, MemOpsError> {
        Ok(self.allocate(alloc_ctx, size)?)
    }

    fn put(&self, mut buf: Self::Buffer) {
        buf.validate();
        let phys = match buf.backing() {
            Backing::Contiguous { phys } => Some(*phys),
            Backing::UserPtr { .. } => None,
        };

        match phys {
            Some(phys) => {
                log::debug!("freeing {:#x} bytes at {phys}", buf.size());
                mem_free(&self.allocator, phys);
            }
            None => self.release_user_memory(&mut buf),
        }
    }

    fn get_userptr(
        &self,
        alloc_ctx: &AllocContext,
        vaddr: VirtualAddress,
        size: u64,
        write: bool,
    ) -> Result<Self::Buffer, MemOpsError> {
        Ok(ContigBuffer::user_ptr(vaddr, size, write, alloc_ctx.clone()))
    }

    fn put_userptr(&self, mut buf: Self::Buffer) {
        buf.validate();
        if buf.binding().is_some() {
            log::warn!("user pointer buffer put while still bound, releasing");
            self.release_user_memory(&mut buf);
        }
    }

    fn vaddr(&self, buf: &Self::Buffer) -> Option<VirtualAddress> {
        buf.vaddr()
    }

    fn cookie<'b>(&self, buf: &'b Self::Buffer) -> &'b Self::Cookie {
        buf
    }

    fn num_users(&self, buf: &Self::Buffer) -> u32 {
        active_mapping_count(buf)
    }

    fn mmap(
        &self,
        buf: &mut Self::Buffer,
        vma: &mut VmArea,
        mm: &mut dyn PageRemapper,
    ) -> Result<(), MemOpsError> {
        Ok(map_into_process(buf, vma, mm)?)
    }
}
