//! # Contiguous Memory Backend for Video Buffer Queues
//!
//! Supplies physically contiguous buffers to a videobuf2-style buffer queue
//! and maps them into user space for camera capture pipelines.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │        Buffer-queue framework (vb2)                   │
//! │    • owns buffer slots, calls the MemOps contract     │
//! └─────────────────┬─────────────────────────────────────┘
//!                   │ alloc / put / get_userptr / mmap ...
//! ┌─────────────────▼─────────────────────────────────────┐
//! │           ContigMemOps (mem_ops)                      │
//! │    • creates and destroys ContigBuffer handles        │
//! │    • binds user-pointer buffers to shared memory      │
//! └───────┬──────────────────┬──────────────────┬─────────┘
//!         │                  │                  │
//! ┌───────▼───────┐  ┌───────▼────────┐  ┌──────▼──────────┐
//! │ pmem          │  │ shmem          │  │ mmap            │
//! │ contiguous    │  │ shared-memory  │  │ non-cached user │
//! │ allocator     │  │ resolver       │  │ mappings, views │
//! └───────────────┘  └────────────────┘  └─────────────────┘
//! ```
//!
//! Downstream hardware code asks [`physical_address_of`] where a plane lives.
//!
//! ## Ownership
//!
//! The [`Backing`] of a [`ContigBuffer`] is fixed at creation:
//! driver-allocated memory is returned to the allocator by `put`, user
//! memory never is. Mapped regions share the buffer's [`MappingCount`]
//! instead of pointing at the buffer, so a region can be closed after the
//! buffer is gone.
//!
//! ## Example
//!
//! ```rust
//! use vb2_addresses::PhysicalAddress;
//! use vb2_contig::{CarveoutAllocator, ContigMemOps, MemOps, NoSharedMemory};
//!
//! let carveout = CarveoutAllocator::new(PhysicalAddress::new(0x8000_0000), 0x10_0000);
//! let ops = ContigMemOps::new(carveout, NoSharedMemory);
//!
//! let buf = ops.alloc(&None, 5000).unwrap();
//! assert_eq!(buf.size(), 8192);
//! assert_eq!(ops.num_users(&buf), 0);
//! ops.put(buf);
//! assert_eq!(ops.allocator().live_allocations(), 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod buffer;
pub mod carveout;
pub mod mem_ops;
pub mod mmap;
pub mod pmem;
pub mod queue;
pub mod shmem;
pub mod vb2;
pub mod vma;

#[cfg(test)]
mod testing;

pub use buffer::{
    Backing, BufferLayoutKind, ContigBuffer, MAGIC_CONTIG, MappingCount, PlaneLayout, UserBinding,
};
pub use carveout::CarveoutAllocator;
pub use mem_ops::{BindError, ContigMemOps};
pub use mmap::{CONTIG_VM_OPS, MapError, active_mapping_count, map_into_process};
pub use pmem::{AllocError, CONTIG_ALIGN, ContiguousAllocator};
pub use queue::{init_queue, physical_address_of};
pub use shmem::{Descriptor, NoSharedMemory, ResolveError, ResolvedRegion, SharedMemoryResolver};
pub use vb2::{
    AllocContext, BufferType, IoModes, MemOps, MemOpsError, QueueError, QueueOps, QueueSetup,
    Vb2Buffer, Vb2Plane, Vb2Queue, plane_cookie,
};
pub use vma::{PageProtection, PageRemapper, RemapError, VmArea, VmFlags, VmOperations};
