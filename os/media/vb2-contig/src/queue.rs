//! Queue setup and the hardware-facing address lookup.

use crate::buffer::ContigBuffer;
use crate::mem_ops::ContigMemOps;
use crate::pmem::ContiguousAllocator;
use crate::shmem::SharedMemoryResolver;
use crate::vb2::{BufferType, IoModes, QueueError, QueueOps, Vb2Buffer, Vb2Queue, plane_cookie};
use vb2_addresses::PhysicalAddress;

/// Wire `q` to the contiguous backend `mem_ops`.
///
/// Resets the queue, records the driver callbacks and private data,
/// enables `mmap` and user-pointer I/O and runs the framework's own queue
/// initialisation. Must not race with other users of `q`.
///
/// # Errors
/// Whatever the framework initialisation rejects.
pub fn init_queue<'a, A, R, D>(
    q: &mut Vb2Queue<'a, ContigMemOps<A, R>, D>,
    buf_type: BufferType,
    ops: &'a dyn QueueOps<ContigBuffer<R::File>>,
    mem_ops: &'a ContigMemOps<A, R>,
    buf_struct_size: usize,
    drv_priv: D,
) -> Result<(), QueueError>
where
    A: ContiguousAllocator,
    R: SharedMemoryResolver,
{
    q.reset();
    q.mem_ops = Some(mem_ops);
    q.ops = Some(ops);
    q.drv_priv = Some(drv_priv);
    q.buf_type = Some(buf_type);
    q.io_modes = IoModes::new().with_mmap(true).with_userptr(true);
    q.io_flags = 0;
    q.buf_struct_size = buf_struct_size;
    q.init()
}

/// Physical address of plane `plane_no` of `vb`, for programming hardware.
///
/// # Panics
/// If the plane has no memory attached or the handle is corrupted; both
/// mean the caller broke the queue contract.
#[must_use]
pub fn physical_address_of<A, R>(
    mem_ops: &ContigMemOps<A, R>,
    vb: &Vb2Buffer<ContigBuffer<R::File>>,
    plane_no: usize,
) -> PhysicalAddress
where
    A: ContiguousAllocator,
    R: SharedMemoryResolver,
{
    let Some(mem) = plane_cookie(mem_ops, vb, plane_no) else {
        panic!("buffer {} plane {plane_no} has no memory", vb.index());
    };
    mem.validate();
    mem.phys_addr()
}
