//! # Buffer-Queue Framework Boundary
//!
//! The pieces of the videobuf2-style queue framework this backend plugs
//! into: the [`MemOps`] contract a memory backend implements, the queue and
//! buffer bookkeeping ([`Vb2Queue`], [`Vb2Buffer`]) and the driver callback
//! table ([`QueueOps`]).
//!
//! The framework owns buffer slots and drives the backend; the ordering it
//! guarantees (allocation before use, `put` after everything else) is what
//! the backend relies on instead of locking.

use crate::vma::{PageRemapper, VmArea};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::any::Any;
use core::mem::size_of;
use vb2_addresses::VirtualAddress;

const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;

/// Opaque per-queue allocation context passed through to every buffer.
pub type AllocContext = Option<Arc<dyn Any + Send + Sync>>;

/// Failure codes a memory backend reports to the framework.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemOpsError {
    #[error("out of memory")]
    NoMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("mapping the buffer failed")]
    MapFailed,
}

impl MemOpsError {
    /// Negative errno as returned across the V4L2 ioctl boundary.
    #[must_use]
    pub const fn to_errno(self) -> i32 {
        match self {
            Self::NoMemory | Self::MapFailed => -ENOMEM,
            Self::InvalidArgument => -EINVAL,
        }
    }
}

/// The memory-backend contract.
///
/// `Buffer` is the backend's private per-plane state; the framework stores
/// it opaquely and hands it back on every call.
pub trait MemOps {
    type Buffer;
    /// What [`cookie`](Self::cookie) exposes to drivers.
    type Cookie;

    /// Allocate backend memory of at least `size` bytes.
    ///
    /// # Errors
    /// [`MemOpsError::NoMemory`] when no memory is available.
    fn alloc(&self, alloc_ctx: &AllocContext, size: u64) -> Result<Self::Buffer, MemOpsError>;

    /// Release a buffer created by [`alloc`](Self::alloc).
    fn put(&self, buf: Self::Buffer);

    /// Wrap user-supplied memory.
    ///
    /// # Errors
    /// [`MemOpsError::NoMemory`] when the wrapper cannot be created.
    fn get_userptr(
        &self,
        alloc_ctx: &AllocContext,
        vaddr: VirtualAddress,
        size: u64,
        write: bool,
    ) -> Result<Self::Buffer, MemOpsError>;

    /// Release a buffer created by [`get_userptr`](Self::get_userptr).
    fn put_userptr(&self, buf: Self::Buffer);

    /// CPU address of the buffer, if it has one.
    fn vaddr(&self, buf: &Self::Buffer) -> Option<VirtualAddress>;

    /// Driver-visible token for the buffer.
    fn cookie<'b>(&self, buf: &'b Self::Buffer) -> &'b Self::Cookie;

    /// Number of live user-space mappings.
    fn num_users(&self, buf: &Self::Buffer) -> u32;

    /// Map the buffer into `vma`, using `mm` to program page tables.
    ///
    /// # Errors
    /// [`MemOpsError::MapFailed`] if the mapping cannot be established.
    fn mmap(
        &self,
        buf: &mut Self::Buffer,
        vma: &mut VmArea,
        mm: &mut dyn PageRemapper,
    ) -> Result<(), MemOpsError>;
}

/// V4L2 buffer (queue) types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferType {
    VideoCapture = 1,
    VideoOutput = 2,
    VideoOverlay = 3,
    VideoCaptureMplane = 9,
    VideoOutputMplane = 10,
    Private = 0x80,
}

/// I/O methods a queue accepts from user space.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct IoModes {
    /// Driver-allocated buffers mapped with `mmap`.
    pub mmap: bool,
    /// Buffers supplied by user space.
    pub userptr: bool,
    /// `read()` emulation.
    pub read: bool,
    /// `write()` emulation.
    pub write: bool,
    #[bits(28)]
    __: u32,
}

impl IoModes {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.into_bits() == 0
    }
}

/// Buffer counts and plane sizes a driver asks for in `queue_setup`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueSetup {
    pub num_buffers: u32,
    pub plane_sizes: Vec<u64>,
}

/// Driver callbacks for a queue.
pub trait QueueOps<B> {
    /// Negotiate buffer count and plane sizes.
    fn queue_setup(&self, requested_buffers: u32) -> QueueSetup;

    /// Hand a filled-in buffer to the driver.
    fn buf_queue(&self, vb: &mut Vb2Buffer<B>);
}

/// One plane of a framework buffer.
#[derive(Debug)]
pub struct Vb2Plane<B> {
    mem_priv: Option<B>,
    length: u64,
}

impl<B> Vb2Plane<B> {
    #[must_use]
    pub const fn mem_priv(&self) -> Option<&B> {
        self.mem_priv.as_ref()
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }
}

/// Framework-side buffer with its planes.
#[derive(Debug)]
pub struct Vb2Buffer<B> {
    index: u32,
    planes: Vec<Vb2Plane<B>>,
}

impl<B> Vb2Buffer<B> {
    #[must_use]
    pub fn new(index: u32, num_planes: usize) -> Self {
        let planes = (0..num_planes)
            .map(|_| Vb2Plane {
                mem_priv: None,
                length: 0,
            })
            .collect();
        Self { index, planes }
    }

    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    #[must_use]
    pub fn plane(&self, plane_no: usize) -> Option<&Vb2Plane<B>> {
        self.planes.get(plane_no)
    }

    /// Store backend memory in `plane_no`, returning what was there before.
    ///
    /// # Errors
    /// Hands `mem_priv` back if the buffer has no such plane.
    pub fn attach(&mut self, plane_no: usize, mem_priv: B, length: u64) -> Result<Option<B>, B> {
        let Some(plane) = self.planes.get_mut(plane_no) else {
            return Err(mem_priv);
        };
        plane.length = length;
        Ok(plane.mem_priv.replace(mem_priv))
    }

    /// Take the backend memory out of `plane_no`.
    pub fn detach(&mut self, plane_no: usize) -> Option<B> {
        let plane = self.planes.get_mut(plane_no)?;
        plane.length = 0;
        plane.mem_priv.take()
    }

    pub fn mem_priv_mut(&mut self, plane_no: usize) -> Option<&mut B> {
        self.planes.get_mut(plane_no)?.mem_priv.as_mut()
    }
}

/// Driver-visible cookie of `plane_no`, if the plane has memory attached.
pub fn plane_cookie<'b, M: MemOps>(
    mem_ops: &M,
    vb: &'b Vb2Buffer<M::Buffer>,
    plane_no: usize,
) -> Option<&'b M::Cookie> {
    let mem_priv = vb.plane(plane_no)?.mem_priv()?;
    Some(mem_ops.cookie(mem_priv))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue has no buffer type")]
    MissingType,
    #[error("queue has no driver operations")]
    MissingOps,
    #[error("queue has no memory operations")]
    MissingMemOps,
    #[error("queue supports no I/O mode")]
    NoIoModes,
}

/// A buffer queue as seen by the framework.
pub struct Vb2Queue<'a, M: MemOps, D = ()> {
    pub(crate) buf_type: Option<BufferType>,
    pub(crate) io_modes: IoModes,
    pub(crate) io_flags: u32,
    pub(crate) buf_struct_size: usize,
    pub(crate) ops: Option<&'a dyn QueueOps<M::Buffer>>,
    pub(crate) mem_ops: Option<&'a M>,
    pub(crate) drv_priv: Option<D>,
    initialized: bool,
}

impl<M: MemOps, D> Default for Vb2Queue<'_, M, D> {
    fn default() -> Self {
        Self {
            buf_type: None,
            io_modes: IoModes::new(),
            io_flags: 0,
            buf_struct_size: 0,
            ops: None,
            mem_ops: None,
            drv_priv: None,
            initialized: false,
        }
    }
}

impl<'a, M: MemOps, D> Vb2Queue<'a, M, D> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue to its zeroed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Framework-side queue initialisation.
    ///
    /// # Errors
    /// If a mandatory field was not filled in before.
    pub fn init(&mut self) -> Result<(), QueueError> {
        self.initialized = false;
        if self.buf_type.is_none() {
            return Err(QueueError::MissingType);
        }
        if self.ops.is_none() {
            return Err(QueueError::MissingOps);
        }
        if self.mem_ops.is_none() {
            return Err(QueueError::MissingMemOps);
        }
        if self.io_modes.is_empty() {
            return Err(QueueError::NoIoModes);
        }
        if self.buf_struct_size == 0 {
            self.buf_struct_size = size_of::<Vb2Buffer<M::Buffer>>();
        }
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub const fn buf_type(&self) -> Option<BufferType> {
        self.buf_type
    }

    #[must_use]
    pub const fn io_modes(&self) -> IoModes {
        self.io_modes
    }

    #[must_use]
    pub const fn io_flags(&self) -> u32 {
        self.io_flags
    }

    #[must_use]
    pub const fn buf_struct_size(&self) -> usize {
        self.buf_struct_size
    }

    #[must_use]
    pub fn ops(&self) -> Option<&'a dyn QueueOps<M::Buffer>> {
        self.ops
    }

    #[must_use]
    pub const fn mem_ops(&self) -> Option<&'a M> {
        self.mem_ops
    }

    #[must_use]
    pub const fn drv_priv(&self) -> Option<&D> {
        self.drv_priv.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ContigBuffer;
    use crate::mem_ops::ContigMemOps;
    use crate::testing::{BumpAllocator, FileRef, OneFileResolver};

    type Ops = ContigMemOps<BumpAllocator, OneFileResolver>;

    struct Driver;

    impl QueueOps<ContigBuffer<FileRef>> for Driver {
        fn queue_setup(&self, requested: u32) -> QueueSetup {
            QueueSetup {
                num_buffers: requested,
                plane_sizes: alloc::vec![4096],
            }
        }

        fn buf_queue(&self, _vb: &mut Vb2Buffer<ContigBuffer<FileRef>>) {}
    }

    #[test]
    fn errno_values() {
        assert_eq!(MemOpsError::NoMemory.to_errno(), -12);
        assert_eq!(MemOpsError::InvalidArgument.to_errno(), -22);
        assert_eq!(MemOpsError::MapFailed.to_errno(), -12);
    }

    #[test]
    fn init_checks_mandatory_fields() {
        let ops = Ops::new(BumpAllocator::default(), OneFileResolver::default());
        let mut q: Vb2Queue<'_, Ops> = Vb2Queue::new();
        assert_eq!(q.init(), Err(QueueError::MissingType));

        q.buf_type = Some(BufferType::VideoCapture);
        assert_eq!(q.init(), Err(QueueError::MissingOps));

        q.ops = Some(&Driver);
        assert_eq!(q.init(), Err(QueueError::MissingMemOps));

        q.mem_ops = Some(&ops);
        assert_eq!(q.init(), Err(QueueError::NoIoModes));
        assert!(!q.is_initialized());

        q.io_modes = IoModes::new().with_read(true);
        assert_eq!(q.init(), Ok(()));
        assert!(q.is_initialized());
        assert_eq!(q.buf_struct_size(), size_of::<Vb2Buffer<ContigBuffer<FileRef>>>());
    }

    #[test]
    fn reset_forgets_everything() {
        let ops = Ops::new(BumpAllocator::default(), OneFileResolver::default());
        let mut q: Vb2Queue<'_, Ops, u8> = Vb2Queue::new();
        q.buf_type = Some(BufferType::VideoOutput);
        q.ops = Some(&Driver);
        q.mem_ops = Some(&ops);
        q.io_modes = IoModes::new().with_mmap(true);
        q.drv_priv = Some(3);
        q.init().unwrap();

        q.reset();
        assert!(!q.is_initialized());
        assert!(q.buf_type().is_none());
        assert!(q.ops().is_none());
        assert!(q.mem_ops().is_none());
        assert!(q.drv_priv().is_none());
        assert!(q.io_modes().is_empty());
    }

    #[test]
    fn planes_hold_one_handle_each() {
        let mut vb: Vb2Buffer<u32> = Vb2Buffer::new(5, 2);
        assert_eq!(vb.index(), 5);
        assert_eq!(vb.num_planes(), 2);
        assert!(vb.plane(0).unwrap().mem_priv().is_none());
        assert!(vb.plane(2).is_none());

        assert_eq!(vb.attach(1, 10, 4096), Ok(None));
        assert_eq!(vb.attach(1, 11, 8192), Ok(Some(10)));
        assert_eq!(vb.attach(2, 12, 4096), Err(12));
        assert_eq!(vb.plane(1).unwrap().length(), 8192);

        *vb.mem_priv_mut(1).unwrap() += 1;
        assert_eq!(vb.detach(1), Some(12));
        assert_eq!(vb.detach(1), None);
    }

    #[test]
    fn driver_sees_requested_buffers() {
        let setup = Driver.queue_setup(4);
        assert_eq!(setup.num_buffers, 4);
        assert_eq!(setup.plane_sizes, [4096]);
    }
}
