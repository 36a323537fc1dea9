//! Recording fakes for the collaborators of the contiguous backend.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use vb2_addresses::{PhysicalAddress, VirtualAddress};
use vb2_contig::{
    ContiguousAllocator, Descriptor, PageProtection, PageRemapper, RemapError, ResolveError,
    ResolvedRegion, SharedMemoryResolver,
};

/// Hands out increasing addresses until `capacity` bytes are used up.
pub struct RecordingAllocator {
    next: Cell<u64>,
    end: u64,
    pub requests: RefCell<Vec<(u64, u64)>>,
    pub freed: RefCell<Vec<PhysicalAddress>>,
}

impl RecordingAllocator {
    #[must_use]
    pub fn new(base: u64, capacity: u64) -> Self {
        Self {
            next: Cell::new(base),
            end: base + capacity,
            requests: RefCell::default(),
            freed: RefCell::default(),
        }
    }

    #[must_use]
    pub fn exhausted() -> Self {
        Self::new(0x4000_0000, 0)
    }
}

impl ContiguousAllocator for RecordingAllocator {
    fn allocate_contiguous(&self, size: u64, align: u64) -> Option<PhysicalAddress> {
        self.requests.borrow_mut().push((size, align));
        let start = self.next.get().next_multiple_of(align);
        if start + size > self.end {
            return None;
        }
        self.next.set(start + size);
        Some(PhysicalAddress::new(start))
    }

    fn free_contiguous(&self, phys: PhysicalAddress) {
        self.freed.borrow_mut().push(phys);
    }
}

/// Reference to an open shared-memory file. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct PmemFile(pub Descriptor);

/// Resolves a fixed set of descriptors.
#[derive(Default)]
pub struct RecordingResolver {
    regions: Vec<(Descriptor, u64, u64)>,
    pub resolved: RefCell<Vec<Descriptor>>,
    pub released: RefCell<Vec<Descriptor>>,
}

impl RecordingResolver {
    #[must_use]
    pub fn with_region(mut self, descriptor: Descriptor, phys_base: u64, len: u64) -> Self {
        self.regions.push((descriptor, phys_base, len));
        self
    }
}

impl SharedMemoryResolver for RecordingResolver {
    type File = PmemFile;

    fn resolve(&self, descriptor: Descriptor) -> Result<ResolvedRegion<PmemFile>, ResolveError> {
        self.resolved.borrow_mut().push(descriptor);
        let &(_, phys_base, len) = self
            .regions
            .iter()
            .find(|(fd, ..)| *fd == descriptor)
            .ok_or(ResolveError(-9))?;
        Ok(ResolvedRegion {
            phys_base: PhysicalAddress::new(phys_base),
            kernel_alias: VirtualAddress::new(0xffff_8000_0000_0000 + phys_base),
            len,
            file: PmemFile(descriptor),
        })
    }

    fn release(&self, file: PmemFile) {
        self.released.borrow_mut().push(file.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapCall {
    pub start: VirtualAddress,
    pub pfn: u64,
    pub len: u64,
    pub prot: PageProtection,
}

/// Records page-table requests, optionally failing them.
#[derive(Default)]
pub struct RecordingRemapper {
    pub calls: Vec<RemapCall>,
    pub fail_with: Option<RemapError>,
}

impl RecordingRemapper {
    #[must_use]
    pub fn failing(error: RemapError) -> Self {
        Self {
            calls: Vec::new(),
            fail_with: Some(error),
        }
    }
}

impl PageRemapper for RecordingRemapper {
    fn remap_pfn_range(
        &mut self,
        start: VirtualAddress,
        pfn: u64,
        len: u64,
        prot: PageProtection,
    ) -> Result<(), RemapError> {
        self.calls.push(RemapCall {
            start,
            pfn,
            len,
            prot,
        });
        self.fail_with.map_or(Ok(()), Err)
    }
}
