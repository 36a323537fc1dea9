//! Fake collaborators for the unit tests.

use crate::shmem::{Descriptor, ResolveError, ResolvedRegion, SharedMemoryResolver};
use crate::pmem::ContiguousAllocator;
use crate::vma::{PageProtection, PageRemapper, RemapError};
use std::cell::{Cell, RefCell};
use vb2_addresses::{PhysicalAddress, VirtualAddress};

pub struct BumpAllocator {
    next: Cell<u64>,
    pub freed: RefCell<Vec<PhysicalAddress>>,
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self {
            next: Cell::new(0x8000_0000),
            freed: RefCell::default(),
        }
    }
}

impl ContiguousAllocator for BumpAllocator {
    fn allocate_contiguous(&self, size: u64, _align: u64) -> Option<PhysicalAddress> {
        let pa = self.next.get();
        self.next.set(pa + size);
        Some(PhysicalAddress::new(pa))
    }

    fn free_contiguous(&self, phys: PhysicalAddress) {
        self.freed.borrow_mut().push(phys);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FileRef(pub Descriptor);

#[derive(Default)]
pub struct OneFileResolver {
    pub released: RefCell<Vec<Descriptor>>,
}

impl SharedMemoryResolver for OneFileResolver {
    type File = FileRef;

    fn resolve(&self, descriptor: Descriptor) -> Result<ResolvedRegion<FileRef>, ResolveError> {
        if descriptor != 7 {
            return Err(ResolveError(-9));
        }
        Ok(ResolvedRegion {
            phys_base: PhysicalAddress::new(0x9000_0000),
            kernel_alias: VirtualAddress::new(0xc000_0000),
            len: 0x10_0000,
            file: FileRef(descriptor),
        })
    }

    fn release(&self, file: FileRef) {
        self.released.borrow_mut().push(file.0);
    }
}

#[derive(Default)]
pub struct RecordingRemapper {
    pub calls: Vec<(VirtualAddress, u64, u64, PageProtection)>,
}

impl PageRemapper for RecordingRemapper {
    fn remap_pfn_range(
        &mut self,
        start: VirtualAddress,
        pfn: u64,
        len: u64,
        prot: PageProtection,
    ) -> Result<(), RemapError> {
        self.calls.push((start, pfn, len, prot));
        Ok(())
    }
}
