//! # Mapping Lifecycle
//!
//! Binds a [`ContigBuffer`] into a process's address space and keeps count
//! of the live views of it.
//!
//! A successful [`map_into_process`] leaves the region
//!
//! - mapped non-cached onto the buffer's physical pages,
//! - marked non-expandable,
//! - carrying [`CONTIG_VM_OPS`] and the buffer's [`MappingCount`] as private
//!   data,
//!
//! and accounts the initial view, so the count is `1` after the first map.
//! Later duplicates and teardowns arrive through the open/close callbacks.
//! A close never frees memory: the buffer may outlive all of its views while
//! it sits in the hardware queue. Only `put` releases backing memory.

use crate::buffer::{Backing, ContigBuffer, MappingCount};
use crate::vma::{PageRemapper, RemapError, VmArea, VmOperations, VmPrivate};
use vb2_addresses::{Size4K, VirtualAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("user pointer buffer has no memory bound")]
    Unbound,
    #[error("remapping {len:#x} bytes at {start} failed")]
    Remap {
        start: VirtualAddress,
        len: u64,
        #[source]
        source: RemapError,
    },
}

/// Open/close callbacks installed on every region backed by a [`ContigBuffer`].
pub struct ContigVmOps;

/// The operations table [`map_into_process`] installs.
pub static CONTIG_VM_OPS: ContigVmOps = ContigVmOps;

impl VmOperations for ContigVmOps {
    fn open(&self, vma: &VmArea) {
        let _count = mapping_count_of(vma).open();
        #[cfg(feature = "trace-mappings")]
        log::trace!(
            "vm_open [count={_count}, vma={}-{}]",
            vma.start(),
            vma.end()
        );
    }

    fn close(&self, vma: &VmArea) {
        match mapping_count_of(vma).close() {
            Some(_count) => {
                #[cfg(feature = "trace-mappings")]
                log::trace!(
                    "vm_close [count={_count}, vma={}-{}]",
                    vma.start(),
                    vma.end()
                );
            }
            None => log::warn!(
                "vm_close without matching open [vma={}-{}]",
                vma.start(),
                vma.end()
            ),
        }
    }
}

#[track_caller]
fn mapping_count_of(vma: &VmArea) -> &MappingCount {
    match vma.private_data().and_then(|p| p.downcast_ref::<MappingCount>()) {
        Some(count) => count,
        None => panic!("vma {}-{} has no buffer mapping count", vma.start(), vma.end()),
    }
}

/// Map `buf` into `vma`.
///
/// At most `buf.size()` bytes are mapped, even if the region is larger.
///
/// # Errors
/// - [`MapError::Unbound`] for a user-pointer buffer that was never bound.
/// - [`MapError::Remap`] if page-table programming fails; the buffer is not
///   touched in that case.
///
/// # Panics
/// On a corrupted handle.
pub fn map_into_process<F>(
    buf: &mut ContigBuffer<F>,
    vma: &mut VmArea,
    mm: &mut dyn PageRemapper,
) -> Result<(), MapError> {
    buf.validate();

    if let Backing::UserPtr { binding: None, .. } = buf.backing() {
        log::error!("mmap: user pointer buffer is not bound");
        return Err(MapError::Unbound);
    }

    let len = vma.len().min(buf.size());
    vma.set_page_prot(vma.page_prot().noncached());

    let start = vma.start();
    let pfn = buf.phys_addr().frame_number::<Size4K>();
    if let Err(source) = mm.remap_pfn_range(start, pfn, len, vma.page_prot()) {
        log::error!("mmap: remap failed with error {source}");
        return Err(MapError::Remap { start, len, source });
    }

    buf.set_vaddr(start);
    vma.set_vm_ops(&CONTIG_VM_OPS);
    vma.set_flags(vma.flags().with_dont_expand(true));
    let private: VmPrivate = buf.mappings().clone();
    vma.set_private_data(private);

    log::debug!(
        "mmap {}: {}-{} ({len:#x} bytes)",
        buf.phys_addr(),
        vma.start(),
        vma.end()
    );

    vma.open();
    Ok(())
}

/// Number of live user-space views of `buf`.
///
/// # Panics
/// On a corrupted handle.
#[must_use]
pub fn active_mapping_count<F>(buf: &ContigBuffer<F>) -> u32 {
    buf.validate();
    buf.mappings().get()
}
