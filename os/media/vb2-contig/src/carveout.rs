//! First-fit allocator over a fixed physical carveout.
//!
//! Camera platforms reserve a physically contiguous window at boot (the
//! "EBI" or PMEM pool). [`CarveoutAllocator`] hands out aligned ranges from
//! such a window and can be plugged into [`ContigMemOps`](crate::ContigMemOps)
//! wherever no platform allocator exists yet.

use crate::pmem::ContiguousAllocator;
use alloc::collections::BTreeMap;
use spinning_top::Spinlock;
use vb2_addresses::{PageSize, PhysicalAddress, Size4K, checked_align_up};

/// Carveout spanning `[base, base + size)`.
///
/// The base must be non-zero and 4 KiB aligned, since a zero physical
/// address means "no memory" to the buffer layer.
pub struct CarveoutAllocator {
    base: u64,
    limit: u64,
    // start -> length of every range currently handed out
    ranges: Spinlock<BTreeMap<u64, u64>>,
}

impl CarveoutAllocator {
    #[must_use]
    pub fn new(base: PhysicalAddress, size: u64) -> Self {
        debug_assert!(!base.is_null(), "carveout must not start at zero");
        debug_assert!(base.is_aligned::<Size4K>(), "carveout base not page aligned");
        Self {
            base: base.as_u64(),
            limit: base.as_u64().saturating_add(size),
            ranges: Spinlock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.limit - self.base
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.ranges.lock().values().sum()
    }

    /// Number of ranges currently handed out.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.ranges.lock().len()
    }

    const fn align_up(val: u64, align: u64) -> Option<u64> {
        match val.checked_add(align - 1) {
            Some(v) => Some(v & !(align - 1)),
            None => None,
        }
    }
}

impl ContiguousAllocator for CarveoutAllocator {
    fn allocate_contiguous(&self, size: u64, align: u64) -> Option<PhysicalAddress> {
        let size = checked_align_up::<Size4K>(size)?;
        if size == 0 {
            return None;
        }
        let align = align.max(Size4K::SIZE).checked_next_power_of_two()?;

        let mut ranges = self.ranges.lock();
        let mut candidate = Self::align_up(self.base, align)?;

        for (&start, &len) in &*ranges {
            if start >= candidate && start - candidate >= size {
                break;
            }
            candidate = candidate.max(Self::align_up(start + len, align)?);
        }

        let end = candidate.checked_add(size)?;
        if end > self.limit {
            log::debug!(
                "carveout {:#x}: no {size:#x} byte hole ({} ranges live)",
                self.base,
                ranges.len()
            );
            return None;
        }

        ranges.insert(candidate, size);
        Some(PhysicalAddress::new(candidate))
    }

    fn free_contiguous(&self, phys: PhysicalAddress) {
        if self.ranges.lock().remove(&phys.as_u64()).is_none() {
            log::error!(
                "carveout {:#x}: free of untracked range {phys}",
                self.base
            );
        }
    }
}
