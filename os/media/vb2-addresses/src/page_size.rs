use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Granularity at which buffers are allocated and mapped.
///
/// Sealed; [`Size4K`] is the only implementation.
pub trait PageSize:
    sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Display + fmt::Debug
{
    /// Bytes per page, a power of two.
    const SIZE: u64;
    /// Bits of in-page offset; `1 << SHIFT == SIZE`.
    const SHIFT: u32;
}

/// 4 KiB page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u64 = 1 << Self::SHIFT;
    const SHIFT: u32 = 12;
}

impl fmt::Display for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("4K")
    }
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Round `bytes` up to the next page boundary.
///
/// Returns `None` if the result does not fit into a `u64`.
#[inline]
#[must_use]
pub const fn checked_align_up<S: PageSize>(bytes: u64) -> Option<u64> {
    match bytes.checked_add(S::SIZE - 1) {
        Some(v) => Some(v & !(S::SIZE - 1)),
        None => None,
    }
}

#[inline]
#[must_use]
pub const fn is_aligned<S: PageSize>(bytes: u64) -> bool {
    bytes & (S::SIZE - 1) == 0
}
