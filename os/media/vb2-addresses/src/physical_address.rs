use crate::{PageSize, is_aligned};
use core::fmt;
use core::ops::Add;

/// Physical memory address.
///
/// Denotes a location in host RAM as seen by bus masters such as the camera
/// VFE. Keeping it apart from [`VirtualAddress`](super::VirtualAddress)
/// prevents handing a CPU pointer to hardware or vice versa.
///
/// The zero address doubles as "not yet bound": no contiguous carveout
/// starts at physical page zero.
///
/// ### Examples
/// ```rust
/// # use vb2_addresses::*;
/// let pa = PhysicalAddress::new(0x8000_2000);
/// assert_eq!(pa.frame_number::<Size4K>(), 0x8_0002);
/// assert!(pa.is_aligned::<Size4K>());
/// assert!(PhysicalAddress::zero().is_null());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether the address sits on an `S` boundary.
    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        is_aligned::<S>(self.0)
    }

    /// Page frame number of the page of size `S` containing this address.
    #[inline]
    #[must_use]
    pub const fn frame_number<S: PageSize>(self) -> u64 {
        self.0 >> S::SHIFT
    }

    /// Add a byte offset, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(a: PhysicalAddress) -> Self {
        a.as_u64()
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
