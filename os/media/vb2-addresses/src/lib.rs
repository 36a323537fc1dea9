//! # Physical and Virtual Addresses for Video Buffers
//!
//! Strongly typed wrappers for the addresses a contiguous video buffer is
//! known by, plus the page rounding helpers used when sizing allocations.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Bus/physical address handed to the capture hardware. |
//! | [`VirtualAddress`] | CPU address inside one process (or the kernel). |
//! | [`PageSize`] | Page granularity marker; only [`Size4K`] exists. |
//!
//! ```rust
//! # use vb2_addresses::*;
//! assert_eq!(checked_align_up::<Size4K>(1), Some(4096));
//! assert_eq!(checked_align_up::<Size4K>(8192), Some(8192));
//! assert_eq!(checked_align_up::<Size4K>(u64::MAX), None);
//! assert!(is_aligned::<Size4K>(0x8000_2000));
//! ```
//!
//! All types are `#[repr(transparent)]` over `u64` and zero-cost.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod virtual_address;

pub use page_size::{PageSize, Size4K, checked_align_up, is_aligned};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
