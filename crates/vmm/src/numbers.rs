//! Page, frame and process number types for memory management.
//!
//! This module provides newtypes for physical frame numbers, virtual page numbers and
//! process identifiers. They are plain indices: the frame table and the page tables
//! refer to each other through these numbers, never through pointers.

use crate::{
    PAGE_SIZE,
    address::{PhysicalAddress, VirtualAddress},
};
use core::fmt;

/// Macro to define common index newtype functionality.
///
/// This macro generates the basic structure and methods shared by frame numbers,
/// page numbers and process identifiers.
macro_rules! impl_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Adds the byte offset of a page-granular number.
macro_rules! impl_page_offset {
    ($name:ident) => {
        impl $name {
            /// Returns the byte offset of this page or frame within a page-granular store.
            #[inline]
            pub const fn byte_offset(self) -> usize {
                self.0 * PAGE_SIZE
            }
        }
    };
}

impl_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned offsets in\n\
     physical memory."
);
impl_page_offset!(FrameNumber);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers index a process's flat page table and correspond to PAGE_SIZE-aligned\n\
     virtual addresses."
);
impl_page_offset!(PageNumber);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    ///
    /// Pages whose start does not fit in an address saturate at the top of the address range.
    #[inline]
    pub const fn saturating_start(self) -> VirtualAddress {
        VirtualAddress::new(self.0.saturating_mul(PAGE_SIZE))
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

impl_number_common!(
    ProcessId,
    "Identifies a process and therefore the address space it owns.\n\n\
     The frame table records owners as `(ProcessId, PageNumber)` pairs."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_of_address() {
        let addr = VirtualAddress::new(3 * PAGE_SIZE + 5);
        assert_eq!(PageNumber::from(addr), PageNumber::new(3));
        assert_eq!(
            PageNumber::new(3).saturating_start(),
            VirtualAddress::new(3 * PAGE_SIZE)
        );
    }

    #[test]
    fn huge_page_start_saturates() {
        assert_eq!(
            PageNumber::new(usize::MAX / 64).saturating_start(),
            VirtualAddress::new(usize::MAX)
        );
    }

    #[test]
    fn frame_offsets() {
        let frame = FrameNumber::new(2);
        assert_eq!(frame.byte_offset(), 2 * PAGE_SIZE);
        assert_eq!(frame.start(), PhysicalAddress::new(2 * PAGE_SIZE));
    }

    #[test]
    fn debug_format_names_the_type() {
        assert_eq!(format!("{:?}", ProcessId::new(7)), "ProcessId(7)");
        assert_eq!(format!("{}", PageNumber::new(9)), "9");
    }
}
