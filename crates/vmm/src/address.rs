//! Address types for physical and virtual memory.
//!
//! Both address types are plain offsets: virtual addresses index a process's address
//! space, physical addresses index the emulated main memory.

use core::fmt;
use core::ops::Add;

use crate::PAGE_SIZE;

/// Macro to define common address type functionality.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % PAGE_SIZE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }
    };
}

impl_address_common!(
    VirtualAddress,
    "A virtual address inside a process's address space."
);

impl_address_common!(
    PhysicalAddress,
    "A physical address inside emulated main memory."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offset_wraps_at_page_size() {
        assert_eq!(VirtualAddress::new(PAGE_SIZE + 3).page_offset(), 3);
        assert_eq!(PhysicalAddress::new(2 * PAGE_SIZE).page_offset(), 0);
    }

    #[test]
    fn formats_as_hex() {
        assert_eq!(format!("{}", VirtualAddress::new(0x80)), "0x80");
        assert_eq!(format!("{:?}", PhysicalAddress::new(0x10)), "PhysicalAddress(0x10)");
    }
}
