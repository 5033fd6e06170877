//! Flat per-process page tables.
//!
//! Every address space owns one [`PageTable`] with an entry per virtual page. The
//! referenced and modified flags are the software analogues of hardware use and dirty
//! bits: the translation cache sets them, and they are copied back here whenever a cache
//! slot is reused or invalidated.

use alloc::{boxed::Box, vec};

use crate::{FrameNumber, PageNumber};

/// Page table entry flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(u8);

impl PageFlags {
    /// Read-only bit (bit 0).
    const READ_ONLY: u8 = 1 << 0;

    /// Referenced bit (bit 1).
    const REFERENCED: u8 = 1 << 1;

    /// Modified bit (bit 2).
    const MODIFIED: u8 = 1 << 2;

    /// Creates empty flags: writable, unreferenced, clean.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns whether the read-only bit is set.
    pub const fn is_read_only(self) -> bool {
        (self.0 & Self::READ_ONLY) != 0
    }

    /// Sets or clears the read-only bit.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.assign(Self::READ_ONLY, read_only);
    }

    /// Returns whether the referenced bit is set.
    pub const fn is_referenced(self) -> bool {
        (self.0 & Self::REFERENCED) != 0
    }

    /// Sets or clears the referenced bit.
    pub fn set_referenced(&mut self, referenced: bool) {
        self.assign(Self::REFERENCED, referenced);
    }

    /// Returns whether the modified bit is set.
    pub const fn is_modified(self) -> bool {
        (self.0 & Self::MODIFIED) != 0
    }

    /// Sets or clears the modified bit.
    pub fn set_modified(&mut self, modified: bool) {
        self.assign(Self::MODIFIED, modified);
    }

    fn assign(&mut self, mask: u8, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// One page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry {
    frame: Option<FrameNumber>,
    flags: PageFlags,
}

impl PageTableEntry {
    /// Returns the frame holding the page, if resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    /// Returns whether the page is in physical memory.
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// Returns the flags for this entry.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Returns the flags for this entry for modification.
    pub fn flags_mut(&mut self) -> &mut PageFlags {
        &mut self.flags
    }

    /// Makes the page resident in `frame`, with clean reference state.
    pub fn map(&mut self, frame: FrameNumber, read_only: bool) {
        self.frame = Some(frame);
        self.flags = PageFlags::empty();
        self.flags.set_read_only(read_only);
    }

    /// Makes the page non-resident, returning the frame it occupied.
    pub fn unmap(&mut self) -> Option<FrameNumber> {
        self.frame.take()
    }
}

/// A flat page table indexed by virtual page number.
pub struct PageTable {
    entries: Box<[PageTableEntry]>,
}

impl PageTable {
    /// Creates a table of `page_count` non-resident entries.
    pub fn new(page_count: usize) -> Self {
        Self {
            entries: vec![PageTableEntry::default(); page_count].into_boxed_slice(),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for a page, or `None` if the page is outside the table.
    pub fn get(&self, page: PageNumber) -> Option<&PageTableEntry> {
        self.entries.get(page.as_usize())
    }

    /// Returns the entry for a page for modification.
    pub fn get_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page.as_usize())
    }

    /// Iterates over resident pages and their frames.
    pub fn resident(&self) -> impl Iterator<Item = (PageNumber, FrameNumber)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.frame.map(|frame| (PageNumber::new(index), frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let mut flags = PageFlags::empty();
        flags.set_referenced(true);
        flags.set_modified(true);
        flags.set_referenced(false);
        assert!(!flags.is_referenced());
        assert!(flags.is_modified());
        assert!(!flags.is_read_only());
    }

    #[test]
    fn map_resets_reference_state() {
        let mut entry = PageTableEntry::default();
        entry.flags_mut().set_modified(true);
        entry.map(FrameNumber::new(3), true);

        assert!(entry.is_resident());
        assert_eq!(entry.frame(), Some(FrameNumber::new(3)));
        assert!(entry.flags().is_read_only());
        assert!(!entry.flags().is_modified());

        assert_eq!(entry.unmap(), Some(FrameNumber::new(3)));
        assert!(!entry.is_resident());
    }

    #[test]
    fn resident_lists_mapped_pages() {
        let mut table = PageTable::new(4);
        table.get_mut(PageNumber::new(2)).unwrap().map(FrameNumber::new(7), false);
        assert_eq!(
            table.resident().collect::<Vec<_>>(),
            vec![(PageNumber::new(2), FrameNumber::new(7))]
        );
        assert!(table.get(PageNumber::new(4)).is_none());
    }
}
