//! The software-managed translation cache.
//!
//! A small, fixed number of slots caching page table entries. The execution engine only
//! ever translates through these slots; on a miss the fault handler installs a new entry
//! in the next slot, round-robin. Slots carry the owning process so their referenced and
//! modified bits can always be written back to the right page table.

use alloc::{vec, vec::Vec};

use crate::{FrameNumber, PageNumber, PageTableEntry, ProcessId};

/// One translation cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbSlot {
    pub valid: bool,
    pub pid: ProcessId,
    pub page: PageNumber,
    pub frame: FrameNumber,
    pub read_only: bool,
    pub referenced: bool,
    pub modified: bool,
}

impl TlbSlot {
    /// Copies the slot's reference state back into the page table entry it caches.
    pub fn write_back(&self, entry: &mut PageTableEntry) {
        let flags = entry.flags_mut();
        flags.set_referenced(self.referenced);
        flags.set_modified(self.modified);
    }
}

/// Fixed-capacity set of active translations.
pub struct TranslationCache {
    slots: Vec<TlbSlot>,
    next: usize,
}

impl TranslationCache {
    /// Creates a cache with `capacity` invalid slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "translation cache needs at least one slot");
        Self {
            slots: vec![TlbSlot::default(); capacity],
            next: 0,
        }
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot at `index`.
    pub fn slot(&self, index: usize) -> &TlbSlot {
        &self.slots[index]
    }

    /// Returns the index of the valid slot translating `page` of `pid`.
    pub fn lookup(&self, pid: ProcessId, page: PageNumber) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.valid && slot.pid == pid && slot.page == page)
    }

    /// Records an access through a slot.
    pub fn touch(&mut self, index: usize, write: bool) {
        let slot = &mut self.slots[index];
        slot.referenced = true;
        if write {
            slot.modified = true;
        }
    }

    /// Returns the index of the slot the next refill will use and advances the cursor.
    pub fn next_victim(&mut self) -> usize {
        let index = self.next;
        self.next = (self.next + 1) % self.slots.len();
        index
    }

    /// Fills slot `index` with a copy of a resident page table entry.
    ///
    /// The slot must already have been written back if it was valid.
    pub fn install(&mut self, index: usize, pid: ProcessId, page: PageNumber, entry: &PageTableEntry) {
        let frame = entry.frame().expect("only resident entries can be cached");
        let flags = entry.flags();
        self.slots[index] = TlbSlot {
            valid: true,
            pid,
            page,
            frame,
            read_only: flags.is_read_only(),
            referenced: flags.is_referenced(),
            modified: flags.is_modified(),
        };
    }

    /// Invalidates slot `index`, returning its previous contents if it was valid.
    ///
    /// Callers write the returned slot back to its page table entry.
    pub fn invalidate(&mut self, index: usize) -> Option<TlbSlot> {
        let slot = &mut self.slots[index];
        if !slot.valid {
            return None;
        }
        slot.valid = false;
        Some(*slot)
    }

    /// Indices of valid slots mapping `frame`.
    pub fn slots_mapping(&self, frame: FrameNumber) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.valid && slot.frame == frame)
            .map(|(index, _)| index)
    }

    /// Indices of valid slots belonging to `pid`.
    pub fn slots_of(&self, pid: ProcessId) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.valid && slot.pid == pid)
            .map(|(index, _)| index)
    }

    /// Clears the referenced bit of every valid slot mapping `frame`, returning whether
    /// any of them had it set.
    pub fn test_and_clear_referenced(&mut self, frame: FrameNumber) -> bool {
        let mut referenced = false;
        for slot in self.slots.iter_mut().filter(|slot| slot.valid && slot.frame == frame) {
            referenced |= slot.referenced;
            slot.referenced = false;
        }
        referenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident(frame: usize, read_only: bool) -> PageTableEntry {
        let mut entry = PageTableEntry::default();
        entry.map(FrameNumber::new(frame), read_only);
        entry
    }

    #[test]
    fn refill_is_round_robin() {
        let mut tlb = TranslationCache::new(3);
        let order: Vec<_> = (0..5).map(|_| tlb.next_victim()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn lookup_matches_process_and_page() {
        let mut tlb = TranslationCache::new(2);
        let pid = ProcessId::new(1);
        tlb.install(0, pid, PageNumber::new(4), &resident(2, true));

        assert_eq!(tlb.lookup(pid, PageNumber::new(4)), Some(0));
        assert_eq!(tlb.lookup(ProcessId::new(2), PageNumber::new(4)), None);
        assert!(tlb.slot(0).read_only);
    }

    #[test]
    fn invalidate_returns_bits_for_write_back() {
        let mut tlb = TranslationCache::new(1);
        let mut entry = resident(0, false);
        tlb.install(0, ProcessId::new(1), PageNumber::new(0), &entry);
        tlb.touch(0, true);

        let slot = tlb.invalidate(0).unwrap();
        slot.write_back(&mut entry);
        assert!(entry.flags().is_referenced());
        assert!(entry.flags().is_modified());

        assert_eq!(tlb.invalidate(0), None);
        assert_eq!(tlb.lookup(ProcessId::new(1), PageNumber::new(0)), None);
    }

    #[test]
    fn clears_referenced_bits_for_frame() {
        let mut tlb = TranslationCache::new(2);
        tlb.install(0, ProcessId::new(1), PageNumber::new(0), &resident(5, false));
        tlb.install(1, ProcessId::new(1), PageNumber::new(1), &resident(6, false));
        tlb.touch(0, false);

        assert!(tlb.test_and_clear_referenced(FrameNumber::new(5)));
        assert!(!tlb.test_and_clear_referenced(FrameNumber::new(5)));
        assert!(!tlb.test_and_clear_referenced(FrameNumber::new(6)));
        assert_eq!(tlb.slots_mapping(FrameNumber::new(6)).collect::<Vec<_>>(), vec![1]);
        assert_eq!(tlb.slots_of(ProcessId::new(1)).count(), 2);
    }
}
