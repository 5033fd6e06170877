//! The global frame table.
//!
//! Tracks which physical frames are free, and for every allocated frame which page of
//! which process it holds (the "core map"). Victim selection for page replacement lives
//! here too, since every policy walks the same frame indices.

use alloc::{vec, vec::Vec};

use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::{EvictionPolicy, FrameNumber, PageNumber, ProcessId, bitmap::Bitmap};

/// The page currently held by an allocated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    /// Process whose address space maps the frame.
    pub pid: ProcessId,
    /// Page of that address space stored in the frame.
    pub page: PageNumber,
}

impl FrameOwner {
    pub const fn new(pid: ProcessId, page: PageNumber) -> Self {
        Self { pid, page }
    }
}

/// Per-policy replacement state.
enum Replacement {
    Fifo { cursor: usize },
    Clock { hand: usize },
    Random { rng: SmallRng },
}

/// Bitmap of free frames plus the reverse mapping from frame to owning page.
pub struct FrameTable {
    used: Bitmap,
    owners: Vec<Option<FrameOwner>>,
    replacement: Replacement,
}

impl FrameTable {
    /// Creates a frame table with `num_frames` free frames.
    pub fn new(num_frames: usize, policy: EvictionPolicy, seed: u64) -> Self {
        let replacement = match policy {
            EvictionPolicy::Fifo => Replacement::Fifo { cursor: 0 },
            EvictionPolicy::Clock => Replacement::Clock { hand: 0 },
            EvictionPolicy::Random => Replacement::Random {
                rng: SmallRng::seed_from_u64(seed),
            },
        };

        Self {
            used: Bitmap::new(num_frames),
            owners: vec![None; num_frames],
            replacement,
        }
    }

    /// Returns the total number of frames.
    pub fn num_frames(&self) -> usize {
        self.used.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.used.count_clear()
    }

    /// Returns the number of allocated frames.
    pub fn allocated_count(&self) -> usize {
        self.used.count_set()
    }

    /// Returns true if the frame is allocated.
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.used.test(frame.as_usize())
    }

    /// Allocates the lowest-numbered free frame.
    ///
    /// Returns `None` when every frame is in use; the caller must evict one.
    pub fn allocate(&mut self) -> Option<FrameNumber> {
        self.used.find_and_mark().map(FrameNumber::new)
    }

    /// Returns a frame to the free pool and forgets its owner.
    ///
    /// # Panics
    /// Panics if the frame is not allocated.
    pub fn free(&mut self, frame: FrameNumber) {
        assert!(self.is_allocated(frame), "frame {frame} freed while not allocated");
        self.used.clear(frame.as_usize());
        self.owners[frame.as_usize()] = None;
    }

    /// Records which page an allocated frame holds.
    ///
    /// # Panics
    /// Panics if the frame is not allocated.
    pub fn set_owner(&mut self, frame: FrameNumber, owner: FrameOwner) {
        assert!(self.is_allocated(frame), "owner set on free frame {frame}");
        self.owners[frame.as_usize()] = Some(owner);
    }

    /// Returns the page held by a frame, or `None` if the frame is free or not yet filled.
    pub fn owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.owners[frame.as_usize()]
    }

    /// Chooses an allocated frame to evict.
    ///
    /// `test_and_clear_referenced` is consulted by the clock policy: it must report whether
    /// the page held by the frame was referenced and clear that bit everywhere it is kept.
    ///
    /// # Panics
    /// Panics if no frame is allocated.
    pub fn select_victim(
        &mut self,
        test_and_clear_referenced: &mut dyn FnMut(FrameNumber, FrameOwner) -> bool,
    ) -> FrameNumber {
        let num_frames = self.num_frames();
        assert!(
            self.allocated_count() > 0,
            "victim requested with no allocated frames"
        );

        match &mut self.replacement {
            Replacement::Fifo { cursor } => loop {
                let index = *cursor;
                *cursor = (*cursor + 1) % num_frames;
                if self.used.test(index) {
                    return FrameNumber::new(index);
                }
            },
            Replacement::Clock { hand } => loop {
                let index = *hand;
                *hand = (*hand + 1) % num_frames;
                if !self.used.test(index) {
                    continue;
                }
                let frame = FrameNumber::new(index);
                match self.owners[index] {
                    Some(owner) if test_and_clear_referenced(frame, owner) => {
                        log::trace!("clock: frame {frame} gets a second chance");
                    }
                    _ => return frame,
                }
            },
            Replacement::Random { rng } => {
                let allocated: Vec<usize> = self.used.iter_set().collect();
                FrameNumber::new(allocated[rng.gen_range(0..allocated.len())])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(pid: usize, page: usize) -> FrameOwner {
        FrameOwner::new(ProcessId::new(pid), PageNumber::new(page))
    }

    fn full_table(policy: EvictionPolicy, frames: usize) -> FrameTable {
        let mut table = FrameTable::new(frames, policy, 1);
        for page in 0..frames {
            let frame = table.allocate().unwrap();
            table.set_owner(frame, owner(1, page));
        }
        table
    }

    #[test]
    fn allocates_each_frame_once() {
        let mut table = FrameTable::new(4, EvictionPolicy::Fifo, 0);
        let frames: Vec<_> = (0..4).map(|_| table.allocate().unwrap()).collect();
        assert_eq!(
            frames,
            (0..4).map(FrameNumber::new).collect::<Vec<_>>()
        );
        assert_eq!(table.allocate(), None);
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn free_makes_frame_available_again() {
        let mut table = full_table(EvictionPolicy::Fifo, 3);
        table.free(FrameNumber::new(1));
        assert_eq!(table.owner(FrameNumber::new(1)), None);
        assert_eq!(table.allocate(), Some(FrameNumber::new(1)));
    }

    #[test]
    #[should_panic(expected = "freed while not allocated")]
    fn double_free_panics() {
        let mut table = FrameTable::new(2, EvictionPolicy::Fifo, 0);
        let frame = table.allocate().unwrap();
        table.free(frame);
        table.free(frame);
    }

    #[test]
    #[should_panic(expected = "no allocated frames")]
    fn victim_from_empty_table_panics() {
        let mut table = FrameTable::new(2, EvictionPolicy::Fifo, 0);
        table.select_victim(&mut |_, _| false);
    }

    #[test]
    fn fifo_cycles_regardless_of_references() {
        let mut table = full_table(EvictionPolicy::Fifo, 3);
        let victims: Vec<_> = (0..4)
            .map(|_| table.select_victim(&mut |_, _| true).as_usize())
            .collect();
        assert_eq!(victims, vec![0, 1, 2, 0]);
    }

    #[test]
    fn fifo_skips_free_frames() {
        let mut table = full_table(EvictionPolicy::Fifo, 3);
        table.free(FrameNumber::new(0));
        assert_eq!(table.select_victim(&mut |_, _| false), FrameNumber::new(1));
    }

    #[test]
    fn clock_gives_referenced_frames_a_second_chance() {
        let mut table = full_table(EvictionPolicy::Clock, 4);
        let mut referenced = vec![true, true, false, true];

        let victim = table.select_victim(&mut |frame, _| {
            core::mem::replace(&mut referenced[frame.as_usize()], false)
        });
        assert_eq!(victim, FrameNumber::new(2));
        assert_eq!(referenced, vec![false, false, false, true]);

        // The hand continues after the victim: frame 3 loses its bit, frame 0 is taken.
        let victim = table.select_victim(&mut |frame, _| {
            core::mem::replace(&mut referenced[frame.as_usize()], false)
        });
        assert_eq!(victim, FrameNumber::new(0));
        assert_eq!(referenced, vec![false; 4]);
    }

    #[test]
    fn clock_terminates_when_everything_is_referenced() {
        let mut table = full_table(EvictionPolicy::Clock, 3);
        let mut referenced = vec![true; 3];
        let victim = table.select_victim(&mut |frame, _| {
            core::mem::replace(&mut referenced[frame.as_usize()], false)
        });
        assert_eq!(victim, FrameNumber::new(0));
    }

    #[test]
    fn random_only_picks_allocated_frames() {
        let mut table = full_table(EvictionPolicy::Random, 8);
        for index in [0, 2, 4, 6] {
            table.free(FrameNumber::new(index));
        }
        for _ in 0..64 {
            let victim = table.select_victim(&mut |_, _| false);
            assert!(table.is_allocated(victim));
        }
    }

    #[test]
    fn random_is_reproducible_for_a_seed() {
        let pick = |seed| {
            let mut table = FrameTable::new(16, EvictionPolicy::Random, seed);
            while let Some(frame) = table.allocate() {
                table.set_owner(frame, owner(1, frame.as_usize()));
            }
            (0..8)
                .map(|_| table.select_victim(&mut |_, _| false))
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(42), pick(42));
    }

    #[test]
    fn frame_without_owner_is_still_allocated() {
        let mut table = FrameTable::new(3, EvictionPolicy::Fifo, 0);
        let a = table.allocate().unwrap();
        let unowned = table.allocate().unwrap();
        table.set_owner(a, owner(2, 5));
        assert_eq!(table.owner(a), Some(owner(2, 5)));
        assert_eq!(table.owner(unowned), None);
        assert!(table.is_allocated(unowned));
        assert_eq!(table.allocated_count(), 2);
        assert_eq!(table.num_frames(), 3);
    }
}
