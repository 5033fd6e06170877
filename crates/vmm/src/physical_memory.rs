//! Emulated main memory.

use alloc::{vec, vec::Vec};

use crate::{FrameNumber, PAGE_SIZE, PhysicalAddress};

/// The machine's main memory: `num_frames` frames of `PAGE_SIZE` bytes.
///
/// Frames are addressed by number; the frame table decides who may use which one.
pub struct PhysicalMemory {
    memory: Vec<u8>,
}

impl PhysicalMemory {
    /// Creates zeroed memory holding `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            memory: vec![0u8; num_frames * PAGE_SIZE],
        }
    }

    /// Returns the size of memory in bytes.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Returns the bytes of a frame.
    ///
    /// # Panics
    /// Panics if the frame lies outside memory.
    pub fn frame(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.byte_offset();
        assert!(start < self.size(), "frame {frame} out of bounds");
        &self.memory[start..start + PAGE_SIZE]
    }

    /// Returns the bytes of a frame for writing.
    ///
    /// # Panics
    /// Panics if the frame lies outside memory.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.byte_offset();
        assert!(start < self.size(), "frame {frame} out of bounds");
        &mut self.memory[start..start + PAGE_SIZE]
    }

    /// Fills a frame with zeros.
    pub fn zero_frame(&mut self, frame: FrameNumber) {
        self.frame_mut(frame).fill(0);
    }

    /// Reads one byte.
    pub fn read_byte(&self, addr: PhysicalAddress) -> u8 {
        self.memory[addr.as_usize()]
    }

    /// Writes one byte.
    pub fn write_byte(&mut self, addr: PhysicalAddress, value: u8) {
        self.memory[addr.as_usize()] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_do_not_overlap() {
        let mut memory = PhysicalMemory::new(2);
        memory.frame_mut(FrameNumber::new(0)).fill(1);
        memory.frame_mut(FrameNumber::new(1)).fill(2);
        assert!(memory.frame(FrameNumber::new(0)).iter().all(|&b| b == 1));
        assert_eq!(memory.read_byte(PhysicalAddress::new(PAGE_SIZE)), 2);

        memory.zero_frame(FrameNumber::new(1));
        assert!(memory.frame(FrameNumber::new(1)).iter().all(|&b| b == 0));
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn frame_past_end_panics() {
        PhysicalMemory::new(1).frame(FrameNumber::new(1));
    }
}
