//! A fixed-size bitmap.

use alloc::{vec, vec::Vec};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A fixed-size array of bits, each of which is either set or clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS_PER_WORD)],
            len,
        }
    }

    /// Returns the number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Sets bit `index`.
    pub fn mark(&mut self, index: usize) {
        assert!(index < self.len, "bit {index} out of range");
        self.words[index / BITS_PER_WORD] |= 1 << (index % BITS_PER_WORD);
    }

    /// Clears bit `index`.
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.len, "bit {index} out of range");
        self.words[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
    }

    /// Returns true if bit `index` is set.
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range");
        self.words[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Finds the first clear bit, sets it and returns its index.
    pub fn find_and_mark(&mut self) -> Option<usize> {
        let index = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(word, bits)| word * BITS_PER_WORD + bits.trailing_ones() as usize)
            .filter(|&index| index < self.len)?;
        self.mark(index);
        Some(index)
    }

    /// Returns the number of clear bits.
    pub fn count_clear(&self) -> usize {
        self.len - self.count_set()
    }

    /// Returns the number of set bits.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&index| self.test(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_and_mark_takes_lowest_clear_bit() {
        let mut bitmap = Bitmap::new(70);
        bitmap.mark(0);
        bitmap.mark(1);
        assert_eq!(bitmap.find_and_mark(), Some(2));
        bitmap.clear(0);
        assert_eq!(bitmap.find_and_mark(), Some(0));
        assert_eq!(bitmap.count_set(), 3);
        assert_eq!(bitmap.count_clear(), 67);
    }

    #[test]
    fn full_bitmap_has_no_clear_bit() {
        let mut bitmap = Bitmap::new(3);
        for _ in 0..3 {
            assert!(bitmap.find_and_mark().is_some());
        }
        assert_eq!(bitmap.find_and_mark(), None);
        assert_eq!(bitmap.iter_set().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_bit_panics() {
        Bitmap::new(8).test(8);
    }
}
