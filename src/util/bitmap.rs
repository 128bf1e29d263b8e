use crate::gcinfo::error::Result;
use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD};

/// A fixed-length set of slot indices, one bit per tracked slot.
///
/// The live set of a query is the only allocation made while enumerating roots, so it is
/// allocated fallibly: running out of memory here surfaces as
/// [`DecodeError::OutOfMemory`](crate::gcinfo::DecodeError::OutOfMemory) instead of an abort.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LiveBitmap {
    words: Vec<usize>,
    len: usize,
}

impl LiveBitmap {
    /// Create an all-clear bitmap of `len` bits.
    pub fn try_with_len(len: usize) -> Result<Self> {
        let num_words = len.div_ceil(BITS_IN_WORD);
        let mut words = Vec::new();
        words.try_reserve_exact(num_words)?;
        words.resize(num_words, 0);
        Ok(LiveBitmap { words, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index >> LOG_BITS_IN_WORD] & (1 << (index & (BITS_IN_WORD - 1))) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len);
        let mask = 1 << (index & (BITS_IN_WORD - 1));
        let word = &mut self.words[index >> LOG_BITS_IN_WORD];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn toggle(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index >> LOG_BITS_IN_WORD] ^= 1 << (index & (BITS_IN_WORD - 1));
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over the indices of set bits, in ascending order.
    pub fn iter_ones(&self) -> SetBits<'_> {
        SetBits {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Iterator over set bits in a [`LiveBitmap`].
#[derive(Debug, Clone)]
pub struct SetBits<'a> {
    words: &'a [usize],
    word_index: usize,
    current: usize,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while self.current == 0 {
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
        let trailing = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1; // Clear lowest set bit
        Some((self.word_index << LOG_BITS_IN_WORD) + trailing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_toggle() {
        let mut bitmap = LiveBitmap::try_with_len(130).unwrap();
        assert_eq!(bitmap.count_ones(), 0);
        bitmap.set(0, true);
        bitmap.set(64, true);
        bitmap.set(129, true);
        assert!(bitmap.get(64));
        bitmap.toggle(64);
        assert!(!bitmap.get(64));
        bitmap.toggle(65);
        assert_eq!(bitmap.iter_ones().collect::<Vec<_>>(), vec![0, 65, 129]);
        assert_eq!(bitmap.count_ones(), 3);
    }

    #[test]
    fn empty_bitmap_iterates_nothing() {
        let bitmap = LiveBitmap::try_with_len(0).unwrap();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.iter_ones().count(), 0);
    }
}
