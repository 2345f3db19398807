//! One-bit-per-slot occupancy maps.
//!
//! The free functions operate on raw `u32` word slices so the same logic can
//! run over an owned [`Bitmap`] or over a word block that lives inside a
//! serialized particle arena.

const WORD_BITS: u32 = 32;

/// Number of `u32` words needed to hold `bits` bits.
pub const fn word_count(bits: u32) -> usize {
    bits.div_ceil(WORD_BITS) as usize
}

#[inline]
pub fn test(words: &[u32], index: u32) -> bool {
    words
        .get((index / WORD_BITS) as usize)
        .is_some_and(|word| word & (1 << (index % WORD_BITS)) != 0)
}

#[inline]
pub fn set(words: &mut [u32], index: u32) {
    words[(index / WORD_BITS) as usize] |= 1 << (index % WORD_BITS);
}

#[inline]
pub fn reset(words: &mut [u32], index: u32) {
    words[(index / WORD_BITS) as usize] &= !(1 << (index % WORD_BITS));
}

/// Highest set bit, scanning from the top word down.
pub fn highest_set_bit(words: &[u32]) -> Option<u32> {
    words
        .iter()
        .enumerate()
        .rev()
        .find(|(_, word)| **word != 0)
        .map(|(index, word)| index as u32 * WORD_BITS + (WORD_BITS - 1 - word.leading_zeros()))
}

pub fn count(words: &[u32]) -> u32 {
    words.iter().map(|word| word.count_ones()).sum()
}

/// Number of set bits strictly below `limit`.
pub fn count_below(words: &[u32], limit: u32) -> u32 {
    let full = (limit / WORD_BITS) as usize;
    let mut total: u32 = words.iter().take(full).map(|w| w.count_ones()).sum();
    let rem = limit % WORD_BITS;
    if rem != 0 {
        if let Some(word) = words.get(full) {
            total += (word & ((1u32 << rem) - 1)).count_ones();
        }
    }
    total
}

/// Iterates set bit indices in ascending order.
pub fn iter(words: &[u32]) -> SetBits<'_> {
    SetBits {
        words,
        word_index: 0,
        current: words.first().copied().unwrap_or(0),
    }
}

pub struct SetBits<'a> {
    words: &'a [u32],
    word_index: usize,
    current: u32,
}

impl Iterator for SetBits<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some(self.word_index as u32 * WORD_BITS + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

/// Owned, growable bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: u32) -> Self {
        Self {
            words: vec![0; word_count(bits)],
        }
    }

    pub fn bit_capacity(&self) -> u32 {
        self.words.len() as u32 * WORD_BITS
    }

    pub fn test(&self, index: u32) -> bool {
        test(&self.words, index)
    }

    /// Sets `index`, growing the map if needed.
    pub fn set(&mut self, index: u32) {
        let needed = (index / WORD_BITS) as usize + 1;
        if self.words.len() < needed {
            self.words.resize(needed, 0);
        }
        set(&mut self.words, index);
    }

    pub fn reset(&mut self, index: u32) {
        if index < self.bit_capacity() {
            reset(&mut self.words, index);
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn highest_set_bit(&self) -> Option<u32> {
        highest_set_bit(&self.words)
    }

    pub fn count(&self) -> u32 {
        count(&self.words)
    }

    pub fn iter(&self) -> SetBits<'_> {
        iter(&self.words)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_bit_tracks_top_word() {
        let mut map = Bitmap::with_capacity(100);
        assert_eq!(map.highest_set_bit(), None);
        map.set(3);
        map.set(70);
        assert_eq!(map.highest_set_bit(), Some(70));
        map.reset(70);
        assert_eq!(map.highest_set_bit(), Some(3));
    }

    #[test]
    fn iteration_is_ascending_across_words() {
        let mut map = Bitmap::new();
        for bit in [64, 0, 31, 32, 5] {
            map.set(bit);
        }
        let bits: Vec<u32> = map.iter().collect();
        assert_eq!(bits, vec![0, 5, 31, 32, 64]);
        assert_eq!(map.count(), 5);
    }

    #[test]
    fn count_below_respects_partial_words() {
        let mut map = Bitmap::with_capacity(64);
        for bit in [1, 2, 33, 40] {
            map.set(bit);
        }
        assert_eq!(count_below(map.words(), 34), 3);
        assert_eq!(count_below(map.words(), 2), 1);
        assert_eq!(count_below(map.words(), 64), 4);
    }
}
