//! Fixed-width occupancy sets over the child-pointer slots of one page.

use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Range};

/// Number of child-pointer slots tracked per physical page.
pub const SLOTS_PER_PAGE: usize = 512;

const WORDS: usize = SLOTS_PER_PAGE / 64;

/// A 512-bit set of slot indices.
///
/// Bit `i` lives in word `i / 64` at position `i % 64`. The type is `Copy`
/// and does no I/O, so the squeezer's conflict repair can be tested on its
/// own.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotSet([u64; WORDS]);

impl SlotSet {
    /// The index of the highest slot. Rotating a set holding it would wrap
    /// into slot 0.
    pub const LAST: usize = SLOTS_PER_PAGE - 1;

    /// An empty set.
    pub const fn new() -> Self {
        Self([0; WORDS])
    }

    /// A set holding every slot.
    pub const fn full() -> Self {
        Self([u64::MAX; WORDS])
    }

    /// A set holding every slot in `range`.
    ///
    /// # Panics
    /// Panics if `range.end > SLOTS_PER_PAGE`.
    pub fn from_range(range: Range<usize>) -> Self {
        assert!(range.end <= SLOTS_PER_PAGE, "slot range out of bounds");
        let mut set = Self::new();
        for slot in range {
            set.insert(slot);
        }
        set
    }

    /// Build a set from raw little-endian words (`words[0]` holds slots 0..64).
    pub const fn from_words(words: [u64; WORDS]) -> Self {
        Self(words)
    }

    /// The raw words backing this set.
    pub const fn words(&self) -> [u64; WORDS] {
        self.0
    }

    #[inline]
    pub fn insert(&mut self, slot: usize) {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] |= 1u64 << (slot % 64);
    }

    #[inline]
    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] &= !(1u64 << (slot % 64));
    }

    #[inline]
    pub fn contains(&self, slot: usize) -> bool {
        debug_assert!(slot < SLOTS_PER_PAGE);
        self.0[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    /// True if no slot is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Number of slots set.
    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if `self` and `other` share no slot.
    #[inline]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a & b == 0)
    }

    /// Rotate every slot `n` positions towards higher indices, cyclically
    /// within the 512-bit width: slot `i` moves to `(i + n) % 512`.
    pub fn rotate_left(&self, n: usize) -> Self {
        let n = n % SLOTS_PER_PAGE;
        if n == 0 {
            return *self;
        }
        let word_shift = n / 64;
        let bit_shift = n % 64;
        let mut out = [0u64; WORDS];
        for (k, out_word) in out.iter_mut().enumerate() {
            let lo = self.0[(k + WORDS - word_shift) % WORDS];
            if bit_shift == 0 {
                *out_word = lo;
            } else {
                let carry = self.0[(k + 2 * WORDS - word_shift - 1) % WORDS];
                *out_word = (lo << bit_shift) | (carry >> (64 - bit_shift));
            }
        }
        Self(out)
    }

    /// Iterate over the set slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }
}

impl std::fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for SlotSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for slot in iter {
            set.insert(slot);
        }
        set
    }
}

impl BitAnd for SlotSet {
    type Output = SlotSet;

    fn bitand(mut self, rhs: SlotSet) -> SlotSet {
        self &= rhs;
        self
    }
}

impl BitAndAssign for SlotSet {
    fn bitand_assign(&mut self, rhs: SlotSet) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a &= b;
        }
    }
}

impl BitOr for SlotSet {
    type Output = SlotSet;

    fn bitor(mut self, rhs: SlotSet) -> SlotSet {
        self |= rhs;
        self
    }
}

impl BitOrAssign for SlotSet {
    fn bitor_assign(&mut self, rhs: SlotSet) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a |= b;
        }
    }
}
