//! Categorical split-partition codec.
//!
//! A binary split on an r-level categorical covariate is a partition of
//! the level set into a left and a right coalition. Partitions are
//! bit-compressed into `u32` words ("minimal winning coalition
//! patterns"): bit `(k-1) % 32` of word `(k-1) / 32` is set when level
//! `k` routes left. Complementary partitions are the same split, so
//! patterns are canonicalized with the highest level always on the
//! right, giving `2^(r-1) - 1` distinct partitions.

use rand::Rng;

const WORD_BITS: u32 = 32;

/// A bit-compressed binary partition of a categorical level set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MwcpPattern {
    words: Vec<u32>,
}

impl MwcpPattern {
    /// Rebuild a pattern from its packed words (flattened-forest restore).
    #[must_use]
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Return the packed words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Test which side a 1-based level code routes to.
    #[must_use]
    pub fn goes_left(&self, level: u32) -> bool {
        let bit = level - 1;
        let word = (bit / WORD_BITS) as usize;
        self.words[word] & (1 << (bit % WORD_BITS)) != 0
    }
}

/// The split-encoding space of one categorical covariate.
///
/// Built once per categorical covariate at forest setup; immutable and
/// shared read-only across all trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Factor {
    n_levels: u32,
}

impl Factor {
    /// Describe a covariate with `n_levels >= 2` levels.
    #[must_use]
    pub fn new(n_levels: u32) -> Self {
        debug_assert!(n_levels >= 2, "a factor needs at least two levels");
        Self { n_levels }
    }

    /// Return the level count.
    #[must_use]
    pub fn n_levels(&self) -> u32 {
        self.n_levels
    }

    /// Number of packed `u32` words per pattern.
    #[must_use]
    pub fn words_per_pattern(&self) -> usize {
        self.n_levels.div_ceil(WORD_BITS) as usize
    }

    /// Number of distinct binary partitions: `2^(r-1) - 1`, with
    /// complementary pairs counted once. Saturates for `r > 64`.
    #[must_use]
    pub fn partition_count(&self) -> u64 {
        match 1u64.checked_shl(self.n_levels - 1) {
            Some(p) => p - 1,
            None => u64::MAX,
        }
    }

    /// True when every partition can be enumerated exactly under the
    /// configured level bound.
    #[must_use]
    pub fn exact_enumerable(&self, max_exact_levels: u32) -> bool {
        self.n_levels <= max_exact_levels
    }

    /// Enumerate every distinct binary partition.
    ///
    /// Pattern `x` in `1..=2^(r-1)-1` assigns levels `1..r` left by the
    /// bits of `x`; the highest level is always right, which counts each
    /// complementary pair exactly once. Only meaningful when
    /// [`Factor::exact_enumerable`] holds for the caller's bound.
    #[must_use]
    pub fn enumerate(&self) -> Vec<MwcpPattern> {
        let count = self.partition_count();
        let mut patterns = Vec::with_capacity(count as usize);
        for x in 1..=count {
            let mut words = vec![0u32; self.words_per_pattern()];
            for bit in 0..(self.n_levels - 1) {
                if x & (1 << bit) != 0 {
                    words[(bit / WORD_BITS) as usize] |= 1 << (bit % WORD_BITS);
                }
            }
            patterns.push(MwcpPattern { words });
        }
        patterns
    }

    /// Draw a random non-degenerate partition (the sampling fallback for
    /// level counts beyond the exact-enumeration bound).
    ///
    /// Each level joins the left coalition with probability 1/2;
    /// degenerate all-one-side draws are rejected and redrawn. The
    /// result is canonicalized with the highest level on the right.
    pub fn random_pattern(&self, rng: &mut impl Rng) -> MwcpPattern {
        loop {
            let mut words = vec![0u32; self.words_per_pattern()];
            let mut left = 0u32;
            for bit in 0..self.n_levels {
                if rng.r#gen::<bool>() {
                    words[(bit / WORD_BITS) as usize] |= 1 << (bit % WORD_BITS);
                    left += 1;
                }
            }
            if left == 0 || left == self.n_levels {
                continue;
            }
            let mut pattern = MwcpPattern { words };
            if pattern.goes_left(self.n_levels) {
                // Complement so the highest level sits on the right.
                for (w, word) in pattern.words.iter_mut().enumerate() {
                    let bits_here =
                        (self.n_levels - (w as u32) * WORD_BITS).min(WORD_BITS);
                    let mask = if bits_here == WORD_BITS {
                        u32::MAX
                    } else {
                        (1 << bits_here) - 1
                    };
                    *word = !*word & mask;
                }
            }
            return pattern;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{Factor, MwcpPattern};

    #[test]
    fn three_levels_three_partitions() {
        let f = Factor::new(3);
        assert_eq!(f.partition_count(), 3);
        let patterns = f.enumerate();
        assert_eq!(patterns.len(), 3);

        // x=1: {1} | {2,3};  x=2: {2} | {1,3};  x=3: {1,2} | {3}
        assert!(patterns[0].goes_left(1));
        assert!(!patterns[0].goes_left(2));
        assert!(!patterns[0].goes_left(3));

        assert!(!patterns[1].goes_left(1));
        assert!(patterns[1].goes_left(2));

        assert!(patterns[2].goes_left(1));
        assert!(patterns[2].goes_left(2));
        assert!(!patterns[2].goes_left(3));
    }

    #[test]
    fn highest_level_always_right_in_enumeration() {
        let f = Factor::new(5);
        assert_eq!(f.partition_count(), 15);
        for p in f.enumerate() {
            assert!(!p.goes_left(5));
        }
    }

    #[test]
    fn partition_count_saturates() {
        let f = Factor::new(80);
        assert_eq!(f.partition_count(), u64::MAX);
        assert!(!f.exact_enumerable(12));
    }

    #[test]
    fn multiword_pattern_bits() {
        let p = MwcpPattern::from_words(vec![0, 0b10]);
        // Bit 33 → level 34.
        assert!(p.goes_left(34));
        assert!(!p.goes_left(33));
        assert!(!p.goes_left(1));
    }

    #[test]
    fn random_pattern_nondegenerate_and_canonical() {
        let f = Factor::new(40);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let p = f.random_pattern(&mut rng);
            let left = (1..=40).filter(|&k| p.goes_left(k)).count();
            assert!(left > 0 && left < 40);
            assert!(!p.goes_left(40));
        }
    }
}
