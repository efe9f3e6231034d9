//! Weighted sampling over a live index set.
//!
//! Bootstrap draws and candidate-covariate selection both sample from a
//! weighted index set, with or without replacement. The sampler keeps a
//! cumulative-distribution array over the live indices plus the index
//! array itself, so a drawn index can be removed without rebuilding the
//! whole state. Built fresh for each draw episode and discarded after.

use rand::Rng;

/// Classification of a weight vector, detected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    /// All weights equal: O(1) draws, O(1) swap-removal.
    Uniform,
    /// All weights non-negative integers.
    Integer,
    /// Arbitrary non-negative reals.
    Generic,
}

/// Sampling state over a weighted index set.
///
/// Invariants: the CDF is non-decreasing and its last entry equals the
/// total remaining weight; removing a drawn index reduces the total by
/// exactly that index's weight. Drawing from an exhausted sampler is a
/// programming error and panics rather than returning a stale index.
#[derive(Debug, Clone)]
pub struct WeightedSampler {
    kind: WeightKind,
    /// Live indices; for weighted kinds sorted by descending weight at
    /// construction (the accelerator order, which also fixes tie-breaks).
    index: Vec<usize>,
    /// Per-slot weights, parallel to `index` (empty for Uniform).
    weights: Vec<f64>,
    /// Prefix sums over `weights` (empty for Uniform).
    cdf: Vec<f64>,
}

impl WeightedSampler {
    /// Build a uniform sampler over `indices`.
    #[must_use]
    pub fn uniform(indices: Vec<usize>) -> Self {
        Self {
            kind: WeightKind::Uniform,
            index: indices,
            weights: Vec::new(),
            cdf: Vec::new(),
        }
    }

    /// Build a sampler over `indices` with per-index `weights`.
    ///
    /// Indices with zero weight are dropped up front (they can never be
    /// drawn). Detects the weight kind; a uniform vector degrades to the
    /// O(1) path. Weighted construction sorts by descending weight,
    /// O(n log n).
    #[must_use]
    pub fn weighted(indices: &[usize], weights: &[f64]) -> Self {
        debug_assert_eq!(indices.len(), weights.len());
        debug_assert!(weights.iter().all(|&w| w >= 0.0 && w.is_finite()));

        let live: Vec<(usize, f64)> = indices
            .iter()
            .copied()
            .zip(weights.iter().copied())
            .filter(|&(_, w)| w > 0.0)
            .collect();

        let first = live.first().map_or(1.0, |&(_, w)| w);
        if live.iter().all(|&(_, w)| w == first) {
            return Self::uniform(live.into_iter().map(|(i, _)| i).collect());
        }

        let kind = if live.iter().all(|&(_, w)| w.fract() == 0.0) {
            WeightKind::Integer
        } else {
            WeightKind::Generic
        };

        let mut sorted = live;
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut index = Vec::with_capacity(sorted.len());
        let mut w = Vec::with_capacity(sorted.len());
        let mut cdf = Vec::with_capacity(sorted.len());
        let mut running = 0.0;
        for (i, wi) in sorted {
            index.push(i);
            w.push(wi);
            running += wi;
            cdf.push(running);
        }

        Self {
            kind,
            index,
            weights: w,
            cdf,
        }
    }

    /// Return the detected weight kind.
    #[must_use]
    pub fn kind(&self) -> WeightKind {
        self.kind
    }

    /// Number of live indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no indices remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total remaining weight.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        match self.kind {
            WeightKind::Uniform => self.index.len() as f64,
            _ => self.cdf.last().copied().unwrap_or(0.0),
        }
    }

    /// Draw a slot with probability proportional to its weight, leaving
    /// the state unchanged (with-replacement semantics).
    ///
    /// # Panics
    ///
    /// Panics when the sampler is exhausted; reaching that state is an
    /// invariant violation in the caller, never recoverable.
    pub fn draw(&self, rng: &mut impl Rng) -> usize {
        assert!(
            !self.index.is_empty(),
            "draw from an exhausted sampling state"
        );
        match self.kind {
            WeightKind::Uniform => self.index[rng.gen_range(0..self.index.len())],
            _ => {
                let u = rng.r#gen::<f64>() * self.total_weight();
                // First slot whose cumulative weight exceeds u; ties
                // resolve by the accelerator order, deterministically.
                let slot = self.cdf.partition_point(|&c| c <= u);
                self.index[slot.min(self.index.len() - 1)]
            }
        }
    }

    /// Draw a slot and remove it (without-replacement semantics).
    ///
    /// Removal preserves the relative weights of the remaining indices:
    /// O(1) for uniform state, O(k) CDF-tail rebuild from the removal
    /// point otherwise.
    ///
    /// # Panics
    ///
    /// Panics when the sampler is exhausted, as [`WeightedSampler::draw`].
    pub fn draw_remove(&mut self, rng: &mut impl Rng) -> usize {
        assert!(
            !self.index.is_empty(),
            "draw from an exhausted sampling state"
        );
        match self.kind {
            WeightKind::Uniform => {
                let slot = rng.gen_range(0..self.index.len());
                self.index.swap_remove(slot)
            }
            _ => {
                let u = rng.r#gen::<f64>() * self.total_weight();
                let slot = self.cdf.partition_point(|&c| c <= u);
                let slot = slot.min(self.index.len() - 1);
                let drawn = self.index.remove(slot);
                self.weights.remove(slot);
                self.cdf.truncate(slot);
                let mut running = if slot == 0 { 0.0 } else { self.cdf[slot - 1] };
                for &w in &self.weights[slot..] {
                    running += w;
                    self.cdf.push(running);
                }
                drawn
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{WeightKind, WeightedSampler};

    #[test]
    fn uniform_without_replacement_exhausts_exactly_once() {
        let mut sampler = WeightedSampler::uniform((0..8).collect());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut seen = vec![0usize; 8];
        for _ in 0..8 {
            seen[sampler.draw_remove(&mut rng)] += 1;
        }
        assert!(sampler.is_empty());
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn draw_order_depends_only_on_seed() {
        let draws = |seed: u64| -> Vec<usize> {
            let mut s = WeightedSampler::weighted(&[0, 1, 2, 3], &[1.0, 2.0, 3.0, 4.0]);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..4).map(|_| s.draw_remove(&mut rng)).collect()
        };
        assert_eq!(draws(9), draws(9));
    }

    #[test]
    fn removal_subtracts_exactly_the_drawn_weight() {
        let weights = [0.5, 1.5, 2.0, 4.0];
        let mut sampler = WeightedSampler::weighted(&[0, 1, 2, 3], &weights);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut expected_total: f64 = weights.iter().sum();
        for _ in 0..4 {
            assert!((sampler.total_weight() - expected_total).abs() < 1e-12);
            let drawn = sampler.draw_remove(&mut rng);
            expected_total -= weights[drawn];
        }
        assert!(sampler.is_empty());
        assert!(sampler.total_weight().abs() < 1e-12);
    }

    #[test]
    fn cdf_nondecreasing_after_removals() {
        let mut sampler =
            WeightedSampler::weighted(&[0, 1, 2, 3, 4], &[3.0, 1.0, 4.0, 1.0, 5.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..3 {
            sampler.draw_remove(&mut rng);
            for w in sampler.cdf.windows(2) {
                assert!(w[0] <= w[1]);
            }
            let total: f64 = sampler.weights.iter().sum();
            assert!((sampler.cdf.last().unwrap() - total).abs() < 1e-12);
        }
    }

    #[test]
    fn weight_kind_detection() {
        assert_eq!(
            WeightedSampler::weighted(&[0, 1], &[2.0, 2.0]).kind(),
            WeightKind::Uniform
        );
        assert_eq!(
            WeightedSampler::weighted(&[0, 1], &[1.0, 3.0]).kind(),
            WeightKind::Integer
        );
        assert_eq!(
            WeightedSampler::weighted(&[0, 1], &[0.5, 3.0]).kind(),
            WeightKind::Generic
        );
    }

    #[test]
    fn zero_weight_indices_never_drawn() {
        let mut sampler = WeightedSampler::weighted(&[0, 1, 2], &[1.0, 0.0, 2.0]);
        assert_eq!(sampler.len(), 2);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..2 {
            assert_ne!(sampler.draw_remove(&mut rng), 1);
        }
    }

    #[test]
    fn heavy_weight_dominates_draws() {
        let sampler = WeightedSampler::weighted(&[0, 1], &[99.0, 1.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let heavy = (0..1000).filter(|_| sampler.draw(&mut rng) == 0).count();
        assert!(heavy > 940, "heavy index drawn only {heavy}/1000 times");
    }

    #[test]
    #[should_panic(expected = "exhausted sampling state")]
    fn exhausted_draw_panics() {
        let mut sampler = WeightedSampler::uniform(vec![0]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        sampler.draw_remove(&mut rng);
        sampler.draw_remove(&mut rng);
    }
}
