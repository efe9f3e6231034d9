//! Generalized best-split search.
//!
//! For a node, draws a random candidate-covariate subset through the
//! weighted sampler, builds a split vector per covariate (midpoint
//! thresholds for continuous covariates, level partitions from the
//! factor codec for categorical ones), scores every admissible split
//! under the configured rule and keeps the first-encountered maximum.

use rand::Rng;

use crate::data::{ColumnKind, Dataset};
use crate::factor::Factor;
use crate::impute::TreeData;
use crate::node::{CovariateIndex, SplitValue};
use crate::rules::{CustomSplitFn, PseudoColumn, RuleEvaluator, SplitRule};
use crate::sampling::WeightedSampler;
use crate::survival::TimeGrid;

/// Number of pseudo-responses drawn per node for unsupervised splitting.
const UNSUPERVISED_PSEUDO_RESPONSES: usize = 1;

/// The winning split for a node.
#[derive(Debug, Clone)]
pub(crate) struct BestSplit {
    pub covariate: CovariateIndex,
    pub value: SplitValue,
    pub statistic: f64,
    /// Full member partition (missing-valued members routed to the
    /// larger daughter).
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

/// Node-independent inputs to the split search, built once per tree.
pub(crate) struct SplitSearch<'a> {
    pub dataset: &'a Dataset,
    pub grid: Option<&'a TimeGrid>,
    pub rule: SplitRule,
    pub event_weights: &'a [f64],
    pub custom: Option<&'a std::sync::Arc<Box<CustomSplitFn>>>,
    /// Per-covariate selection weights; excluded covariates carry 0.
    pub covariate_weights: &'a [f64],
    pub mtry: usize,
    pub nodesize: usize,
    pub max_exact_levels: u32,
    /// Random partitions drawn per categorical covariate beyond the
    /// exact-enumeration bound.
    pub fallback_partition_draws: usize,
}

impl SplitSearch<'_> {
    /// Find the best admissible split for a node, or `None` when the
    /// node must become terminal.
    pub(crate) fn best_split(
        &self,
        x: &TreeData<'_>,
        members: &[usize],
        rng: &mut impl Rng,
    ) -> Option<BestSplit> {
        let permissible: Vec<usize> = (0..self.dataset.n_covariates())
            .filter(|&j| self.covariate_weights[j] > 0.0)
            .collect();
        if permissible.is_empty() {
            return None;
        }

        // Unsupervised splitting consumes part of the permissible set as
        // pseudo-responses; the rest remain candidates.
        let (pseudo, candidates_from) = if self.rule == SplitRule::Unsupervised {
            self.draw_pseudo_responses(x, &permissible, rng)?
        } else {
            (Vec::new(), permissible)
        };

        let weights: Vec<f64> = candidates_from
            .iter()
            .map(|&j| self.covariate_weights[j])
            .collect();
        let mut sampler = WeightedSampler::weighted(&candidates_from, &weights);

        let mut best: Option<BestSplit> = None;
        let mut best_stat = 0.0;
        let budget = self.mtry.min(sampler.len());

        for _ in 0..budget {
            let j = sampler.draw_remove(rng);

            let non_missing: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&i| !x.value(j, i).is_nan())
                .collect();
            if non_missing.len() < 2 * self.nodesize {
                continue;
            }

            let evaluator = RuleEvaluator::new(
                self.rule,
                self.dataset,
                self.grid,
                self.event_weights,
                self.custom,
                &pseudo,
                &non_missing,
            );

            let found = match self.dataset.covariate(j).kind() {
                ColumnKind::Continuous => {
                    self.scan_continuous(x, j, &non_missing, &evaluator, rng)
                }
                ColumnKind::Categorical { n_levels } => {
                    self.scan_categorical(x, j, n_levels, &non_missing, &evaluator, rng)
                }
            };

            if let Some((value, stat)) = found {
                if stat > best_stat {
                    best_stat = stat;
                    let (left, right) = partition_members(x, j, &value, members);
                    best = Some(BestSplit {
                        covariate: CovariateIndex::new(j),
                        value,
                        statistic: stat,
                        left,
                        right,
                    });
                }
            }
        }

        best
    }

    /// Scan midpoint thresholds of the sorted distinct values; returns
    /// the covariate-local best (value, statistic).
    fn scan_continuous(
        &self,
        x: &TreeData<'_>,
        j: usize,
        non_missing: &[usize],
        evaluator: &RuleEvaluator<'_>,
        rng: &mut impl Rng,
    ) -> Option<(SplitValue, f64)> {
        let mut sorted: Vec<(f64, usize)> = non_missing
            .iter()
            .map(|&i| (x.value(j, i), i))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Candidate cut positions sit where the value changes.
        let cuts: Vec<usize> = (0..sorted.len() - 1)
            .filter(|&p| sorted[p].0 != sorted[p + 1].0)
            .collect();
        if cuts.is_empty() {
            // Single distinct value contributes no candidate splits.
            return None;
        }

        let chosen: Vec<usize> = if self.rule == SplitRule::Random {
            vec![cuts[rng.gen_range(0..cuts.len())]]
        } else {
            cuts
        };

        let mut best: Option<(SplitValue, f64)> = None;
        let mut best_stat = 0.0;
        for p in chosen {
            let n_left = p + 1;
            let n_right = sorted.len() - n_left;
            if n_left < self.nodesize || n_right < self.nodesize {
                continue;
            }
            let left: Vec<usize> = sorted[..n_left].iter().map(|&(_, i)| i).collect();
            let right: Vec<usize> = sorted[n_left..].iter().map(|&(_, i)| i).collect();
            if let Some(stat) = evaluator.statistic(&left, &right) {
                if stat > best_stat {
                    best_stat = stat;
                    let threshold = (sorted[p].0 + sorted[p + 1].0) / 2.0;
                    best = Some((SplitValue::Continuous(threshold), stat));
                }
            }
        }
        best
    }

    /// Scan level partitions: exhaustive below the exact-enumeration
    /// bound, randomly sampled patterns above it.
    fn scan_categorical(
        &self,
        x: &TreeData<'_>,
        j: usize,
        n_levels: u32,
        non_missing: &[usize],
        evaluator: &RuleEvaluator<'_>,
        rng: &mut impl Rng,
    ) -> Option<(SplitValue, f64)> {
        let factor = Factor::new(n_levels);
        let patterns = if self.rule == SplitRule::Random {
            vec![factor.random_pattern(rng)]
        } else if factor.exact_enumerable(self.max_exact_levels) {
            factor.enumerate()
        } else {
            (0..self.fallback_partition_draws)
                .map(|_| factor.random_pattern(rng))
                .collect()
        };

        let mut best: Option<(SplitValue, f64)> = None;
        let mut best_stat = 0.0;
        for pattern in patterns {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for &i in non_missing {
                if pattern.goes_left(x.value(j, i) as u32) {
                    left.push(i);
                } else {
                    right.push(i);
                }
            }
            if left.len() < self.nodesize || right.len() < self.nodesize {
                continue;
            }
            if let Some(stat) = evaluator.statistic(&left, &right) {
                if stat > best_stat {
                    best_stat = stat;
                    best = Some((SplitValue::Categorical(pattern), stat));
                }
            }
        }
        best
    }

    /// Draw pseudo-response covariates for unsupervised splitting and
    /// materialize their (imputed) columns; the remainder of the
    /// permissible set stays available as split candidates.
    fn draw_pseudo_responses(
        &self,
        x: &TreeData<'_>,
        permissible: &[usize],
        rng: &mut impl Rng,
    ) -> Option<(Vec<PseudoColumn>, Vec<usize>)> {
        if permissible.len() <= UNSUPERVISED_PSEUDO_RESPONSES {
            return None;
        }
        let mut sampler = WeightedSampler::uniform(permissible.to_vec());
        let mut pseudo = Vec::with_capacity(UNSUPERVISED_PSEUDO_RESPONSES);
        let mut taken = Vec::with_capacity(UNSUPERVISED_PSEUDO_RESPONSES);
        for _ in 0..UNSUPERVISED_PSEUDO_RESPONSES {
            let j = sampler.draw_remove(rng);
            pseudo.push(PseudoColumn::from_covariate(
                self.dataset.covariate(j).kind(),
                x.column_values(j),
            ));
            taken.push(j);
        }
        let rest: Vec<usize> = permissible
            .iter()
            .copied()
            .filter(|j| !taken.contains(j))
            .collect();
        Some((pseudo, rest))
    }
}

/// Partition the full member list by the chosen split; members missing
/// the split covariate follow the larger non-missing daughter (left on
/// ties).
fn partition_members(
    x: &TreeData<'_>,
    j: usize,
    value: &SplitValue,
    members: &[usize],
) -> (Vec<usize>, Vec<usize>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut missing = Vec::new();
    for &i in members {
        let v = x.value(j, i);
        if v.is_nan() {
            missing.push(i);
            continue;
        }
        let goes_left = match value {
            SplitValue::Continuous(threshold) => v <= *threshold,
            SplitValue::Categorical(pattern) => pattern.goes_left(v as u32),
        };
        if goes_left {
            left.push(i);
        } else {
            right.push(i);
        }
    }
    if left.len() >= right.len() {
        left.extend(missing);
    } else {
        right.extend(missing);
    }
    (left, right)
}
