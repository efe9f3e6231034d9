//! Variable importance by out-of-bag perturbation.
//!
//! For a target covariate (or group), out-of-bag cases are re-routed
//! through each tree under a noised covariate — permuted values, a
//! random side at affected splits, or the complementary ("anti") side —
//! and folded into a perturbed ensemble exactly like the ordinary one.
//! Importance is the perturbed out-of-bag error minus the unperturbed
//! error, per response (and per event type under competing risks).

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::config::{VimpConfig, VimpMode};
use crate::data::Dataset;
use crate::ensemble::Ensemble;
use crate::metrics::{ColumnPerformance, Performance, compute_performance};
use crate::node::{Node, SplitValue};
use crate::survival::TimeGrid;
use crate::tree::Tree;

/// Importance of one covariate (or joint group).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VimpEntry {
    /// The covariates perturbed together.
    pub covariates: Vec<usize>,
    /// Error increase per primary performance component (per response
    /// column, or per event type for survival families).
    pub importance: Vec<f64>,
}

/// The scalar error components a perturbation is differenced against.
pub(crate) fn primary_errors(performance: &Performance) -> Vec<f64> {
    match performance {
        Performance::Survival { error, .. } => error.clone(),
        Performance::Columns(cols) => cols
            .iter()
            .map(|c| match c {
                ColumnPerformance::Classification { error, .. } => *error,
                ColumnPerformance::Regression { mse, .. } => *mse,
            })
            .collect(),
        Performance::None => Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_vimp(
    trees: &[Tree],
    dataset: &Dataset,
    grid: Option<&TimeGrid>,
    inbag_counts: &[Vec<u32>],
    baseline: &Performance,
    vimp_config: &VimpConfig,
    covariate_weights: &[f64],
    seed: u64,
) -> Vec<VimpEntry> {
    let groups: Vec<Vec<usize>> = vimp_config.groups.clone().unwrap_or_else(|| {
        (0..dataset.n_covariates())
            .filter(|&j| covariate_weights[j] > 0.0)
            .map(|j| vec![j])
            .collect()
    });
    let n_groups = groups.len() as u64;
    let base = primary_errors(baseline);

    groups
        .par_iter()
        .enumerate()
        .map(|(group_index, group)| {
            let mut ensemble = Ensemble::new(dataset, grid);
            for (b, tree) in trees.iter().enumerate() {
                let oob: Vec<usize> = (0..dataset.n_cases())
                    .filter(|&i| inbag_counts[b][i] == 0)
                    .collect();
                if oob.is_empty() {
                    continue;
                }
                let tree_seed = seed
                    .wrapping_add((b as u64).wrapping_mul(n_groups))
                    .wrapping_add(group_index as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed);

                let overrides = (vimp_config.mode == VimpMode::Permute)
                    .then(|| permuted_columns(dataset, group, &oob, &mut rng));

                for &case in &oob {
                    let stats = route_perturbed(
                        tree,
                        dataset,
                        case,
                        group,
                        vimp_config.mode,
                        overrides.as_deref(),
                        &mut rng,
                    );
                    ensemble.add_case(case, stats);
                }
            }
            let estimates = ensemble.finalize();
            let perturbed = primary_errors(&compute_performance(dataset, grid, &estimates));
            let importance = perturbed
                .iter()
                .zip(base.iter())
                .map(|(p, b)| p - b)
                .collect();
            VimpEntry {
                covariates: group.clone(),
                importance,
            }
        })
        .collect()
}

/// Permute each target covariate's values among the out-of-bag cases.
fn permuted_columns(
    dataset: &Dataset,
    group: &[usize],
    oob: &[usize],
    rng: &mut ChaCha8Rng,
) -> Vec<(usize, Vec<f64>)> {
    group
        .iter()
        .map(|&j| {
            let mut column = dataset.covariate(j).values().to_vec();
            let mut values: Vec<f64> = oob.iter().map(|&i| column[i]).collect();
            values.shuffle(rng);
            for (&i, &v) in oob.iter().zip(values.iter()) {
                column[i] = v;
            }
            (j, column)
        })
        .collect()
}

/// Route one case to its leaf with the target covariates noised.
fn route_perturbed<'t>(
    tree: &'t Tree,
    dataset: &Dataset,
    case: usize,
    group: &[usize],
    mode: VimpMode,
    overrides: Option<&[(usize, Vec<f64>)]>,
    rng: &mut ChaCha8Rng,
) -> &'t crate::terminal::LeafStats {
    let mut idx = 0usize;
    loop {
        match &tree.nodes()[idx] {
            Node::Leaf { terminal, .. } => return terminal.stats(),
            Node::Split {
                covariate,
                value,
                left,
                right,
                ..
            } => {
                let j = covariate.index();
                let targeted = group.contains(&j);

                let goes_left = if targeted && mode == VimpMode::Random {
                    rng.r#gen::<bool>()
                } else {
                    let v = if targeted && mode == VimpMode::Permute {
                        overrides
                            .expect("permute mode always builds overrides")
                            .iter()
                            .find(|(oj, _)| *oj == j)
                            .map(|(_, col)| col[case])
                            .expect("every targeted covariate has an override")
                    } else {
                        dataset.covariate(j).values()[case]
                    };
                    let natural = if v.is_nan() {
                        tree.nodes()[left.index()].n_members()
                            >= tree.nodes()[right.index()].n_members()
                    } else {
                        match value {
                            SplitValue::Continuous(threshold) => v <= *threshold,
                            SplitValue::Categorical(pattern) => pattern.goes_left(v as u32),
                        }
                    };
                    if targeted && mode == VimpMode::Anti {
                        !natural
                    } else {
                        natural
                    }
                };
                idx = if goes_left { left.index() } else { right.index() };
            }
        }
    }
}
