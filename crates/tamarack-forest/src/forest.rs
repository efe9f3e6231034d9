//! Forest training: bootstrap, parallel tree construction, ensemble merge.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::config::{
    BootstrapMode, EnsembleMode, ForestConfig, MissingPolicy, RngMode, resolve_mtry,
};
use crate::data::{Dataset, Family, ResponseSpec};
use crate::ensemble::{Ensemble, EnsembleEstimates, EnsembleLayout};
use crate::error::ForestError;
use crate::metrics::compute_performance;
use crate::result::{ForestResult, TrainingMetadata};
use crate::rules::{CustomSplitFn, SplitRule};
use crate::sampling::WeightedSampler;
use crate::split::SplitSearch;
use crate::survival::TimeGrid;
use crate::tree::{GrowContext, Tree, grow_tree};

/// A fitted forest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Forest {
    pub(crate) trees: Vec<Tree>,
    pub(crate) n_covariates: usize,
    pub(crate) family: Family,
    pub(crate) grid: Option<TimeGrid>,
    pub(crate) layout: EnsembleLayout,
}

impl Forest {
    /// Return the trees.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of covariates the forest was trained on.
    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.n_covariates
    }

    /// Return the model family.
    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    /// Return the event-time grid (survival families only).
    #[must_use]
    pub fn time_grid(&self) -> Option<&TimeGrid> {
        self.grid.as_ref()
    }

    /// Score held-out cases: every tree contributes its leaf prediction
    /// for every row, so each denominator equals the tree count.
    ///
    /// `rows[case][covariate]` — row-major, `NaN` = missing (routed to
    /// the larger daughter at affected splits).
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::PredictionCovariateMismatch`] when a row
    /// length differs from the training covariate count.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<EnsembleEstimates, ForestError> {
        for row in rows {
            if row.len() != self.n_covariates {
                return Err(ForestError::PredictionCovariateMismatch {
                    expected: self.n_covariates,
                    got: row.len(),
                });
            }
        }
        let mut ensemble = Ensemble::with_layout(rows.len(), &self.layout);
        for tree in &self.trees {
            for (case, row) in rows.iter().enumerate() {
                let leaf = tree.leaf_index(|j| row[j]);
                let stats = tree.nodes()[leaf.index()]
                    .terminal()
                    .expect("routing always ends at a leaf")
                    .stats();
                ensemble.add_case(case, stats);
            }
        }
        Ok(ensemble.finalize())
    }
}

/// Everything a per-tree task reads; shared immutably across workers.
struct TrainShared<'a> {
    dataset: &'a Dataset,
    grid: Option<&'a TimeGrid>,
    rule: SplitRule,
    mtry: usize,
    nodesize: usize,
    max_depth: Option<usize>,
    impute: bool,
    full_ensemble: bool,
    bootstrap: &'a BootstrapMode,
    case_weights: &'a [f64],
    covariate_weights: &'a [f64],
    event_weights: &'a [f64],
    custom: Option<&'a std::sync::Arc<Box<CustomSplitFn>>>,
    max_exact_levels: u32,
    fallback_partition_draws: usize,
}

struct TreeOutcome {
    tree: Tree,
    inbag_counts: Vec<u32>,
    oob_partial: Ensemble,
    full_partial: Option<Ensemble>,
}

/// Draw one tree's bootstrap sample. Returns the member multiset and the
/// per-case multiplicity vector; unsampled cases are the tree's
/// out-of-bag set.
fn draw_bootstrap(
    shared: &TrainShared<'_>,
    tree_index: usize,
    rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<u32>) {
    let n = shared.dataset.n_cases();
    let mut counts = vec![0u32; n];
    let members = match shared.bootstrap {
        BootstrapMode::WithReplacement => {
            let indices: Vec<usize> = (0..n).collect();
            let sampler = WeightedSampler::weighted(&indices, shared.case_weights);
            (0..n).map(|_| sampler.draw(rng)).collect::<Vec<usize>>()
        }
        BootstrapMode::WithoutReplacement { fraction } => {
            let k = ((n as f64) * fraction).ceil() as usize;
            let indices: Vec<usize> = (0..n).collect();
            let mut sampler = WeightedSampler::weighted(&indices, shared.case_weights);
            (0..k.min(n)).map(|_| sampler.draw_remove(rng)).collect()
        }
        BootstrapMode::Provided(memberships) => memberships[tree_index].clone(),
    };
    for &i in &members {
        counts[i] += 1;
    }
    (members, counts)
}

fn grow_one(shared: &TrainShared<'_>, tree_index: usize, rng: &mut ChaCha8Rng) -> TreeOutcome {
    let (members, inbag_counts) = draw_bootstrap(shared, tree_index, rng);

    let ctx = GrowContext {
        dataset: shared.dataset,
        grid: shared.grid,
        search: SplitSearch {
            dataset: shared.dataset,
            grid: shared.grid,
            rule: shared.rule,
            event_weights: shared.event_weights,
            custom: shared.custom,
            covariate_weights: shared.covariate_weights,
            mtry: shared.mtry,
            nodesize: shared.nodesize,
            max_exact_levels: shared.max_exact_levels,
            fallback_partition_draws: shared.fallback_partition_draws,
        },
        nodesize: shared.nodesize,
        max_depth: shared.max_depth,
        impute: shared.impute,
    };
    let tree = grow_tree(&ctx, members, rng);

    let oob_cases: Vec<usize> = (0..shared.dataset.n_cases())
        .filter(|&i| inbag_counts[i] == 0)
        .collect();
    let mut oob_partial = Ensemble::new(shared.dataset, shared.grid);
    oob_partial.add_tree(&tree, shared.dataset, &oob_cases);

    let full_partial = shared.full_ensemble.then(|| {
        let all: Vec<usize> = (0..shared.dataset.n_cases()).collect();
        let mut e = Ensemble::new(shared.dataset, shared.grid);
        e.add_tree(&tree, shared.dataset, &all);
        e
    });

    TreeOutcome {
        tree,
        inbag_counts,
        oob_partial,
        full_partial,
    }
}

/// Train the forest.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_cases = dataset.n_cases()))]
pub(crate) fn train(
    config: &ForestConfig,
    dataset: &Dataset,
) -> Result<ForestResult, ForestError> {
    let n_cases = dataset.n_cases();
    let n_covariates = dataset.n_covariates();
    let family = dataset.family();

    // --- Configuration errors: detected before any tree is grown ---
    if config.nodesize == 0 {
        return Err(ForestError::InvalidNodeSize { nodesize: 0 });
    }
    if config.max_depth == Some(0) {
        return Err(ForestError::InvalidMaxDepth { max_depth: 0 });
    }
    let mtry = resolve_mtry(config.mtry, n_covariates)?;
    let rule = config
        .split_rule
        .unwrap_or_else(|| SplitRule::default_for(family));
    if !rule.compatible_with(family) {
        return Err(ForestError::IncompatibleSplitRule {
            rule: rule.name(),
            family: family.name(),
        });
    }
    if rule == SplitRule::Custom && config.custom_rule.is_none() {
        return Err(ForestError::MissingCustomRule);
    }

    let case_weights = validated_weights(config.case_weights.as_deref(), n_cases, "case")?;
    let mut covariate_weights =
        validated_weights(config.covariate_weights.as_deref(), n_covariates, "covariate")?;
    for &(j, _) in dataset.excluded_covariates() {
        covariate_weights[j] = 0.0;
    }
    if covariate_weights.iter().all(|&w| w == 0.0) {
        return Err(ForestError::InvalidWeights {
            which: "covariate",
            reason: "no covariate has positive selection weight".to_string(),
        });
    }
    let n_types = dataset.n_event_types() as usize;
    let event_weights = validated_weights(config.event_weights.as_deref(), n_types, "event")?;

    match &config.bootstrap {
        BootstrapMode::WithoutReplacement { fraction } => {
            if !(*fraction > 0.0 && *fraction <= 1.0) {
                return Err(ForestError::InvalidSubsampleFraction { fraction: *fraction });
            }
        }
        BootstrapMode::Provided(memberships) => {
            if memberships.len() != config.n_trees {
                return Err(ForestError::InvalidBootstrapMembership {
                    reason: format!(
                        "expected {} tree memberships, got {}",
                        config.n_trees,
                        memberships.len()
                    ),
                });
            }
            for (b, members) in memberships.iter().enumerate() {
                if members.is_empty() {
                    return Err(ForestError::InvalidBootstrapMembership {
                        reason: format!("tree {b} membership is empty"),
                    });
                }
                if let Some(&bad) = members.iter().find(|&&i| i >= n_cases) {
                    return Err(ForestError::InvalidBootstrapMembership {
                        reason: format!("tree {b} references case {bad} of {n_cases}"),
                    });
                }
            }
        }
        BootstrapMode::WithReplacement => {}
    }

    let grid = match dataset.response() {
        ResponseSpec::Survival { time, event } => Some(TimeGrid::from_training(time, event)),
        _ => None,
    };

    info!(
        family = family.name(),
        rule = rule.name(),
        mtry,
        nodesize = config.nodesize,
        n_covariates,
        excluded = dataset.excluded_covariates().len(),
        "training forest"
    );

    let shared = TrainShared {
        dataset,
        grid: grid.as_ref(),
        rule,
        mtry,
        nodesize: config.nodesize,
        max_depth: config.max_depth,
        impute: config.missing_policy == MissingPolicy::Impute,
        full_ensemble: config.ensemble_mode == EnsembleMode::All,
        bootstrap: &config.bootstrap,
        case_weights: &case_weights,
        covariate_weights: &covariate_weights,
        event_weights: &event_weights,
        custom: config.custom_rule.as_ref(),
        max_exact_levels: config.max_exact_levels,
        fallback_partition_draws: config.fallback_partition_draws,
    };

    let outcomes: Vec<TreeOutcome> = match config.rng_mode {
        RngMode::Parallel => {
            // Independent per-tree streams, seeded upfront from the
            // master stream; safe to grow concurrently.
            let mut master = ChaCha8Rng::seed_from_u64(config.seed);
            let seeds: Vec<(usize, u64)> =
                (0..config.n_trees).map(|b| (b, master.r#gen())).collect();
            seeds
                .into_par_iter()
                .map(|(b, seed)| {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    grow_one(&shared, b, &mut rng)
                })
                .collect()
        }
        RngMode::Serial => {
            // One advancing stream consumed in tree order.
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            (0..config.n_trees)
                .map(|b| grow_one(&shared, b, &mut rng))
                .collect()
        }
    };

    // The only shared-mutation point: a commutative reduction of the
    // per-tree partials, performed after the parallel section.
    let mut oob = Ensemble::new(dataset, grid.as_ref());
    let mut full = shared
        .full_ensemble
        .then(|| Ensemble::new(dataset, grid.as_ref()));
    let mut trees = Vec::with_capacity(config.n_trees);
    let mut inbag_counts = Vec::with_capacity(config.n_trees);
    for outcome in outcomes {
        oob.merge(&outcome.oob_partial);
        if let (Some(full), Some(partial)) = (full.as_mut(), outcome.full_partial.as_ref()) {
            full.merge(partial);
        }
        trees.push(outcome.tree);
        inbag_counts.push(outcome.inbag_counts);
    }

    debug!(n_trees_grown = trees.len(), "tree growth complete");

    let oob_estimates = oob.finalize();
    let full_estimates = full.as_ref().map(Ensemble::finalize);
    let performance = compute_performance(dataset, grid.as_ref(), &oob_estimates);

    let vimp = config.vimp.as_ref().map(|vc| {
        crate::vimp::compute_vimp(
            &trees,
            dataset,
            grid.as_ref(),
            &inbag_counts,
            &performance,
            vc,
            &covariate_weights,
            config.seed,
        )
    });

    let layout = EnsembleLayout::from_dataset(dataset, grid.as_ref());
    let forest = Forest {
        trees,
        n_covariates,
        family,
        grid,
        layout,
    };

    let metadata = TrainingMetadata {
        n_trees: config.n_trees,
        n_cases,
        n_covariates,
        family,
        mtry_resolved: mtry,
        n_event_types: dataset.n_event_types(),
        excluded_covariates: dataset.excluded_covariates().to_vec(),
    };

    info!("forest training complete");

    Ok(ForestResult::new(
        forest,
        oob_estimates,
        full_estimates,
        performance,
        vimp,
        inbag_counts,
        metadata,
    ))
}

fn validated_weights(
    weights: Option<&[f64]>,
    expected: usize,
    which: &'static str,
) -> Result<Vec<f64>, ForestError> {
    match weights {
        None => Ok(vec![1.0; expected]),
        Some(w) => {
            if w.len() != expected {
                return Err(ForestError::InvalidWeights {
                    which,
                    reason: format!("expected {expected} weights, got {}", w.len()),
                });
            }
            if let Some(bad) = w.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(ForestError::InvalidWeights {
                    which,
                    reason: format!("weight {bad} is negative or non-finite"),
                });
            }
            if w.iter().all(|&v| v == 0.0) {
                return Err(ForestError::InvalidWeights {
                    which,
                    reason: "all weights are zero".to_string(),
                });
            }
            Ok(w.to_vec())
        }
    }
}
