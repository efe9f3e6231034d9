//! Configuration builder for forest training.

use std::sync::Arc;

use crate::data::Dataset;
use crate::error::ForestError;
use crate::result::ForestResult;
use crate::rules::{CustomSplitFn, SplitRule};

/// Strategy for the number of candidate covariates drawn per split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MtryRule {
    /// Square root of the covariate count.
    Sqrt,
    /// One third of the covariate count.
    Third,
    /// Log base 2 of the covariate count.
    Log2,
    /// A fraction of the covariate count (must be in (0.0, 1.0]).
    Fraction(f64),
    /// A fixed count.
    Fixed(usize),
    /// All covariates.
    All,
}

/// How each tree's bootstrap sample is drawn.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapMode {
    /// `n` draws with replacement, weighted by case weights.
    WithReplacement,
    /// A without-replacement subsample of the given fraction of cases.
    WithoutReplacement {
        /// Fraction of cases drawn per tree, in (0.0, 1.0].
        fraction: f64,
    },
    /// Caller-supplied per-tree membership (one index multiset per tree).
    Provided(Vec<Vec<usize>>),
}

/// Pseudo-random stream discipline across trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngMode {
    /// Independent per-tree streams seeded upfront from the master
    /// stream; trees may be grown concurrently and results are invariant
    /// to worker count and completion order.
    Parallel,
    /// One advancing stream consumed in tree order; trees are grown
    /// strictly sequentially and results are identical on any machine.
    Serial,
}

/// Which cases each tree scores into the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleMode {
    /// Out-of-bag cases only.
    OobOnly,
    /// Out-of-bag ensemble plus a full ensemble over every case.
    All,
}

/// How missing covariate values are handled during growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Impute per node from sibling statistics before splitting.
    Impute,
    /// Leave values missing: excluded per covariate during the split
    /// search, routed with the larger daughter afterwards.
    SkipAtSplit,
}

/// Noising scheme for variable importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VimpMode {
    /// Permute the covariate among out-of-bag cases.
    Permute,
    /// Choose a uniformly random side at splits on the covariate.
    Random,
    /// Reflect to the complementary side at splits on the covariate.
    Anti,
}

/// Variable-importance request.
#[derive(Debug, Clone, PartialEq)]
pub struct VimpConfig {
    /// The perturbation scheme.
    pub mode: VimpMode,
    /// Covariate groups tested jointly; `None` tests every covariate
    /// individually.
    pub groups: Option<Vec<Vec<usize>>>,
}

/// Configuration for forest training.
///
/// Construct via [`ForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter            | Default                     |
/// |----------------------|-----------------------------|
/// | `mtry`               | `Sqrt`                      |
/// | `nodesize`           | 1                           |
/// | `max_depth`          | `None` (unlimited)          |
/// | `split_rule`         | family default              |
/// | `bootstrap`          | `WithReplacement`           |
/// | `rng_mode`           | `Parallel`                  |
/// | `ensemble_mode`      | `OobOnly`                   |
/// | `missing_policy`     | `Impute`                    |
/// | `vimp`               | `None` (not computed)       |
/// | `max_exact_levels`   | 12                          |
/// | `fallback_partition_draws` | 32                    |
/// | `seed`               | 42                          |
#[derive(Clone)]
pub struct ForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) mtry: MtryRule,
    pub(crate) nodesize: usize,
    pub(crate) max_depth: Option<usize>,
    pub(crate) split_rule: Option<SplitRule>,
    pub(crate) bootstrap: BootstrapMode,
    pub(crate) rng_mode: RngMode,
    pub(crate) ensemble_mode: EnsembleMode,
    pub(crate) missing_policy: MissingPolicy,
    pub(crate) vimp: Option<VimpConfig>,
    pub(crate) case_weights: Option<Vec<f64>>,
    pub(crate) covariate_weights: Option<Vec<f64>>,
    pub(crate) event_weights: Option<Vec<f64>>,
    pub(crate) max_exact_levels: u32,
    pub(crate) fallback_partition_draws: usize,
    pub(crate) seed: u64,
    pub(crate) custom_rule: Option<Arc<Box<CustomSplitFn>>>,
}

impl std::fmt::Debug for ForestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForestConfig")
            .field("n_trees", &self.n_trees)
            .field("mtry", &self.mtry)
            .field("nodesize", &self.nodesize)
            .field("max_depth", &self.max_depth)
            .field("split_rule", &self.split_rule)
            .field("bootstrap", &self.bootstrap)
            .field("rng_mode", &self.rng_mode)
            .field("ensemble_mode", &self.ensemble_mode)
            .field("missing_policy", &self.missing_policy)
            .field("vimp", &self.vimp)
            .field("seed", &self.seed)
            .field("custom_rule", &self.custom_rule.is_some())
            .finish_non_exhaustive()
    }
}

impl ForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            mtry: MtryRule::Sqrt,
            nodesize: 1,
            max_depth: None,
            split_rule: None,
            bootstrap: BootstrapMode::WithReplacement,
            rng_mode: RngMode::Parallel,
            ensemble_mode: EnsembleMode::OobOnly,
            missing_policy: MissingPolicy::Impute,
            vimp: None,
            case_weights: None,
            covariate_weights: None,
            event_weights: None,
            max_exact_levels: 12,
            fallback_partition_draws: 32,
            seed: 42,
            custom_rule: None,
        })
    }

    // --- Setters ---

    /// Set the candidate-covariate budget rule.
    #[must_use]
    pub fn with_mtry(mut self, mtry: MtryRule) -> Self {
        self.mtry = mtry;
        self
    }

    /// Set the minimum leaf size (nodes at or below it become terminal).
    #[must_use]
    pub fn with_nodesize(mut self, nodesize: usize) -> Self {
        self.nodesize = nodesize;
        self
    }

    /// Set the maximum tree depth. `None` means unlimited.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Select a split rule; `None` picks the family default.
    #[must_use]
    pub fn with_split_rule(mut self, rule: SplitRule) -> Self {
        self.split_rule = Some(rule);
        self
    }

    /// Set the bootstrap mode.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: BootstrapMode) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set the RNG stream discipline.
    #[must_use]
    pub fn with_rng_mode(mut self, rng_mode: RngMode) -> Self {
        self.rng_mode = rng_mode;
        self
    }

    /// Set which cases are folded into the ensemble.
    #[must_use]
    pub fn with_ensemble_mode(mut self, ensemble_mode: EnsembleMode) -> Self {
        self.ensemble_mode = ensemble_mode;
        self
    }

    /// Set the missing-data policy.
    #[must_use]
    pub fn with_missing_policy(mut self, missing_policy: MissingPolicy) -> Self {
        self.missing_policy = missing_policy;
        self
    }

    /// Request variable importance.
    #[must_use]
    pub fn with_vimp(mut self, vimp: VimpConfig) -> Self {
        self.vimp = Some(vimp);
        self
    }

    /// Set per-case bootstrap weights (default uniform).
    #[must_use]
    pub fn with_case_weights(mut self, weights: Vec<f64>) -> Self {
        self.case_weights = Some(weights);
        self
    }

    /// Set per-covariate selection weights (default uniform).
    #[must_use]
    pub fn with_covariate_weights(mut self, weights: Vec<f64>) -> Self {
        self.covariate_weights = Some(weights);
        self
    }

    /// Set per-event-type weights for the competing-risk rules.
    #[must_use]
    pub fn with_event_weights(mut self, weights: Vec<f64>) -> Self {
        self.event_weights = Some(weights);
        self
    }

    /// Set the categorical exact-enumeration level bound.
    #[must_use]
    pub fn with_max_exact_levels(mut self, max_exact_levels: u32) -> Self {
        self.max_exact_levels = max_exact_levels;
        self
    }

    /// Set the number of random partitions drawn per categorical
    /// covariate beyond the exact bound.
    #[must_use]
    pub fn with_fallback_partition_draws(mut self, draws: usize) -> Self {
        self.fallback_partition_draws = draws;
        self
    }

    /// Set the master random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Register a custom split objective (used with [`SplitRule::Custom`]).
    #[must_use]
    pub fn with_custom_rule(
        mut self,
        rule: impl Fn(&crate::rules::CustomSplitInputs<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.custom_rule = Some(Arc::new(Box::new(rule)));
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the candidate-covariate budget rule.
    #[must_use]
    pub fn mtry(&self) -> MtryRule {
        self.mtry
    }

    /// Return the minimum leaf size.
    #[must_use]
    pub fn nodesize(&self) -> usize {
        self.nodesize
    }

    /// Return the maximum depth limit, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the selected split rule, if overridden.
    #[must_use]
    pub fn split_rule(&self) -> Option<SplitRule> {
        self.split_rule
    }

    /// Return the bootstrap mode.
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapMode {
        &self.bootstrap
    }

    /// Return the RNG stream discipline.
    #[must_use]
    pub fn rng_mode(&self) -> RngMode {
        self.rng_mode
    }

    /// Return the master seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Train a forest on the dataset.
    ///
    /// # Errors
    ///
    /// Configuration and data errors are detected before any tree is
    /// grown and abort the whole call; see [`ForestError`] variants.
    pub fn fit(&self, dataset: &Dataset) -> Result<ForestResult, ForestError> {
        crate::forest::train(self, dataset)
    }
}

/// Resolve an [`MtryRule`] to a concrete candidate count.
pub(crate) fn resolve_mtry(mtry: MtryRule, n_covariates: usize) -> Result<usize, ForestError> {
    let resolved = match mtry {
        MtryRule::Sqrt => (n_covariates as f64).sqrt().ceil() as usize,
        MtryRule::Third => (n_covariates as f64 / 3.0).ceil() as usize,
        MtryRule::Log2 => (n_covariates as f64).log2().ceil().max(1.0) as usize,
        MtryRule::Fraction(f) => (n_covariates as f64 * f).ceil() as usize,
        MtryRule::Fixed(n) => n,
        MtryRule::All => n_covariates,
    };
    if resolved == 0 || resolved > n_covariates {
        return Err(ForestError::InvalidMtry {
            mtry: resolved,
            n_covariates,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_trees_rejected() {
        assert!(matches!(
            ForestConfig::new(0),
            Err(ForestError::InvalidTreeCount { n_trees: 0 })
        ));
    }

    #[test]
    fn mtry_resolution() {
        assert_eq!(resolve_mtry(MtryRule::Sqrt, 9).unwrap(), 3);
        assert_eq!(resolve_mtry(MtryRule::Third, 9).unwrap(), 3);
        assert_eq!(resolve_mtry(MtryRule::All, 5).unwrap(), 5);
        assert_eq!(resolve_mtry(MtryRule::Fixed(2), 5).unwrap(), 2);
        assert!(resolve_mtry(MtryRule::Fixed(6), 5).is_err());
        assert!(resolve_mtry(MtryRule::Fixed(0), 5).is_err());
    }

    #[test]
    fn builder_chains() {
        let config = ForestConfig::new(10)
            .unwrap()
            .with_nodesize(3)
            .with_mtry(MtryRule::All)
            .with_seed(7);
        assert_eq!(config.n_trees(), 10);
        assert_eq!(config.nodesize(), 3);
        assert_eq!(config.seed(), 7);
        assert_eq!(config.mtry(), MtryRule::All);
    }
}
