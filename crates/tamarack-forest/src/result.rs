//! Training result types.

use crate::data::{ExclusionReason, Family};
use crate::ensemble::EnsembleEstimates;
use crate::forest::Forest;
use crate::metrics::Performance;
use crate::vimp::VimpEntry;

/// Metadata about the training run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrainingMetadata {
    /// Number of trees grown.
    pub n_trees: usize,
    /// Number of training cases.
    pub n_cases: usize,
    /// Number of covariate columns.
    pub n_covariates: usize,
    /// Model family derived from the response.
    pub family: Family,
    /// Resolved candidate-covariate budget.
    pub mtry_resolved: usize,
    /// Number of event types (0 unless survival).
    pub n_event_types: u32,
    /// Covariates excluded from splitting, with reasons.
    pub excluded_covariates: Vec<(usize, ExclusionReason)>,
}

/// Result of forest training: the fitted forest, the out-of-bag (and
/// optionally full) ensembles, performance, importance, and the per-tree
/// in-bag membership counts.
#[derive(Debug)]
pub struct ForestResult {
    forest: Forest,
    oob: EnsembleEstimates,
    full: Option<EnsembleEstimates>,
    performance: Performance,
    vimp: Option<Vec<VimpEntry>>,
    inbag_counts: Vec<Vec<u32>>,
    metadata: TrainingMetadata,
}

impl ForestResult {
    pub(crate) fn new(
        forest: Forest,
        oob: EnsembleEstimates,
        full: Option<EnsembleEstimates>,
        performance: Performance,
        vimp: Option<Vec<VimpEntry>>,
        inbag_counts: Vec<Vec<u32>>,
        metadata: TrainingMetadata,
    ) -> Self {
        Self {
            forest,
            oob,
            full,
            performance,
            vimp,
            inbag_counts,
            metadata,
        }
    }

    /// Borrow the fitted forest.
    #[must_use]
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Consume the result and return the fitted forest.
    #[must_use]
    pub fn into_forest(self) -> Forest {
        self.forest
    }

    /// Out-of-bag ensemble estimates (cases with no out-of-bag tree hold
    /// `NaN` and a zero denominator).
    #[must_use]
    pub fn oob_ensemble(&self) -> &EnsembleEstimates {
        &self.oob
    }

    /// Full ensemble over every case, when requested via
    /// [`crate::config::EnsembleMode::All`].
    #[must_use]
    pub fn full_ensemble(&self) -> Option<&EnsembleEstimates> {
        self.full.as_ref()
    }

    /// Out-of-bag performance.
    #[must_use]
    pub fn performance(&self) -> &Performance {
        &self.performance
    }

    /// Variable importance, when requested.
    #[must_use]
    pub fn vimp(&self) -> Option<&[VimpEntry]> {
        self.vimp.as_deref()
    }

    /// Per-tree in-bag multiplicity of every case
    /// (`inbag_counts()[tree][case]`); zero marks out-of-bag.
    #[must_use]
    pub fn inbag_counts(&self) -> &[Vec<u32>] {
        &self.inbag_counts
    }

    /// Training metadata.
    #[must_use]
    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }
}
