//! Random forests over tabular data for four model families —
//! classification, regression, survival, and competing-risk survival —
//! with weighted bootstrap resampling, categorical split partitions,
//! in-node missing-value imputation, out-of-bag ensembles and
//! performance, and perturbation-based variable importance.
//!
//! Trees grow in parallel via rayon (or strictly sequentially under
//! [`RngMode::Serial`]); the ensemble is a commutative reduction of
//! per-tree partials, so results never depend on completion order.
//!
//! ```no_run
//! use tamarack_forest::{Column, Dataset, ForestConfig, ResponseSpec};
//!
//! let dataset = Dataset::new(
//!     vec![Column::continuous("age", vec![61.0, 48.0, 55.0, 70.0])],
//!     ResponseSpec::Survival {
//!         time: vec![12.0, 40.0, 31.0, 5.0],
//!         event: vec![1, 0, 1, 1],
//!     },
//! )?;
//! let result = ForestConfig::new(500)?.with_seed(7).fit(&dataset)?;
//! println!("{:?}", result.performance());
//! # Ok::<(), tamarack_forest::ForestError>(())
//! ```

mod config;
mod data;
mod ensemble;
mod error;
mod factor;
mod flatten;
mod forest;
mod impute;
mod metrics;
mod node;
mod result;
mod rules;
mod sampling;
mod serialize;
mod split;
mod survival;
mod terminal;
mod tree;
mod vimp;

pub use config::{
    BootstrapMode, EnsembleMode, ForestConfig, MissingPolicy, MtryRule, RngMode, VimpConfig,
    VimpMode,
};
pub use data::{
    Column, ColumnKind, Dataset, ExclusionReason, Family, MAX_FACTOR_LEVELS, ResponseColumn,
    ResponseSpec,
};
pub use ensemble::{ColumnEstimate, ColumnLayout, EnsembleEstimates, EnsembleLayout, EstimateKind};
pub use error::ForestError;
pub use factor::{Factor, MwcpPattern};
pub use flatten::{FlatForest, FlatTerminal};
pub use forest::Forest;
pub use metrics::{ColumnPerformance, Performance};
pub use node::{CovariateIndex, Node, NodeIndex, SplitValue};
pub use result::{ForestResult, TrainingMetadata};
pub use rules::{CustomSplitFn, CustomSplitInputs, SplitRule, Weighting};
pub use sampling::{WeightKind, WeightedSampler};
pub use survival::TimeGrid;
pub use terminal::{ColumnLeaf, LeafStats, SurvivalLeaf, Terminal};
pub use tree::Tree;
pub use vimp::VimpEntry;
