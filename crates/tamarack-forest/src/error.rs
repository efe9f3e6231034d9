use std::path::PathBuf;

/// Errors from forest construction, prediction, and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when nodesize (minimum leaf size) is zero.
    #[error("nodesize must be at least 1, got {nodesize}")]
    InvalidNodeSize {
        /// The invalid nodesize value provided.
        nodesize: usize,
    },

    /// Returned when max_depth is zero.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when mtry resolves to 0 or exceeds the covariate count.
    #[error("mtry resolved to {mtry}, but must be in [1, {n_covariates}]")]
    InvalidMtry {
        /// The resolved mtry value.
        mtry: usize,
        /// The number of covariates in the dataset.
        n_covariates: usize,
    },

    /// Returned when the subsample fraction is not in (0.0, 1.0].
    #[error("subsample fraction must be in (0.0, 1.0], got {fraction}")]
    InvalidSubsampleFraction {
        /// The invalid fraction provided.
        fraction: f64,
    },

    /// Returned when the selected split rule does not apply to the model family.
    #[error("split rule {rule} is incompatible with the {family} family")]
    IncompatibleSplitRule {
        /// Name of the offending split rule.
        rule: &'static str,
        /// Name of the model family derived from the response.
        family: &'static str,
    },

    /// Returned when `SplitRule::Custom` is selected but no callback is registered.
    #[error("split rule is Custom but no custom objective was registered")]
    MissingCustomRule,

    /// Returned when the training dataset has zero cases.
    #[error("training dataset has zero cases")]
    EmptyDataset,

    /// Returned when the training dataset has zero covariate columns.
    #[error("training dataset has zero covariate columns")]
    ZeroCovariates,

    /// Returned when a column's length differs from the case count.
    #[error("column {name:?} has {got} values, expected {expected}")]
    ColumnLengthMismatch {
        /// Name of the offending column.
        name: String,
        /// The expected number of values (the case count).
        expected: usize,
        /// The actual number of values.
        got: usize,
    },

    /// Returned when a covariate value is infinite (NaN encodes missing and is allowed).
    #[error("infinite value in covariate {covariate} at case {case}")]
    InfiniteValue {
        /// Zero-based covariate column index.
        covariate: usize,
        /// Zero-based case index.
        case: usize,
    },

    /// Returned when a categorical code is not an integer in `1..=n_levels`.
    #[error("covariate {covariate} has invalid level code {code} at case {case} (levels 1..={n_levels})")]
    InvalidLevelCode {
        /// Zero-based covariate column index.
        covariate: usize,
        /// Zero-based case index.
        case: usize,
        /// The offending code value.
        code: f64,
        /// The declared number of levels.
        n_levels: u32,
    },

    /// Returned when a response value is missing or non-finite.
    #[error("non-finite response value in {name:?} at case {case}")]
    NonFiniteResponse {
        /// Name of the offending response column.
        name: String,
        /// Zero-based case index.
        case: usize,
    },

    /// Returned when a survival time is negative or non-finite.
    #[error("invalid survival time {time} at case {case}")]
    InvalidSurvivalTime {
        /// Zero-based case index.
        case: usize,
        /// The offending time value.
        time: f64,
    },

    /// Returned when the survival data contains no uncensored events.
    #[error("survival response contains no events (all cases censored)")]
    NoEvents,

    /// Returned when a weight vector has the wrong length or a negative entry.
    #[error("{which} weights invalid: {reason}")]
    InvalidWeights {
        /// Which weight vector is invalid ("case", "covariate", or "event").
        which: &'static str,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Returned when a caller-supplied bootstrap membership is malformed.
    #[error("provided bootstrap membership invalid: {reason}")]
    InvalidBootstrapMembership {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Returned when a prediction input has the wrong covariate count.
    #[error("prediction input has {got} covariates, expected {expected}")]
    PredictionCovariateMismatch {
        /// The expected number of covariates.
        expected: usize,
        /// The actual number provided.
        got: usize,
    },

    /// Returned when a flattened forest fails structural validation on restore.
    #[error("flattened forest is malformed: {reason}")]
    MalformedFlatForest {
        /// Human-readable description of the structural problem.
        reason: String,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },
}
