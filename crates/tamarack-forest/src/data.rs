//! Column-typed training data: covariate matrix, response model, weights.

use crate::error::ForestError;

/// Hard cap on categorical level counts; columns beyond it are excluded
/// from splitting rather than aborting the whole forest.
pub const MAX_FACTOR_LEVELS: u32 = 1024;

/// The measurement type of a covariate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColumnKind {
    /// Ordered real-valued measurements; split by threshold.
    Continuous,
    /// Unordered levels coded `1..=n_levels`; split by level partition.
    Categorical {
        /// Number of distinct levels.
        n_levels: u32,
    },
}

/// One covariate column in column-major storage.
///
/// Values are `f64` for both kinds; categorical codes are integers
/// `1..=n_levels` stored as `f64`. `NaN` encodes a missing value in
/// either kind.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    values: Vec<f64>,
}

impl Column {
    /// Create a continuous column.
    pub fn continuous(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Continuous,
            values,
        }
    }

    /// Create a categorical column with codes `1..=n_levels`.
    pub fn categorical(name: impl Into<String>, n_levels: u32, codes: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Categorical { n_levels },
            values: codes,
        }
    }

    /// Return the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the column kind.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Return the raw values (`NaN` = missing).
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// One response column for the classification/regression/multivariate families.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ResponseColumn {
    /// Zero-based class labels.
    Classification {
        /// Response name.
        name: String,
        /// Class label per case.
        labels: Vec<usize>,
        /// Number of distinct classes.
        n_classes: usize,
    },
    /// Real-valued response.
    Regression {
        /// Response name.
        name: String,
        /// Response value per case.
        values: Vec<f64>,
    },
}

impl ResponseColumn {
    /// Return the response name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ResponseColumn::Classification { name, .. } | ResponseColumn::Regression { name, .. } => {
                name
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            ResponseColumn::Classification { labels, .. } => labels.len(),
            ResponseColumn::Regression { values, .. } => values.len(),
        }
    }
}

/// The response specification, from which the model family is derived.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ResponseSpec {
    /// No response; splits are judged on pseudo-responses (unsupervised).
    None,
    /// One or more classification/regression columns.
    Columns(Vec<ResponseColumn>),
    /// Right-censored survival times with event-type codes.
    Survival {
        /// Observed time per case.
        time: Vec<f64>,
        /// Event code per case: 0 = censored, `1..=J` = event type.
        event: Vec<u32>,
    },
}

/// Model family, derived from the response specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Family {
    /// Single categorical response.
    Classification,
    /// Single continuous response.
    Regression,
    /// Time-to-event response with a single event type.
    Survival,
    /// Time-to-event response with multiple event types.
    CompetingRisk,
    /// Two or more response columns.
    Multivariate,
    /// No response.
    Unsupervised,
}

impl Family {
    /// Stable name for error messages and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Family::Classification => "classification",
            Family::Regression => "regression",
            Family::Survival => "survival",
            Family::CompetingRisk => "competing-risk",
            Family::Multivariate => "multivariate",
            Family::Unsupervised => "unsupervised",
        }
    }
}

/// Why a covariate was excluded from splitting.
///
/// Exclusions are data errors local to one variable: growth proceeds on
/// the remaining covariates and the exclusion is recorded in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExclusionReason {
    /// Every value in the column is missing.
    AllMissing,
    /// The categorical level count exceeds the representable partition space.
    TooManyLevels,
}

/// A validated training dataset.
///
/// Covariates are column-major; `NaN` encodes missing covariate values
/// (imputed per node during growth). Response values must be complete.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Dataset {
    covariates: Vec<Column>,
    response: ResponseSpec,
    n_cases: usize,
    n_event_types: u32,
    has_missing: bool,
    excluded: Vec<(usize, ExclusionReason)>,
}

impl Dataset {
    /// Validate and assemble a dataset.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | zero cases |
    /// | [`ForestError::ZeroCovariates`] | no covariate columns |
    /// | [`ForestError::ColumnLengthMismatch`] | any column length differs from the case count |
    /// | [`ForestError::InfiniteValue`] | a covariate value is ±∞ (`NaN` is allowed) |
    /// | [`ForestError::InvalidLevelCode`] | a categorical code is not an integer in `1..=n_levels` |
    /// | [`ForestError::NonFiniteResponse`] | a response value is missing or non-finite |
    /// | [`ForestError::InvalidSurvivalTime`] | a survival time is negative or non-finite |
    /// | [`ForestError::NoEvents`] | survival response with all cases censored |
    pub fn new(covariates: Vec<Column>, response: ResponseSpec) -> Result<Self, ForestError> {
        if covariates.is_empty() {
            return Err(ForestError::ZeroCovariates);
        }
        let n_cases = covariates[0].values.len();
        if n_cases == 0 {
            return Err(ForestError::EmptyDataset);
        }

        let mut has_missing = false;
        let mut excluded = Vec::new();
        for (j, col) in covariates.iter().enumerate() {
            if col.values.len() != n_cases {
                return Err(ForestError::ColumnLengthMismatch {
                    name: col.name.clone(),
                    expected: n_cases,
                    got: col.values.len(),
                });
            }
            let mut any_present = false;
            for (i, &v) in col.values.iter().enumerate() {
                if v.is_nan() {
                    has_missing = true;
                    continue;
                }
                any_present = true;
                if v.is_infinite() {
                    return Err(ForestError::InfiniteValue {
                        covariate: j,
                        case: i,
                    });
                }
                if let ColumnKind::Categorical { n_levels } = col.kind {
                    if v.fract() != 0.0 || v < 1.0 || v > f64::from(n_levels) {
                        return Err(ForestError::InvalidLevelCode {
                            covariate: j,
                            case: i,
                            code: v,
                            n_levels,
                        });
                    }
                }
            }
            if !any_present {
                excluded.push((j, ExclusionReason::AllMissing));
            } else if let ColumnKind::Categorical { n_levels } = col.kind {
                if n_levels > MAX_FACTOR_LEVELS {
                    excluded.push((j, ExclusionReason::TooManyLevels));
                }
            }
        }

        let mut n_event_types = 0;
        match &response {
            ResponseSpec::None => {}
            ResponseSpec::Columns(cols) => {
                for col in cols {
                    if col.len() != n_cases {
                        return Err(ForestError::ColumnLengthMismatch {
                            name: col.name().to_string(),
                            expected: n_cases,
                            got: col.len(),
                        });
                    }
                    match col {
                        ResponseColumn::Classification {
                            name,
                            labels,
                            n_classes,
                        } => {
                            for (i, &l) in labels.iter().enumerate() {
                                if l >= *n_classes {
                                    return Err(ForestError::NonFiniteResponse {
                                        name: name.clone(),
                                        case: i,
                                    });
                                }
                            }
                        }
                        ResponseColumn::Regression { name, values } => {
                            for (i, &v) in values.iter().enumerate() {
                                if !v.is_finite() {
                                    return Err(ForestError::NonFiniteResponse {
                                        name: name.clone(),
                                        case: i,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            ResponseSpec::Survival { time, event } => {
                if time.len() != n_cases || event.len() != n_cases {
                    return Err(ForestError::ColumnLengthMismatch {
                        name: "time/event".to_string(),
                        expected: n_cases,
                        got: time.len().min(event.len()),
                    });
                }
                for (i, &t) in time.iter().enumerate() {
                    if !t.is_finite() || t < 0.0 {
                        return Err(ForestError::InvalidSurvivalTime { case: i, time: t });
                    }
                }
                n_event_types = event.iter().copied().max().unwrap_or(0);
                if n_event_types == 0 {
                    return Err(ForestError::NoEvents);
                }
            }
        }

        Ok(Self {
            covariates,
            response,
            n_cases,
            n_event_types,
            has_missing,
            excluded,
        })
    }

    /// Return the number of cases.
    #[must_use]
    pub fn n_cases(&self) -> usize {
        self.n_cases
    }

    /// Return the number of covariate columns.
    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.covariates.len()
    }

    /// Return a covariate column.
    #[must_use]
    pub fn covariate(&self, j: usize) -> &Column {
        &self.covariates[j]
    }

    /// Return all covariate columns.
    #[must_use]
    pub fn covariates(&self) -> &[Column] {
        &self.covariates
    }

    /// Return the response specification.
    #[must_use]
    pub fn response(&self) -> &ResponseSpec {
        &self.response
    }

    /// Return the number of distinct event types (0 unless survival).
    #[must_use]
    pub fn n_event_types(&self) -> u32 {
        self.n_event_types
    }

    /// True when any covariate value is missing.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.has_missing
    }

    /// Covariates excluded from splitting, with reasons.
    #[must_use]
    pub fn excluded_covariates(&self) -> &[(usize, ExclusionReason)] {
        &self.excluded
    }

    /// Derive the model family from the response specification.
    #[must_use]
    pub fn family(&self) -> Family {
        match &self.response {
            ResponseSpec::None => Family::Unsupervised,
            ResponseSpec::Survival { .. } => {
                if self.n_event_types > 1 {
                    Family::CompetingRisk
                } else {
                    Family::Survival
                }
            }
            ResponseSpec::Columns(cols) => {
                if cols.len() > 1 {
                    Family::Multivariate
                } else {
                    match &cols[0] {
                        ResponseColumn::Classification { .. } => Family::Classification,
                        ResponseColumn::Regression { .. } => Family::Regression,
                    }
                }
            }
        }
    }
}
