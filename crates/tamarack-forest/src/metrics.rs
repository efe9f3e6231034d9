//! Ensemble performance metrics.
//!
//! All metrics are computed only over cases with a non-zero ensemble
//! denominator: regression gets mean-squared error and an R² analog,
//! classification gets the misclassification rate plus a per-class
//! conditional error vector, survival gets Harrell's concordance
//! (reported as 1 − C) and an integrated, censoring-weighted Brier
//! score.

use crate::data::{Dataset, ResponseColumn, ResponseSpec};
use crate::ensemble::{ColumnEstimate, EnsembleEstimates, EstimateKind};
use crate::survival::TimeGrid;

/// Performance for one classification/regression response column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ColumnPerformance {
    /// Misclassification rate plus per-class conditional error.
    Classification {
        /// Overall error rate.
        error: f64,
        /// Error rate conditional on each true class (`NaN` when the
        /// class has no evaluated cases).
        conditional: Vec<f64>,
    },
    /// Squared-error performance.
    Regression {
        /// Mean-squared error.
        mse: f64,
        /// 1 − MSE / Var(y), the R² analog.
        rsq: f64,
    },
}

/// Family-level ensemble performance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Performance {
    /// Survival / competing risk: per-event-type concordance error, plus
    /// the integrated Brier score for single-event-type data.
    Survival {
        /// 1 − Harrell's C per event type, on the ensemble mortality.
        error: Vec<f64>,
        /// Integrated censoring-weighted Brier score (single-type only).
        brier: Option<f64>,
    },
    /// One entry per response column.
    Columns(Vec<ColumnPerformance>),
    /// No response (unsupervised).
    None,
}

/// Compute family performance from finalized ensemble estimates.
pub(crate) fn compute_performance(
    dataset: &Dataset,
    grid: Option<&TimeGrid>,
    estimates: &EnsembleEstimates,
) -> Performance {
    match (dataset.response(), &estimates.kind) {
        (ResponseSpec::Survival { time, event }, EstimateKind::Survival { mortality, survival, .. }) => {
            let n_types = dataset.n_event_types();
            let error = (1..=n_types)
                .map(|j| {
                    let m: Vec<f64> = mortality
                        .iter()
                        .map(|per_type| per_type[(j - 1) as usize])
                        .collect();
                    1.0 - concordance_index(time, event, j, &m, &estimates.denom)
                })
                .collect();
            let brier = (n_types == 1)
                .then(|| {
                    grid.map(|g| {
                        integrated_brier_score(time, event, survival, &estimates.denom, g)
                    })
                })
                .flatten();
            Performance::Survival { error, brier }
        }
        (ResponseSpec::Columns(cols), EstimateKind::Columns(ests)) => Performance::Columns(
            cols.iter()
                .zip(ests.iter())
                .map(|(col, est)| match (col, est) {
                    (
                        ResponseColumn::Classification {
                            labels, n_classes, ..
                        },
                        ColumnEstimate::Classes(probs),
                    ) => {
                        let (error, conditional) =
                            classification_error(labels, *n_classes, probs, &estimates.denom);
                        ColumnPerformance::Classification { error, conditional }
                    }
                    (ResponseColumn::Regression { values, .. }, ColumnEstimate::Mean(means)) => {
                        let (mse, rsq) = mean_squared_error(values, means, &estimates.denom);
                        ColumnPerformance::Regression { mse, rsq }
                    }
                    _ => unreachable!("estimates follow the response layout"),
                })
                .collect(),
        ),
        _ => Performance::None,
    }
}

/// MSE and the R² analog over cases with a non-zero denominator.
pub(crate) fn mean_squared_error(y: &[f64], predicted: &[f64], denom: &[u32]) -> (f64, f64) {
    let cases: Vec<usize> = (0..y.len()).filter(|&i| denom[i] > 0).collect();
    if cases.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = cases.len() as f64;
    let mse = cases
        .iter()
        .map(|&i| {
            let d = y[i] - predicted[i];
            d * d
        })
        .sum::<f64>()
        / n;
    let mean = cases.iter().map(|&i| y[i]).sum::<f64>() / n;
    let var = cases
        .iter()
        .map(|&i| {
            let d = y[i] - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let rsq = if var > 0.0 { 1.0 - mse / var } else { f64::NAN };
    (mse, rsq)
}

/// Misclassification rate plus the per-class conditional error vector.
pub(crate) fn classification_error(
    labels: &[usize],
    n_classes: usize,
    probs: &[Vec<f64>],
    denom: &[u32],
) -> (f64, Vec<f64>) {
    let mut wrong = 0usize;
    let mut total = 0usize;
    let mut class_wrong = vec![0usize; n_classes];
    let mut class_total = vec![0usize; n_classes];
    for (i, &label) in labels.iter().enumerate() {
        if denom[i] == 0 {
            continue;
        }
        let predicted = probs[i]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        total += 1;
        class_total[label] += 1;
        if predicted != label {
            wrong += 1;
            class_wrong[label] += 1;
        }
    }
    if total == 0 {
        return (f64::NAN, vec![f64::NAN; n_classes]);
    }
    let conditional = class_wrong
        .iter()
        .zip(class_total.iter())
        .map(|(&w, &t)| if t == 0 { f64::NAN } else { w as f64 / t as f64 })
        .collect();
    (wrong as f64 / total as f64, conditional)
}

/// Harrell's concordance index on a mortality score, for events of type
/// `cause` (other event types count as censoring at their time).
pub(crate) fn concordance_index(
    time: &[f64],
    event: &[u32],
    cause: u32,
    mortality: &[f64],
    denom: &[u32],
) -> f64 {
    let cases: Vec<usize> = (0..time.len()).filter(|&i| denom[i] > 0).collect();
    let mut concordant = 0.0;
    let mut permissible = 0.0;
    for (a, &i) in cases.iter().enumerate() {
        for &k in &cases[a + 1..] {
            let (first, second) = if time[i] < time[k] { (i, k) } else { (k, i) };
            if time[first] < time[second] {
                // The shorter time must be an observed event of the cause.
                if event[first] != cause {
                    continue;
                }
                permissible += 1.0;
                if mortality[first] > mortality[second] {
                    concordant += 1.0;
                } else if mortality[first] == mortality[second] {
                    concordant += 0.5;
                }
            } else {
                // Tied times.
                let e_i = event[i] == cause;
                let e_k = event[k] == cause;
                if e_i && e_k {
                    permissible += 1.0;
                    concordant += if mortality[i] == mortality[k] { 1.0 } else { 0.5 };
                } else if e_i || e_k {
                    let (ev, other) = if e_i { (i, k) } else { (k, i) };
                    permissible += 1.0;
                    if mortality[ev] > mortality[other] {
                        concordant += 1.0;
                    } else if mortality[ev] == mortality[other] {
                        concordant += 0.5;
                    }
                }
            }
        }
    }
    if permissible == 0.0 {
        return f64::NAN;
    }
    concordant / permissible
}

/// Integrated Brier score with inverse-probability-of-censoring weights
/// (Graf et al.), averaged over the time grid by trapezoidal weights.
pub(crate) fn integrated_brier_score(
    time: &[f64],
    event: &[u32],
    survival: &[Vec<f64>],
    denom: &[u32],
    grid: &TimeGrid,
) -> f64 {
    let cases: Vec<usize> = (0..time.len()).filter(|&i| denom[i] > 0).collect();
    if cases.is_empty() || grid.is_empty() {
        return f64::NAN;
    }

    // Kaplan-Meier of the censoring distribution over the evaluated
    // cases; censorings are the "events" here.
    let censor_km = |t: f64| -> f64 {
        let mut g = 1.0;
        let mut points: Vec<usize> = cases
            .iter()
            .copied()
            .filter(|&i| event[i] == 0 && time[i] <= t)
            .collect();
        points.sort_by(|&a, &b| time[a].total_cmp(&time[b]));
        for &i in &points {
            let at_risk = cases.iter().filter(|&&k| time[k] >= time[i]).count() as f64;
            if at_risk > 0.0 {
                g *= 1.0 - 1.0 / at_risk;
            }
        }
        g
    };

    let n = cases.len() as f64;
    let times = grid.times();
    let mut integral = 0.0;
    let mut span = 0.0;
    let mut prev_t = 0.0;
    for (k, &t) in times.iter().enumerate() {
        let g_t = censor_km(t);
        let mut bs = 0.0;
        for &i in &cases {
            let s_hat = survival[i][k];
            if time[i] <= t && event[i] > 0 {
                let g_ti = censor_km(time[i] - f64::EPSILON * time[i].abs().max(1.0));
                if g_ti > 0.0 {
                    bs += s_hat * s_hat / g_ti;
                }
            } else if time[i] > t && g_t > 0.0 {
                bs += (1.0 - s_hat) * (1.0 - s_hat) / g_t;
            }
        }
        bs /= n;
        let dt = t - prev_t;
        integral += bs * dt;
        span += dt;
        prev_t = t;
    }
    if span > 0.0 { integral / span } else { f64::NAN }
}
