//! The split-rule catalog and per-family statistic evaluation.
//!
//! A closed tagged set of objective functions dispatched through one
//! evaluation path, plus a single `Custom` slot for a registered
//! callback with a fixed numeric signature. Every rule maps a candidate
//! left/right partition of a node's members to a scalar quality score;
//! the split search keeps the maximum.

use crate::data::{ColumnKind, Dataset, Family, ResponseColumn, ResponseSpec};
use crate::survival::{RiskTable, TimeGrid, risk_table};

/// Response-weighting mode for the variance and impurity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Weighting {
    /// Raw improvement.
    Unweighted,
    /// Improvement normalized by the parent-node scale (response variance
    /// or inverse class frequency).
    Normalized,
    /// Normalization applied twice, strongly favoring rare classes /
    /// low-variance responses.
    Heavy,
}

/// The split-objective catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitRule {
    /// Standardized log-rank test (survival).
    LogRank,
    /// Log-rank score test on survival ranks (survival).
    LogRankScore,
    /// Weighted sum of cause-specific log-rank tests (competing risk).
    LogRankCompetingRisk,
    /// Gray's modification: prior other-cause failures stay in the
    /// at-risk set (competing risk).
    GrayCompetingRisk,
    /// Pure random splitting; every admissible split scores alike.
    Random,
    /// Within-group variance reduction (regression).
    WeightedVariance(Weighting),
    /// Gini-index reduction with class weighting (classification).
    WeightedGini(Weighting),
    /// Pseudo-responses drawn from the remaining covariates.
    Unsupervised,
    /// Sum of normalized per-response statistics (multivariate).
    Multivariate,
    /// The registered custom objective.
    Custom,
}

impl SplitRule {
    /// Stable name for error messages and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SplitRule::LogRank => "log-rank",
            SplitRule::LogRankScore => "log-rank-score",
            SplitRule::LogRankCompetingRisk => "log-rank-cr",
            SplitRule::GrayCompetingRisk => "gray-cr",
            SplitRule::Random => "random",
            SplitRule::WeightedVariance(_) => "weighted-variance",
            SplitRule::WeightedGini(_) => "weighted-gini",
            SplitRule::Unsupervised => "unsupervised",
            SplitRule::Multivariate => "multivariate",
            SplitRule::Custom => "custom",
        }
    }

    /// The default rule for a model family.
    #[must_use]
    pub fn default_for(family: Family) -> Self {
        match family {
            Family::Survival => SplitRule::LogRank,
            Family::CompetingRisk => SplitRule::LogRankCompetingRisk,
            Family::Classification => SplitRule::WeightedGini(Weighting::Unweighted),
            Family::Regression => SplitRule::WeightedVariance(Weighting::Unweighted),
            Family::Multivariate => SplitRule::Multivariate,
            Family::Unsupervised => SplitRule::Unsupervised,
        }
    }

    /// Whether this rule can score splits for the given family.
    #[must_use]
    pub fn compatible_with(self, family: Family) -> bool {
        match self {
            SplitRule::Random => true,
            SplitRule::Custom => family != Family::Unsupervised,
            SplitRule::LogRank => matches!(family, Family::Survival | Family::CompetingRisk),
            SplitRule::LogRankScore => family == Family::Survival,
            SplitRule::LogRankCompetingRisk | SplitRule::GrayCompetingRisk => {
                family == Family::CompetingRisk
            }
            SplitRule::WeightedVariance(_) => family == Family::Regression,
            SplitRule::WeightedGini(_) => family == Family::Classification,
            SplitRule::Multivariate => family == Family::Multivariate,
            SplitRule::Unsupervised => family == Family::Unsupervised,
        }
    }
}

/// Inputs handed to a registered custom objective.
///
/// The signature is fixed: membership and outcome views in, a scalar
/// quality score out (larger is better; non-finite means inadmissible).
pub struct CustomSplitInputs<'a> {
    /// Members routed left (case indices, with bootstrap multiplicity).
    pub left: &'a [usize],
    /// Members routed right.
    pub right: &'a [usize],
    /// Survival times, when the family is survival/competing-risk.
    pub time: Option<&'a [f64]>,
    /// Event codes (0 = censored), when the family is survival/competing-risk.
    pub event: Option<&'a [u32]>,
    /// Number of event types (0 unless survival).
    pub n_event_types: u32,
    /// The forest-global event-time grid, when present.
    pub event_times: Option<&'a [f64]>,
    /// Classification/regression response columns, when present.
    pub responses: &'a [ResponseColumn],
    /// Node mean of the first regression response (0 otherwise).
    pub node_mean: f64,
    /// Node variance of the first regression response (0 otherwise).
    pub node_variance: f64,
}

/// Registered custom objective.
pub type CustomSplitFn = dyn Fn(&CustomSplitInputs<'_>) -> f64 + Send + Sync;

/// A pseudo-response column materialized for unsupervised splitting.
#[derive(Debug, Clone)]
pub(crate) enum PseudoColumn {
    Class { labels: Vec<usize>, n_classes: usize },
    Regr { values: Vec<f64> },
}

impl PseudoColumn {
    /// Materialize a covariate column (already imputed within the tree)
    /// as a pseudo-response.
    pub(crate) fn from_covariate(kind: ColumnKind, values: Vec<f64>) -> Self {
        match kind {
            ColumnKind::Continuous => PseudoColumn::Regr { values },
            ColumnKind::Categorical { n_levels } => PseudoColumn::Class {
                labels: values
                    .iter()
                    .map(|&v| if v.is_nan() { 0 } else { (v as usize) - 1 })
                    .collect(),
                n_classes: n_levels as usize,
            },
        }
    }
}

/// Normalized view over real or pseudo response columns.
enum RespView<'a> {
    Class {
        labels: &'a [usize],
        n_classes: usize,
    },
    Regr {
        values: &'a [f64],
    },
}

/// Per-node split-statistic evaluator.
///
/// Constructed once per (node, covariate) over the covariate's
/// non-missing membership; node-level quantities (parent risk table,
/// log-rank scores, parent moments) are cached so each candidate split
/// costs one pass over the smaller daughter.
pub(crate) struct RuleEvaluator<'a> {
    rule: SplitRule,
    dataset: &'a Dataset,
    grid: Option<&'a TimeGrid>,
    event_weights: &'a [f64],
    custom: Option<&'a std::sync::Arc<Box<CustomSplitFn>>>,
    members: &'a [usize],
    /// Parent risk table (survival rules).
    parent_table: Option<RiskTable>,
    /// Per-case average log-rank score and the node score moments.
    scores: Option<(Vec<f64>, f64, f64)>,
    /// Response views for the impurity/variance/multivariate rules.
    views: Vec<RespView<'a>>,
    /// Node mean/variance per regression view; (0,0) for class views.
    moments: Vec<(f64, f64)>,
}

impl<'a> RuleEvaluator<'a> {
    pub(crate) fn new(
        rule: SplitRule,
        dataset: &'a Dataset,
        grid: Option<&'a TimeGrid>,
        event_weights: &'a [f64],
        custom: Option<&'a std::sync::Arc<Box<CustomSplitFn>>>,
        pseudo: &'a [PseudoColumn],
        members: &'a [usize],
    ) -> Self {
        let mut parent_table = None;
        let mut scores = None;

        if let ResponseSpec::Survival { time, event } = dataset.response() {
            match rule {
                SplitRule::LogRank
                | SplitRule::LogRankCompetingRisk
                | SplitRule::GrayCompetingRisk => {
                    let grid = grid.expect("survival rules require a time grid");
                    parent_table = Some(risk_table(
                        members,
                        time,
                        event,
                        dataset.n_event_types(),
                        grid,
                    ));
                }
                SplitRule::LogRankScore => {
                    scores = Some(log_rank_scores(members, time, event));
                }
                _ => {}
            }
        }

        let mut views = Vec::new();
        if matches!(
            rule,
            SplitRule::WeightedVariance(_)
                | SplitRule::WeightedGini(_)
                | SplitRule::Multivariate
                | SplitRule::Custom
        ) {
            if let ResponseSpec::Columns(cols) = dataset.response() {
                for col in cols {
                    views.push(match col {
                        ResponseColumn::Classification {
                            labels, n_classes, ..
                        } => RespView::Class {
                            labels,
                            n_classes: *n_classes,
                        },
                        ResponseColumn::Regression { values, .. } => RespView::Regr { values },
                    });
                }
            }
        }
        if rule == SplitRule::Unsupervised {
            for col in pseudo {
                views.push(match col {
                    PseudoColumn::Class { labels, n_classes } => RespView::Class {
                        labels,
                        n_classes: *n_classes,
                    },
                    PseudoColumn::Regr { values } => RespView::Regr { values },
                });
            }
        }

        let moments = views
            .iter()
            .map(|v| match v {
                RespView::Regr { values } => group_moments(members, values),
                RespView::Class { .. } => (0.0, 0.0),
            })
            .collect();

        Self {
            rule,
            dataset,
            grid,
            event_weights,
            custom,
            members,
            parent_table,
            scores,
            views,
            moments,
        }
    }

    /// Score a candidate partition. `None` means the candidate is
    /// inadmissible under this rule (degenerate variance, empty risk
    /// set), not an error.
    pub(crate) fn statistic(&self, left: &[usize], right: &[usize]) -> Option<f64> {
        match self.rule {
            // Any admissible candidate scores alike (and positive, so the
            // first one drawn wins).
            SplitRule::Random => Some(1.0),
            SplitRule::LogRank => self.log_rank(left, false),
            SplitRule::LogRankCompetingRisk => self.log_rank(left, false),
            SplitRule::GrayCompetingRisk => self.log_rank(left, true),
            SplitRule::LogRankScore => self.log_rank_score(left),
            SplitRule::WeightedVariance(w) => self.variance_statistic(left, right, w),
            SplitRule::WeightedGini(w) => self.gini_statistic(left, right, w),
            SplitRule::Multivariate | SplitRule::Unsupervised => {
                self.multivariate_statistic(left, right)
            }
            SplitRule::Custom => self.custom_statistic(left, right),
        }
    }

    /// Standardized (possibly cause-weighted) log-rank statistic.
    ///
    /// `gray` switches the at-risk definition to Gray's: cases that
    /// failed earlier from another cause remain at risk for the cause
    /// under test.
    fn log_rank(&self, left: &[usize], gray: bool) -> Option<f64> {
        let ResponseSpec::Survival { time, event } = self.dataset.response() else {
            return None;
        };
        let grid = self.grid?;
        let n_types = self.dataset.n_event_types();
        let parent = self.parent_table.as_ref()?;
        let left_table = risk_table(left, time, event, n_types, grid);

        let mut numerator = 0.0;
        let mut variance = 0.0;
        for (j, w) in self.event_weights.iter().enumerate().take(n_types as usize) {
            for k in 0..grid.len() {
                let (y, y_l, d) = if gray {
                    (
                        gray_at_risk(self.members, time, event, grid.times()[k], j as u32 + 1),
                        gray_at_risk(left, time, event, grid.times()[k], j as u32 + 1),
                        f64::from(parent.events[j][k]),
                    )
                } else {
                    (
                        f64::from(parent.at_risk[k]),
                        f64::from(left_table.at_risk[k]),
                        f64::from(parent.events[j][k]),
                    )
                };
                if y < 2.0 || d == 0.0 {
                    continue;
                }
                let d_l = f64::from(left_table.events[j][k]);
                numerator += w * (d_l - y_l * d / y);
                variance += w * w * d * (y_l / y) * (1.0 - y_l / y) * ((y - d) / (y - 1.0));
            }
        }

        if variance <= 0.0 {
            return None;
        }
        Some(numerator * numerator / variance)
    }

    /// Standardized sum of log-rank scores over the left daughter.
    fn log_rank_score(&self, left: &[usize]) -> Option<f64> {
        let (avg_score, mean, var) = self.scores.as_ref()?;
        if *var <= 0.0 {
            return None;
        }
        let n = self.members.len() as f64;
        let n_l = left.len() as f64;
        if n_l == 0.0 || n_l == n {
            return None;
        }
        let sum_l: f64 = left.iter().map(|&i| avg_score[i]).sum();
        let denom = n_l * (1.0 - n_l / n) * var;
        if denom <= 0.0 {
            return None;
        }
        let z = sum_l - n_l * mean;
        Some(z * z / denom)
    }

    fn variance_statistic(&self, left: &[usize], right: &[usize], w: Weighting) -> Option<f64> {
        let mut total = 0.0;
        let mut any = false;
        for (view, &(_, node_var)) in self.views.iter().zip(self.moments.iter()) {
            if let RespView::Regr { values } = view {
                let imp = variance_improvement(self.members, left, right, values)?;
                any = true;
                total += apply_weighting(imp, node_var, self.members.len(), w)?;
            }
        }
        any.then_some(total)
    }

    fn gini_statistic(&self, left: &[usize], right: &[usize], w: Weighting) -> Option<f64> {
        let mut total = 0.0;
        let mut any = false;
        for view in &self.views {
            if let RespView::Class { labels, n_classes } = view {
                any = true;
                total += gini_improvement(self.members, left, right, labels, *n_classes, w);
            }
        }
        any.then_some(total)
    }

    /// Sum of scale-free per-response improvements, mixing regression and
    /// classification columns.
    fn multivariate_statistic(&self, left: &[usize], right: &[usize]) -> Option<f64> {
        let mut total = 0.0;
        let mut any = false;
        for (view, &(_, node_var)) in self.views.iter().zip(self.moments.iter()) {
            match view {
                RespView::Regr { values } => {
                    let Some(imp) = variance_improvement(self.members, left, right, values) else {
                        continue;
                    };
                    if node_var > 0.0 {
                        total += imp / node_var;
                        any = true;
                    }
                }
                RespView::Class { labels, n_classes } => {
                    let parent_gini =
                        weighted_gini(self.members, labels, *n_classes, &vec![1.0; *n_classes]);
                    if parent_gini > 0.0 {
                        total += gini_improvement(
                            self.members,
                            left,
                            right,
                            labels,
                            *n_classes,
                            Weighting::Unweighted,
                        ) / (parent_gini * self.members.len() as f64);
                        any = true;
                    }
                }
            }
        }
        any.then_some(total)
    }

    fn custom_statistic(&self, left: &[usize], right: &[usize]) -> Option<f64> {
        let custom = self.custom?;
        let (time, event) = match self.dataset.response() {
            ResponseSpec::Survival { time, event } => (Some(time.as_slice()), Some(event.as_slice())),
            _ => (None, None),
        };
        let responses = match self.dataset.response() {
            ResponseSpec::Columns(cols) => cols.as_slice(),
            _ => &[],
        };
        let (node_mean, node_variance) = self
            .moments
            .iter()
            .zip(self.views.iter())
            .find(|(_, v)| matches!(v, RespView::Regr { .. }))
            .map_or((0.0, 0.0), |(&m, _)| m);

        let inputs = CustomSplitInputs {
            left,
            right,
            time,
            event,
            n_event_types: self.dataset.n_event_types(),
            event_times: self.grid.map(TimeGrid::times),
            responses,
            node_mean,
            node_variance,
        };
        let score = (custom.as_ref().as_ref())(&inputs);
        score.is_finite().then_some(score)
    }
}

/// Gray-style at-risk count at one time for one cause: cases still
/// unresolved plus cases already failed from a different cause.
fn gray_at_risk(members: &[usize], time: &[f64], event: &[u32], t: f64, cause: u32) -> f64 {
    members
        .iter()
        .filter(|&&i| time[i] >= t || (event[i] != 0 && event[i] != cause))
        .count() as f64
}

/// Per-case average log-rank scores plus their node mean and sample
/// variance. Duplicated bootstrap occurrences of a case share its value,
/// so summing the average over occurrences recovers the exact total.
fn log_rank_scores(members: &[usize], time: &[f64], event: &[u32]) -> (Vec<f64>, f64, f64) {
    let n = members.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| time[members[a]].total_cmp(&time[members[b]]));

    // a_i = δ_i − Σ_{j: rank_j <= rank_i} δ_j / (n − rank_j + 1)
    let mut running = 0.0;
    let mut occurrence_scores = vec![0.0; n];
    for (rank, &pos) in order.iter().enumerate() {
        let case = members[pos];
        let delta = if event[case] > 0 { 1.0 } else { 0.0 };
        running += delta / (n - rank) as f64;
        occurrence_scores[pos] = delta - running;
    }

    let max_case = members.iter().copied().max().unwrap_or(0);
    let mut total = vec![0.0; max_case + 1];
    let mut mult = vec![0usize; max_case + 1];
    for (pos, &case) in members.iter().enumerate() {
        total[case] += occurrence_scores[pos];
        mult[case] += 1;
    }
    let avg: Vec<f64> = total
        .iter()
        .zip(mult.iter())
        .map(|(&t, &m)| if m > 0 { t / m as f64 } else { 0.0 })
        .collect();

    let mean = occurrence_scores.iter().sum::<f64>() / n as f64;
    let var = if n > 1 {
        occurrence_scores
            .iter()
            .map(|&s| (s - mean) * (s - mean))
            .sum::<f64>()
            / (n - 1) as f64
    } else {
        0.0
    };
    (avg, mean, var)
}

/// Mean and population variance of `values` over a member list.
fn group_moments(members: &[usize], values: &[f64]) -> (f64, f64) {
    if members.is_empty() {
        return (0.0, 0.0);
    }
    let n = members.len() as f64;
    let mean = members.iter().map(|&i| values[i]).sum::<f64>() / n;
    let var = members
        .iter()
        .map(|&i| {
            let d = values[i] - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var)
}

/// Within-group sum-of-squares reduction: SS_parent − SS_left − SS_right.
fn variance_improvement(
    parent: &[usize],
    left: &[usize],
    right: &[usize],
    values: &[f64],
) -> Option<f64> {
    if left.is_empty() || right.is_empty() {
        return None;
    }
    let ss = |members: &[usize]| -> f64 {
        let (mean, _) = group_moments(members, values);
        members
            .iter()
            .map(|&i| {
                let d = values[i] - mean;
                d * d
            })
            .sum()
    };
    Some(ss(parent) - ss(left) - ss(right))
}

fn class_weights(parent: &[usize], labels: &[usize], n_classes: usize, w: Weighting) -> Vec<f64> {
    match w {
        Weighting::Unweighted => vec![1.0; n_classes],
        Weighting::Normalized | Weighting::Heavy => {
            let mut counts = vec![0usize; n_classes];
            for &i in parent {
                counts[labels[i]] += 1;
            }
            let n = parent.len() as f64;
            let k = counts.iter().filter(|&&c| c > 0).count() as f64;
            counts
                .iter()
                .map(|&c| {
                    if c == 0 {
                        0.0
                    } else {
                        let base = n / (k * c as f64);
                        if w == Weighting::Heavy { base * base } else { base }
                    }
                })
                .collect()
        }
    }
}

fn weighted_gini(members: &[usize], labels: &[usize], n_classes: usize, weights: &[f64]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let mut counts = vec![0usize; n_classes];
    for &i in members {
        counts[labels[i]] += 1;
    }
    let n = members.len() as f64;
    let sum_sq: f64 = counts
        .iter()
        .zip(weights.iter())
        .map(|(&c, &w)| {
            let p = c as f64 / n;
            w * p * p
        })
        .sum();
    1.0 - sum_sq
}

/// Weighted-Gini reduction: n·G_parent − n_L·G_L − n_R·G_R.
fn gini_improvement(
    parent: &[usize],
    left: &[usize],
    right: &[usize],
    labels: &[usize],
    n_classes: usize,
    w: Weighting,
) -> f64 {
    let weights = class_weights(parent, labels, n_classes, w);
    let g = |m: &[usize]| weighted_gini(m, labels, n_classes, &weights);
    parent.len() as f64 * g(parent) - left.len() as f64 * g(left) - right.len() as f64 * g(right)
}

fn apply_weighting(imp: f64, node_var: f64, n: usize, w: Weighting) -> Option<f64> {
    match w {
        Weighting::Unweighted => Some(imp),
        Weighting::Normalized => (node_var > 0.0).then(|| imp / node_var),
        Weighting::Heavy => (node_var > 0.0).then(|| imp / (node_var * n as f64)),
    }
}
