//! Forest-level ensemble accumulation.
//!
//! Every tree contributes its leaf predictions for the cases it is asked
//! to score (out-of-bag, and optionally in-bag) into per-case running
//! sums with a per-case denominator counting contributing trees. Trees
//! accumulate into private partials that are merged after the parallel
//! section; the merge is element-wise addition, so final values are
//! invariant to the order in which trees complete.

use crate::data::{Dataset, ResponseColumn, ResponseSpec};
use crate::survival::TimeGrid;
use crate::terminal::{ColumnLeaf, LeafStats};
use crate::tree::Tree;

/// Running sums for one classification/regression response column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ColumnSums {
    /// Per-case class-probability sums.
    Classes(Vec<Vec<f64>>),
    /// Per-case mean-response sums.
    Mean(Vec<f64>),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
enum Sums {
    Survival {
        /// Per-case cumulative-hazard sums over the time grid.
        chf: Vec<Vec<f64>>,
        /// Per-case survival-curve sums over the time grid.
        survival: Vec<Vec<f64>>,
        /// Per-case, per-event-type CIF sums over the time grid.
        cif: Vec<Vec<Vec<f64>>>,
        /// Per-case, per-event-type mortality sums.
        mortality: Vec<Vec<f64>>,
    },
    Columns(Vec<ColumnSums>),
    None,
}

/// Shape of the ensemble storage for one response column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColumnLayout {
    /// Class-probability storage with the given class count.
    Classes(usize),
    /// Scalar mean storage.
    Mean,
}

/// Shape of the ensemble storage, captured at training time so held-out
/// prediction can allocate matching accumulators without a response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EnsembleLayout {
    /// Survival curves over a grid with the given length and event-type count.
    Survival {
        /// Time-grid length.
        grid_len: usize,
        /// Number of event types.
        n_types: usize,
    },
    /// One layout entry per response column.
    Columns(Vec<ColumnLayout>),
    /// No response.
    None,
}

impl EnsembleLayout {
    /// Derive the layout from a training dataset.
    pub(crate) fn from_dataset(dataset: &Dataset, grid: Option<&TimeGrid>) -> Self {
        match dataset.response() {
            ResponseSpec::Survival { .. } => EnsembleLayout::Survival {
                grid_len: grid.map_or(0, TimeGrid::len),
                n_types: dataset.n_event_types() as usize,
            },
            ResponseSpec::Columns(cols) => EnsembleLayout::Columns(
                cols.iter()
                    .map(|col| match col {
                        ResponseColumn::Classification { n_classes, .. } => {
                            ColumnLayout::Classes(*n_classes)
                        }
                        ResponseColumn::Regression { .. } => ColumnLayout::Mean,
                    })
                    .collect(),
            ),
            ResponseSpec::None => EnsembleLayout::None,
        }
    }
}

/// The ensemble accumulator: per-case sums plus the per-case count of
/// contributing trees.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Ensemble {
    denom: Vec<u32>,
    sums: Sums,
}

impl Ensemble {
    /// Build an empty accumulator shaped for the dataset's family.
    pub(crate) fn new(dataset: &Dataset, grid: Option<&TimeGrid>) -> Self {
        Self::with_layout(dataset.n_cases(), &EnsembleLayout::from_dataset(dataset, grid))
    }

    /// Build an empty accumulator for `n` cases with a stored layout.
    pub(crate) fn with_layout(n: usize, layout: &EnsembleLayout) -> Self {
        let sums = match layout {
            EnsembleLayout::Survival { grid_len, n_types } => Sums::Survival {
                chf: vec![vec![0.0; *grid_len]; n],
                survival: vec![vec![0.0; *grid_len]; n],
                cif: vec![vec![vec![0.0; *grid_len]; *n_types]; n],
                mortality: vec![vec![0.0; *n_types]; n],
            },
            EnsembleLayout::Columns(cols) => Sums::Columns(
                cols.iter()
                    .map(|col| match col {
                        ColumnLayout::Classes(n_classes) => {
                            ColumnSums::Classes(vec![vec![0.0; *n_classes]; n])
                        }
                        ColumnLayout::Mean => ColumnSums::Mean(vec![0.0; n]),
                    })
                    .collect(),
            ),
            EnsembleLayout::None => Sums::None,
        };
        Self {
            denom: vec![0; n],
            sums,
        }
    }

    /// Fold one leaf prediction for one case into the sums.
    pub(crate) fn add_case(&mut self, case: usize, stats: &LeafStats) {
        self.denom[case] += 1;
        match (&mut self.sums, stats) {
            (
                Sums::Survival {
                    chf,
                    survival,
                    cif,
                    mortality,
                },
                LeafStats::Survival(leaf),
            ) => {
                for (acc, v) in chf[case].iter_mut().zip(leaf.nelson_aalen.iter()) {
                    *acc += v;
                }
                for (acc, v) in survival[case].iter_mut().zip(leaf.survival.iter()) {
                    *acc += v;
                }
                for (acc_j, leaf_j) in cif[case].iter_mut().zip(leaf.cif.iter()) {
                    for (acc, v) in acc_j.iter_mut().zip(leaf_j.iter()) {
                        *acc += v;
                    }
                }
                for (acc, v) in mortality[case].iter_mut().zip(leaf.mortality.iter()) {
                    *acc += v;
                }
            }
            (Sums::Columns(sums), LeafStats::Columns(leaves)) => {
                for (sum, leaf) in sums.iter_mut().zip(leaves.iter()) {
                    match (sum, leaf) {
                        (ColumnSums::Classes(probs), ColumnLeaf::Classification { probs: p, .. }) => {
                            for (acc, v) in probs[case].iter_mut().zip(p.iter()) {
                                *acc += v;
                            }
                        }
                        (ColumnSums::Mean(means), ColumnLeaf::Regression { mean }) => {
                            means[case] += mean;
                        }
                        _ => unreachable!("leaf stats follow the response layout"),
                    }
                }
            }
            (Sums::None, LeafStats::None) => {}
            _ => unreachable!("leaf stats follow the response layout"),
        }
    }

    /// Route the given cases through a tree and fold their leaf
    /// predictions in.
    pub(crate) fn add_tree(&mut self, tree: &Tree, dataset: &Dataset, cases: &[usize]) {
        for &case in cases {
            let stats = tree.terminal_for_case(dataset, case).stats();
            self.add_case(case, stats);
        }
    }

    /// Element-wise merge of another accumulator (commutative and
    /// associative, so tree completion order cannot matter).
    pub(crate) fn merge(&mut self, other: &Ensemble) {
        for (a, b) in self.denom.iter_mut().zip(other.denom.iter()) {
            *a += b;
        }
        match (&mut self.sums, &other.sums) {
            (
                Sums::Survival {
                    chf,
                    survival,
                    cif,
                    mortality,
                },
                Sums::Survival {
                    chf: chf_b,
                    survival: survival_b,
                    cif: cif_b,
                    mortality: mortality_b,
                },
            ) => {
                merge_2d(chf, chf_b);
                merge_2d(survival, survival_b);
                for (a, b) in cif.iter_mut().zip(cif_b.iter()) {
                    merge_2d(a, b);
                }
                merge_2d(mortality, mortality_b);
            }
            (Sums::Columns(a), Sums::Columns(b)) => {
                for (sa, sb) in a.iter_mut().zip(b.iter()) {
                    match (sa, sb) {
                        (ColumnSums::Classes(pa), ColumnSums::Classes(pb)) => merge_2d(pa, pb),
                        (ColumnSums::Mean(ma), ColumnSums::Mean(mb)) => {
                            for (x, y) in ma.iter_mut().zip(mb.iter()) {
                                *x += y;
                            }
                        }
                        _ => unreachable!("partials share one layout"),
                    }
                }
            }
            (Sums::None, Sums::None) => {}
            _ => unreachable!("partials share one layout"),
        }
    }

    /// Divide sums by denominators. Cases with a zero denominator come
    /// out as `NaN` — reported as missing, never a crash.
    #[must_use]
    pub fn finalize(&self) -> EnsembleEstimates {
        let denom = self.denom.clone();
        let d = |case: usize| -> f64 {
            if denom[case] == 0 {
                f64::NAN
            } else {
                f64::from(denom[case])
            }
        };
        let kind = match &self.sums {
            Sums::Survival {
                chf,
                survival,
                cif,
                mortality,
            } => EstimateKind::Survival {
                chf: divide_2d(chf, &d),
                survival: divide_2d(survival, &d),
                cif: cif
                    .iter()
                    .enumerate()
                    .map(|(case, per_type)| {
                        per_type
                            .iter()
                            .map(|curve| curve.iter().map(|v| v / d(case)).collect())
                            .collect()
                    })
                    .collect(),
                mortality: divide_2d(mortality, &d),
            },
            Sums::Columns(cols) => EstimateKind::Columns(
                cols.iter()
                    .map(|col| match col {
                        ColumnSums::Classes(probs) => ColumnEstimate::Classes(divide_2d(probs, &d)),
                        ColumnSums::Mean(means) => ColumnEstimate::Mean(
                            means
                                .iter()
                                .enumerate()
                                .map(|(case, v)| v / d(case))
                                .collect(),
                        ),
                    })
                    .collect(),
            ),
            Sums::None => EstimateKind::None,
        };
        EnsembleEstimates { denom, kind }
    }
}

fn merge_2d(a: &mut [Vec<f64>], b: &[Vec<f64>]) {
    for (ra, rb) in a.iter_mut().zip(b.iter()) {
        for (x, y) in ra.iter_mut().zip(rb.iter()) {
            *x += y;
        }
    }
}

fn divide_2d(a: &[Vec<f64>], d: &impl Fn(usize) -> f64) -> Vec<Vec<f64>> {
    a.iter()
        .enumerate()
        .map(|(case, row)| row.iter().map(|v| v / d(case)).collect())
        .collect()
}

/// Finalized per-case estimate for one response column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ColumnEstimate {
    /// Averaged class probabilities per case.
    Classes(Vec<Vec<f64>>),
    /// Averaged mean response per case.
    Mean(Vec<f64>),
}

/// Family-specific finalized estimates.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum EstimateKind {
    /// Averaged survival curves and mortality.
    Survival {
        /// Per-case ensemble cumulative hazard over the time grid.
        chf: Vec<Vec<f64>>,
        /// Per-case ensemble survival over the time grid.
        survival: Vec<Vec<f64>>,
        /// Per-case, per-event-type ensemble CIF over the time grid.
        cif: Vec<Vec<Vec<f64>>>,
        /// Per-case, per-event-type ensemble mortality.
        mortality: Vec<Vec<f64>>,
    },
    /// One estimate per response column.
    Columns(Vec<ColumnEstimate>),
    /// No response (unsupervised).
    None,
}

/// Finalized ensemble: per-case averages plus the denominators that
/// produced them. Cases with denominator 0 hold `NaN`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EnsembleEstimates {
    /// Per-case count of contributing trees.
    pub denom: Vec<u32>,
    /// The averaged estimates.
    pub kind: EstimateKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use crate::terminal::SurvivalLeaf;

    fn regression_dataset(n: usize) -> Dataset {
        Dataset::new(
            vec![Column::continuous("x", vec![0.0; n])],
            ResponseSpec::Columns(vec![ResponseColumn::Regression {
                name: "y".to_string(),
                values: vec![0.0; n],
            }]),
        )
        .unwrap()
    }

    fn mean_leaf(mean: f64) -> LeafStats {
        LeafStats::Columns(vec![ColumnLeaf::Regression { mean }])
    }

    #[test]
    fn zero_denominator_reports_missing() {
        let ds = regression_dataset(3);
        let mut ens = Ensemble::new(&ds, None);
        ens.add_case(0, &mean_leaf(2.0));
        ens.add_case(0, &mean_leaf(4.0));
        let est = ens.finalize();
        assert_eq!(est.denom, vec![2, 0, 0]);
        let EstimateKind::Columns(cols) = &est.kind else {
            panic!("expected columns");
        };
        let ColumnEstimate::Mean(means) = &cols[0] else {
            panic!("expected means");
        };
        assert!((means[0] - 3.0).abs() < 1e-12);
        assert!(means[1].is_nan());
    }

    #[test]
    fn merge_is_order_independent() {
        let ds = regression_dataset(2);
        let mut parts = Vec::new();
        for (case, mean) in [(0usize, 1.0), (1, 5.0), (0, 3.0)] {
            let mut p = Ensemble::new(&ds, None);
            p.add_case(case, &mean_leaf(mean));
            parts.push(p);
        }

        let fold = |order: &[usize]| {
            let mut total = Ensemble::new(&ds, None);
            for &k in order {
                total.merge(&parts[k]);
            }
            total.finalize()
        };
        let a = fold(&[0, 1, 2]);
        let b = fold(&[2, 0, 1]);
        assert_eq!(a.denom, b.denom);
        let (EstimateKind::Columns(ca), EstimateKind::Columns(cb)) = (&a.kind, &b.kind) else {
            panic!("expected columns");
        };
        let (ColumnEstimate::Mean(ma), ColumnEstimate::Mean(mb)) = (&ca[0], &cb[0]) else {
            panic!("expected means");
        };
        for (x, y) in ma.iter().zip(mb.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn survival_sums_accumulate_curves() {
        let ds = Dataset::new(
            vec![Column::continuous("x", vec![0.0; 2])],
            ResponseSpec::Survival {
                time: vec![1.0, 2.0],
                event: vec![1, 1],
            },
        )
        .unwrap();
        let grid = TimeGrid::from_training(&[1.0, 2.0], &[1, 1]);
        let mut ens = Ensemble::new(&ds, Some(&grid));

        let leaf = LeafStats::Survival(SurvivalLeaf {
            at_risk: vec![2, 1],
            events: vec![vec![1, 1]],
            nelson_aalen: vec![0.5, 1.5],
            survival: vec![0.5, 0.0],
            csh: vec![vec![0.5, 1.5]],
            cif: vec![vec![0.5, 1.0]],
            mortality: vec![2.0],
        });
        ens.add_case(0, &leaf);
        ens.add_case(0, &leaf);
        let est = ens.finalize();
        let EstimateKind::Survival { chf, mortality, .. } = &est.kind else {
            panic!("expected survival");
        };
        assert!((chf[0][0] - 0.5).abs() < 1e-12);
        assert!((chf[0][1] - 1.5).abs() < 1e-12);
        assert!((mortality[0][0] - 2.0).abs() < 1e-12);
        assert!(chf[1][0].is_nan());
    }
}
