//! Per-tree covariate view with in-node missing-value imputation.
//!
//! Each tree that imputes owns a private copy of the covariate columns;
//! at every node, missing member values are filled from the statistics
//! of the node's non-missing members before the split search runs, so
//! descendant splits see the imputed values. Trees never share mutable
//! state; the training dataset itself is read-only.

use rand::Rng;

use crate::data::{ColumnKind, Dataset};

/// Read view over covariate values for one tree, with an optional
/// imputation overlay.
pub(crate) struct TreeData<'a> {
    dataset: &'a Dataset,
    overlay: Option<Vec<Vec<f64>>>,
}

impl<'a> TreeData<'a> {
    /// Build the view; clones the covariate columns only when the tree
    /// will impute and the data actually has missing values.
    pub(crate) fn new(dataset: &'a Dataset, impute: bool) -> Self {
        let overlay = (impute && dataset.has_missing()).then(|| {
            dataset
                .covariates()
                .iter()
                .map(|c| c.values().to_vec())
                .collect()
        });
        Self { dataset, overlay }
    }

    /// Covariate value for case `i` in column `j` (`NaN` = missing).
    #[inline]
    pub(crate) fn value(&self, j: usize, i: usize) -> f64 {
        match &self.overlay {
            Some(cols) => cols[j][i],
            None => self.dataset.covariate(j).values()[i],
        }
    }

    /// Materialize one column with the overlay applied.
    pub(crate) fn column_values(&self, j: usize) -> Vec<f64> {
        match &self.overlay {
            Some(cols) => cols[j].clone(),
            None => self.dataset.covariate(j).values().to_vec(),
        }
    }

    /// Fill missing member values from sibling statistics: the member
    /// median for continuous columns, a draw from the member empirical
    /// distribution for categorical columns. Members whose column is
    /// missing for every node member stay missing (the covariate is then
    /// skipped by the split search at this node).
    pub(crate) fn impute_node(&mut self, members: &[usize], rng: &mut impl Rng) {
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        for (j, col) in overlay.iter_mut().enumerate() {
            let mut present: Vec<f64> = members
                .iter()
                .map(|&i| col[i])
                .filter(|v| !v.is_nan())
                .collect();
            if present.is_empty() || present.len() == members.len() {
                continue;
            }
            let kind = self.dataset.covariate(j).kind();
            match kind {
                ColumnKind::Continuous => {
                    present.sort_unstable_by(f64::total_cmp);
                    let fill = median_of_sorted(&present);
                    for &i in members {
                        if col[i].is_nan() {
                            col[i] = fill;
                        }
                    }
                }
                ColumnKind::Categorical { .. } => {
                    for &i in members {
                        if col[i].is_nan() {
                            col[i] = present[rng.gen_range(0..present.len())];
                        }
                    }
                }
            }
        }
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::TreeData;
    use crate::data::{Column, Dataset, ResponseColumn, ResponseSpec};

    fn dataset_with_missing() -> Dataset {
        Dataset::new(
            vec![
                Column::continuous("x0", vec![1.0, f64::NAN, 3.0, 5.0, f64::NAN]),
                Column::categorical("x1", 2, vec![1.0, 1.0, f64::NAN, 2.0, 2.0]),
            ],
            ResponseSpec::Columns(vec![ResponseColumn::Regression {
                name: "y".to_string(),
                values: vec![0.0; 5],
            }]),
        )
        .unwrap()
    }

    #[test]
    fn no_overlay_without_missing() {
        let ds = Dataset::new(
            vec![Column::continuous("x", vec![1.0, 2.0])],
            ResponseSpec::Columns(vec![ResponseColumn::Regression {
                name: "y".to_string(),
                values: vec![0.0, 0.0],
            }]),
        )
        .unwrap();
        let td = TreeData::new(&ds, true);
        assert!(td.overlay.is_none());
        assert_eq!(td.value(0, 1), 2.0);
    }

    #[test]
    fn continuous_imputes_member_median() {
        let ds = dataset_with_missing();
        let mut td = TreeData::new(&ds, true);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        td.impute_node(&[0, 1, 2, 3], &mut rng);
        // Non-missing members {1, 3, 5} → median 3.
        assert_eq!(td.value(0, 1), 3.0);
        // Case 4 was not a member and stays missing.
        assert!(td.value(0, 4).is_nan());
    }

    #[test]
    fn categorical_imputes_observed_level() {
        let ds = dataset_with_missing();
        let mut td = TreeData::new(&ds, true);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        td.impute_node(&[0, 1, 2, 3], &mut rng);
        let filled = td.value(1, 2);
        assert!(filled == 1.0 || filled == 2.0);
    }

    #[test]
    fn imputation_never_mutates_the_dataset() {
        let ds = dataset_with_missing();
        let mut td = TreeData::new(&ds, true);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        td.impute_node(&[0, 1, 2, 3, 4], &mut rng);
        assert!(ds.covariate(0).values()[1].is_nan());
    }
}
