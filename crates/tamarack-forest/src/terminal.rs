//! Leaf-level statistics records.
//!
//! A `Terminal` mates one-to-one with a leaf [`crate::node::Node`] and
//! carries the membership list plus the family-specific outcome
//! summaries. Statistics are computed once when the leaf is finalized
//! during growth; prediction replay against held-out cases reads them
//! non-destructively.

use crate::data::{Dataset, ResponseColumn, ResponseSpec};
use crate::survival::{
    TimeGrid, cause_specific_chf, cumulative_incidence, km_survival, nelson_aalen, risk_table,
};

/// Survival-family leaf summaries, indexed against the forest time grid.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SurvivalLeaf {
    /// Members at risk at each grid time.
    pub at_risk: Vec<u32>,
    /// Event counts per event type at each grid time.
    pub events: Vec<Vec<u32>>,
    /// Nelson-Aalen all-cause cumulative hazard.
    pub nelson_aalen: Vec<f64>,
    /// Kaplan-Meier all-cause survival.
    pub survival: Vec<f64>,
    /// Cumulative cause-specific hazard per event type.
    pub csh: Vec<Vec<f64>>,
    /// Cumulative incidence per event type.
    pub cif: Vec<Vec<f64>>,
    /// Mortality per event type: the cumulative hazard summed over the
    /// grid for single-type data, the CIF summed over the grid (expected
    /// life lost analog) under competing risks.
    pub mortality: Vec<f64>,
}

/// Leaf summary for one classification/regression response column.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ColumnLeaf {
    /// Class-probability vector and its argmax.
    Classification {
        /// Normalized class probabilities.
        probs: Vec<f64>,
        /// Majority class (argmax of `probs`).
        majority: usize,
    },
    /// Mean response of the leaf members.
    Regression {
        /// Member mean.
        mean: f64,
    },
}

/// Family-specific leaf statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LeafStats {
    /// Survival / competing-risk summaries.
    Survival(SurvivalLeaf),
    /// One summary per response column.
    Columns(Vec<ColumnLeaf>),
    /// No response (unsupervised growth).
    None,
}

/// The leaf-statistics record mated with a terminal node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Terminal {
    /// Bootstrap members routed to this leaf (with multiplicity).
    members: Vec<usize>,
    stats: LeafStats,
}

impl Terminal {
    /// Compute the family-specific statistics for a finalized leaf.
    pub(crate) fn compute(members: Vec<usize>, dataset: &Dataset, grid: Option<&TimeGrid>) -> Self {
        let stats = match dataset.response() {
            ResponseSpec::None => LeafStats::None,
            ResponseSpec::Survival { time, event } => {
                let grid = grid.expect("survival growth always carries a time grid");
                LeafStats::Survival(survival_leaf(
                    &members,
                    time,
                    event,
                    dataset.n_event_types(),
                    grid,
                ))
            }
            ResponseSpec::Columns(cols) => LeafStats::Columns(
                cols.iter().map(|col| column_leaf(&members, col)).collect(),
            ),
        };
        Self { members, stats }
    }

    /// Rebuild a terminal from its parts (flattened-forest restore).
    #[must_use]
    pub fn from_parts(members: Vec<usize>, stats: LeafStats) -> Self {
        Self { members, stats }
    }

    /// Return the member list (with bootstrap multiplicity).
    #[must_use]
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Return the member count.
    #[must_use]
    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    /// Return the family-specific statistics.
    #[must_use]
    pub fn stats(&self) -> &LeafStats {
        &self.stats
    }
}

fn survival_leaf(
    members: &[usize],
    time: &[f64],
    event: &[u32],
    n_event_types: u32,
    grid: &TimeGrid,
) -> SurvivalLeaf {
    let table = risk_table(members, time, event, n_event_types, grid);
    let na = nelson_aalen(&table);
    let survival = km_survival(&table);
    let csh = cause_specific_chf(&table);
    let cif = cumulative_incidence(&table);

    let mortality = if n_event_types <= 1 {
        vec![na.iter().sum()]
    } else {
        cif.iter().map(|c| c.iter().sum()).collect()
    };

    SurvivalLeaf {
        at_risk: table.at_risk,
        events: table.events,
        nelson_aalen: na,
        survival,
        csh,
        cif,
        mortality,
    }
}

fn column_leaf(members: &[usize], col: &ResponseColumn) -> ColumnLeaf {
    match col {
        ResponseColumn::Classification {
            labels, n_classes, ..
        } => {
            let mut counts = vec![0usize; *n_classes];
            for &i in members {
                counts[labels[i]] += 1;
            }
            let total = members.len() as f64;
            let probs: Vec<f64> = counts.iter().map(|&c| c as f64 / total).collect();
            let majority = counts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            ColumnLeaf::Classification { probs, majority }
        }
        ResponseColumn::Regression { values, .. } => {
            let mean = members.iter().map(|&i| values[i]).sum::<f64>() / members.len() as f64;
            ColumnLeaf::Regression { mean }
        }
    }
}
