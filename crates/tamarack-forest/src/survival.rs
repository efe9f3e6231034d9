//! Survival-analysis primitives shared by split rules and leaf statistics.
//!
//! All curves are indexed against the forest-global grid of sorted
//! distinct event times, so per-leaf arrays from different trees line up
//! when folded into the ensemble.

/// Sorted distinct event times of the training data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    /// Build the grid from training times and event codes (0 = censored).
    #[must_use]
    pub fn from_training(time: &[f64], event: &[u32]) -> Self {
        let mut times: Vec<f64> = time
            .iter()
            .zip(event.iter())
            .filter(|&(_, &e)| e > 0)
            .map(|(&t, _)| t)
            .collect();
        times.sort_unstable_by(f64::total_cmp);
        times.dedup();
        Self { times }
    }

    /// Return the grid times.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Number of grid points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True when the grid has no event times.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// At-risk and event counts for a member set over a time grid.
///
/// Member lists may repeat a case (bootstrap multiplicity); counts are
/// then naturally multiplicity-weighted.
#[derive(Debug, Clone)]
pub(crate) struct RiskTable {
    /// Y(t_k): members still at risk at each grid time.
    pub at_risk: Vec<u32>,
    /// d_j(t_k): events of each type (outer index = type − 1).
    pub events: Vec<Vec<u32>>,
    /// d(t_k): events summed over types.
    pub total_events: Vec<u32>,
}

pub(crate) fn risk_table(
    members: &[usize],
    time: &[f64],
    event: &[u32],
    n_event_types: u32,
    grid: &TimeGrid,
) -> RiskTable {
    let m = grid.len();
    let mut at_risk = vec![0u32; m];
    let mut events = vec![vec![0u32; m]; n_event_types as usize];
    let mut total_events = vec![0u32; m];

    for &i in members {
        let t = time[i];
        // Grid times are exact copies of training event times, so the
        // partition point below lands on the member's own event slot.
        let upto = grid.times.partition_point(|&g| g <= t);
        for slot in at_risk.iter_mut().take(upto) {
            *slot += 1;
        }
        if event[i] > 0 && upto > 0 && grid.times[upto - 1] == t {
            events[(event[i] - 1) as usize][upto - 1] += 1;
            total_events[upto - 1] += 1;
        }
    }

    RiskTable {
        at_risk,
        events,
        total_events,
    }
}

/// Nelson-Aalen all-cause cumulative hazard: `H(t) = Σ_{s<=t} d(s)/Y(s)`.
pub(crate) fn nelson_aalen(table: &RiskTable) -> Vec<f64> {
    let mut h = 0.0;
    table
        .at_risk
        .iter()
        .zip(table.total_events.iter())
        .map(|(&y, &d)| {
            if y > 0 {
                h += f64::from(d) / f64::from(y);
            }
            h
        })
        .collect()
}

/// Kaplan-Meier all-cause survival: `S(t) = Π_{s<=t} (1 − d(s)/Y(s))`.
pub(crate) fn km_survival(table: &RiskTable) -> Vec<f64> {
    let mut s = 1.0;
    table
        .at_risk
        .iter()
        .zip(table.total_events.iter())
        .map(|(&y, &d)| {
            if y > 0 {
                s *= 1.0 - f64::from(d) / f64::from(y);
            }
            s
        })
        .collect()
}

/// Cumulative cause-specific hazard per event type.
pub(crate) fn cause_specific_chf(table: &RiskTable) -> Vec<Vec<f64>> {
    table
        .events
        .iter()
        .map(|ev| {
            let mut h = 0.0;
            table
                .at_risk
                .iter()
                .zip(ev.iter())
                .map(|(&y, &d)| {
                    if y > 0 {
                        h += f64::from(d) / f64::from(y);
                    }
                    h
                })
                .collect()
        })
        .collect()
}

/// Aalen-Johansen cumulative incidence per event type:
/// `CIF_j(t) = Σ_{s<=t} S(s−) · d_j(s)/Y(s)` with the all-cause KM `S`.
pub(crate) fn cumulative_incidence(table: &RiskTable) -> Vec<Vec<f64>> {
    let survival = km_survival(table);
    table
        .events
        .iter()
        .map(|ev| {
            let mut cif = 0.0;
            let mut s_prev = 1.0;
            table
                .at_risk
                .iter()
                .zip(ev.iter())
                .enumerate()
                .map(|(k, (&y, &d))| {
                    if y > 0 {
                        cif += s_prev * f64::from(d) / f64::from(y);
                    }
                    s_prev = survival[k];
                    cif
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Five members, four distinct event times, two event types, one
    /// censored case. Closed-form values verified by hand.
    fn five_member_table() -> (TimeGrid, RiskTable) {
        let time = [1.0, 2.0, 3.0, 4.0, 2.5];
        let event = [1, 1, 2, 1, 0];
        let grid = TimeGrid::from_training(&time, &event);
        let members: Vec<usize> = (0..5).collect();
        let table = risk_table(&members, &time, &event, 2, &grid);
        (grid, table)
    }

    #[test]
    fn grid_is_distinct_event_times_only() {
        let (grid, _) = five_member_table();
        assert_eq!(grid.times(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn at_risk_and_event_counts() {
        let (_, table) = five_member_table();
        assert_eq!(table.at_risk, vec![5, 4, 2, 1]);
        assert_eq!(table.events[0], vec![1, 1, 0, 1]);
        assert_eq!(table.events[1], vec![0, 0, 1, 0]);
        assert_eq!(table.total_events, vec![1, 1, 1, 1]);
    }

    #[test]
    fn nelson_aalen_closed_form() {
        let (_, table) = five_member_table();
        let h = nelson_aalen(&table);
        // 1/5, +1/4, +1/2, +1/1
        let expected = [0.2, 0.45, 0.95, 1.95];
        for (a, e) in h.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "H = {h:?}");
        }
    }

    #[test]
    fn km_survival_closed_form() {
        let (_, table) = five_member_table();
        let s = km_survival(&table);
        let expected = [0.8, 0.6, 0.3, 0.0];
        for (a, e) in s.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "S = {s:?}");
        }
    }

    #[test]
    fn cif_closed_form_and_complement() {
        let (_, table) = five_member_table();
        let cif = cumulative_incidence(&table);
        let expected_1 = [0.2, 0.4, 0.4, 0.7];
        let expected_2 = [0.0, 0.0, 0.3, 0.3];
        for (a, e) in cif[0].iter().zip(expected_1.iter()) {
            assert!((a - e).abs() < 1e-12, "CIF1 = {:?}", cif[0]);
        }
        for (a, e) in cif[1].iter().zip(expected_2.iter()) {
            assert!((a - e).abs() < 1e-12, "CIF2 = {:?}", cif[1]);
        }
        // With every case resolved by the last grid time, the CIFs
        // partition 1 − S(t_max).
        let s = km_survival(&table);
        let total = cif[0][3] + cif[1][3];
        assert!((total - (1.0 - s[3])).abs() < 1e-12);
    }

    #[test]
    fn multiplicity_weighted_counts() {
        let time = [1.0, 2.0];
        let event = [1, 1];
        let grid = TimeGrid::from_training(&time, &event);
        // Case 0 drawn twice by the bootstrap.
        let table = risk_table(&[0, 0, 1], &time, &event, 1, &grid);
        assert_eq!(table.at_risk, vec![3, 1]);
        assert_eq!(table.events[0], vec![2, 1]);
    }
}
