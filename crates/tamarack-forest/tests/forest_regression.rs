//! Behavioral regression tests for tamarack-forest.
//!
//! These pin down the exact split choices, closed-form leaf statistics,
//! bootstrap bookkeeping, and importance behavior that algorithmic
//! changes must not disturb.

use tamarack_forest::{
    BootstrapMode, Column, ColumnEstimate, ColumnPerformance, Dataset, EstimateKind, ForestConfig,
    LeafStats, MtryRule, Node, Performance, ResponseColumn, ResponseSpec, RngMode, SplitValue,
    VimpConfig, VimpMode,
};

// ---------------------------------------------------------------------------
// Scenario A: exact split and leaf memberships on a 6-case mixed dataset
// ---------------------------------------------------------------------------

/// One continuous and one 3-level categorical covariate, six cases,
/// minimum leaf size 2, a single tree grown on all cases (no bootstrap
/// noise), no missing values. The continuous covariate separates the
/// classes perfectly at 6.5; the categorical one is pure noise. The tree
/// must be a single split with leaves {0,1,2} and {3,4,5}.
#[test]
fn scenario_a_exact_split_and_leaves() {
    let ds = Dataset::new(
        vec![
            Column::continuous("x0", vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0]),
            Column::categorical("x1", 3, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]),
        ],
        ResponseSpec::Columns(vec![ResponseColumn::Classification {
            name: "y".to_string(),
            labels: vec![0, 0, 0, 1, 1, 1],
            n_classes: 2,
        }]),
    )
    .unwrap();

    let result = ForestConfig::new(1)
        .unwrap()
        .with_mtry(MtryRule::All)
        .with_nodesize(2)
        .with_bootstrap(BootstrapMode::Provided(vec![(0..6).collect()]))
        .with_seed(42)
        .fit(&ds)
        .unwrap();

    let tree = &result.forest().trees()[0];
    assert_eq!(tree.n_nodes(), 3, "one split, two leaves");

    let Node::Split {
        covariate, value, ..
    } = &tree.nodes()[0]
    else {
        panic!("root must be a split");
    };
    assert_eq!(covariate.index(), 0);
    let SplitValue::Continuous(threshold) = value else {
        panic!("expected a continuous split");
    };
    assert!((threshold - 6.5).abs() < 1e-12, "threshold = {threshold}");

    let mut leaves: Vec<Vec<usize>> = tree
        .nodes()
        .iter()
        .filter_map(Node::terminal)
        .map(|t| t.members().to_vec())
        .collect();
    leaves.sort();
    assert_eq!(leaves, vec![vec![0, 1, 2], vec![3, 4, 5]]);
}

// ---------------------------------------------------------------------------
// Scenario B: closed-form Nelson-Aalen and CIF in a single leaf
// ---------------------------------------------------------------------------

/// Five members forced into a single leaf: events of type 1 at t=1, 2, 4,
/// an event of type 2 at t=3, one case censored at t=2.5. The leaf's
/// Nelson-Aalen and CIF values must match the hand calculation
/// (at-risk 5, 4, 2, 1 at the four grid times).
#[test]
fn scenario_b_single_leaf_survival_closed_form() {
    let ds = Dataset::new(
        vec![Column::continuous("x", vec![0.0, 0.0, 0.0, 0.0, 0.0])],
        ResponseSpec::Survival {
            time: vec![1.0, 2.0, 3.0, 4.0, 2.5],
            event: vec![1, 1, 2, 1, 0],
        },
    )
    .unwrap();

    let result = ForestConfig::new(1)
        .unwrap()
        .with_nodesize(5)
        .with_bootstrap(BootstrapMode::Provided(vec![(0..5).collect()]))
        .with_seed(42)
        .fit(&ds)
        .unwrap();

    let tree = &result.forest().trees()[0];
    assert_eq!(tree.n_leaves(), 1, "all five members share one leaf");
    let terminal = tree.nodes()[0].terminal().unwrap();
    let LeafStats::Survival(leaf) = terminal.stats() else {
        panic!("expected survival leaf stats");
    };

    let expected_na = [0.2, 0.45, 0.95, 1.95];
    for (got, want) in leaf.nelson_aalen.iter().zip(expected_na.iter()) {
        assert!((got - want).abs() < 1e-12, "NA = {:?}", leaf.nelson_aalen);
    }
    let expected_cif1 = [0.2, 0.4, 0.4, 0.7];
    let expected_cif2 = [0.0, 0.0, 0.3, 0.3];
    for (got, want) in leaf.cif[0].iter().zip(expected_cif1.iter()) {
        assert!((got - want).abs() < 1e-12, "CIF1 = {:?}", leaf.cif[0]);
    }
    for (got, want) in leaf.cif[1].iter().zip(expected_cif2.iter()) {
        assert!((got - want).abs() < 1e-12, "CIF2 = {:?}", leaf.cif[1]);
    }
}

// ---------------------------------------------------------------------------
// Scenario C: seeded bootstrap multiset and out-of-bag complement
// ---------------------------------------------------------------------------

/// Bootstrap with replacement over 10 cases, fixed seed: the in-bag
/// multiset holds exactly 10 draws and, together with the zero-count
/// cases, partitions the index set.
#[test]
fn scenario_c_bootstrap_multiset_partitions_cases() {
    let ds = Dataset::new(
        vec![Column::continuous("x", (0..10).map(f64::from).collect())],
        ResponseSpec::Columns(vec![ResponseColumn::Regression {
            name: "y".to_string(),
            values: (0..10).map(|i| f64::from(i % 3)).collect(),
        }]),
    )
    .unwrap();

    let result = ForestConfig::new(1)
        .unwrap()
        .with_seed(2024)
        .fit(&ds)
        .unwrap();

    let counts = &result.inbag_counts()[0];
    assert_eq!(counts.len(), 10);
    let total: u32 = counts.iter().sum();
    assert_eq!(total, 10, "with-replacement bootstrap draws n cases");

    let oob: Vec<usize> = (0..10).filter(|&i| counts[i] == 0).collect();
    let inbag: Vec<usize> = (0..10).filter(|&i| counts[i] > 0).collect();
    assert_eq!(oob.len() + inbag.len(), 10);
    assert!(!oob.is_empty(), "seed 2024 leaves some cases out of bag");

    // Same seed, same multiset.
    let again = ForestConfig::new(1)
        .unwrap()
        .with_seed(2024)
        .fit(&ds)
        .unwrap();
    assert_eq!(counts, &again.inbag_counts()[0]);
}

// ---------------------------------------------------------------------------
// Scenario D: permutation importance of a null covariate
// ---------------------------------------------------------------------------

/// A covariate with no effect on the label must show importance
/// statistically indistinguishable from zero across seeds (loose
/// regression bound, not an exact value).
#[test]
fn scenario_d_null_covariate_vimp_near_zero() {
    let n = 80;
    let informative: Vec<f64> = (0..n)
        .map(|i| if i < n / 2 { i as f64 * 0.1 } else { 20.0 + i as f64 * 0.1 })
        .collect();
    let null: Vec<f64> = (0..n).map(|i| ((i * 7) % 13) as f64).collect();
    let labels: Vec<usize> = (0..n).map(|i| usize::from(i >= n / 2)).collect();

    let ds = Dataset::new(
        vec![
            Column::continuous("informative", informative),
            Column::continuous("null", null),
        ],
        ResponseSpec::Columns(vec![ResponseColumn::Classification {
            name: "y".to_string(),
            labels,
            n_classes: 2,
        }]),
    )
    .unwrap();

    let mut null_deltas = Vec::new();
    for seed in [1u64, 2, 3, 4, 5] {
        let result = ForestConfig::new(40)
            .unwrap()
            .with_seed(seed)
            .with_vimp(VimpConfig {
                mode: VimpMode::Permute,
                groups: None,
            })
            .fit(&ds)
            .unwrap();
        let vimp = result.vimp().unwrap();
        let null_entry = vimp.iter().find(|v| v.covariates == [1]).unwrap();
        null_deltas.push(null_entry.importance[0]);
    }

    let mean = null_deltas.iter().sum::<f64>() / null_deltas.len() as f64;
    assert!(
        mean.abs() < 0.05,
        "null covariate mean importance {mean} not near zero ({null_deltas:?})"
    );
}

// ---------------------------------------------------------------------------
// Structural and reproducibility properties
// ---------------------------------------------------------------------------

/// Flatten/restore reproduces identical leaf assignment for every
/// training case, across all trees.
#[test]
fn flatten_restore_round_trip_routing() {
    let n = 40;
    let ds = Dataset::new(
        vec![
            Column::continuous("x0", (0..n).map(|i| (i as f64 * 0.73) % 11.0).collect()),
            Column::categorical("x1", 4, (0..n).map(|i| ((i % 4) + 1) as f64).collect()),
        ],
        ResponseSpec::Survival {
            time: (0..n).map(|i| 1.0 + ((i * 13) % 17) as f64).collect(),
            event: (0..n).map(|i| u32::from(i % 3 != 0)).collect(),
        },
    )
    .unwrap();

    let forest = ForestConfig::new(8)
        .unwrap()
        .with_seed(11)
        .fit(&ds)
        .unwrap()
        .into_forest();
    let restored = forest.flatten().restore().unwrap();

    for (orig, rest) in forest.trees().iter().zip(restored.trees()) {
        for case in 0..n {
            let a = orig.terminal_for_case(&ds, case);
            let b = rest.terminal_for_case(&ds, case);
            assert_eq!(a.members(), b.members());
        }
    }
}

/// Serial-mode training is identical run to run and independent of the
/// machine's core count by construction; two runs must agree exactly.
#[test]
fn serial_mode_exactly_reproducible() {
    let n = 30;
    let ds = Dataset::new(
        vec![Column::continuous(
            "x",
            (0..n).map(|i| (i as f64 * 1.37) % 7.0).collect(),
        )],
        ResponseSpec::Columns(vec![ResponseColumn::Regression {
            name: "y".to_string(),
            values: (0..n).map(|i| (i as f64 * 1.37) % 7.0).collect(),
        }]),
    )
    .unwrap();

    let run = || {
        ForestConfig::new(6)
            .unwrap()
            .with_rng_mode(RngMode::Serial)
            .with_seed(5)
            .fit(&ds)
            .unwrap()
    };
    let (r1, r2) = (run(), run());

    assert_eq!(r1.oob_ensemble().denom, r2.oob_ensemble().denom);
    let (EstimateKind::Columns(c1), EstimateKind::Columns(c2)) =
        (&r1.oob_ensemble().kind, &r2.oob_ensemble().kind)
    else {
        panic!("expected column estimates");
    };
    let (ColumnEstimate::Mean(m1), ColumnEstimate::Mean(m2)) = (&c1[0], &c2[0]) else {
        panic!("expected mean estimates");
    };
    for (a, b) in m1.iter().zip(m2.iter()) {
        assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
    }
}

/// A regression forest on noise-free linear structure must explain most
/// of the variance out of bag.
#[test]
fn regression_oob_rsq_above_threshold() {
    let n = 100;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.25).collect();
    let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
    let ds = Dataset::new(
        vec![Column::continuous("x", x)],
        ResponseSpec::Columns(vec![ResponseColumn::Regression {
            name: "y".to_string(),
            values: y,
        }]),
    )
    .unwrap();

    let result = ForestConfig::new(60).unwrap().with_seed(42).fit(&ds).unwrap();
    let Performance::Columns(cols) = result.performance() else {
        panic!("expected column performance");
    };
    let ColumnPerformance::Regression { rsq, .. } = &cols[0] else {
        panic!("expected regression performance");
    };
    assert!(*rsq > 0.9, "oob rsq = {rsq}");
}

/// Survival forest: risk ordering must be learnable from the covariate,
/// yielding concordance error clearly below chance.
#[test]
fn survival_oob_concordance_above_chance() {
    let n = 80;
    // Larger x → longer survival, with a deterministic censoring sprinkle.
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let time: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * 0.5).collect();
    let event: Vec<u32> = (0..n).map(|i| u32::from(i % 5 != 0)).collect();
    let ds = Dataset::new(
        vec![Column::continuous("x", x)],
        ResponseSpec::Survival { time, event },
    )
    .unwrap();

    let result = ForestConfig::new(50).unwrap().with_seed(42).fit(&ds).unwrap();
    let Performance::Survival { error, brier } = result.performance() else {
        panic!("expected survival performance");
    };
    assert!(error[0] < 0.25, "concordance error = {}", error[0]);
    assert!(brier.unwrap().is_finite());
}

/// Competing-risk forest reports per-event-type performance.
#[test]
fn competing_risk_reports_per_event_performance() {
    let n = 60;
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let time: Vec<f64> = (0..n).map(|i| 1.0 + ((i * 7) % 23) as f64).collect();
    let event: Vec<u32> = (0..n)
        .map(|i| match i % 4 {
            0 => 0,
            1 | 2 => 1,
            _ => 2,
        })
        .collect();
    let ds = Dataset::new(
        vec![Column::continuous("x", x)],
        ResponseSpec::Survival { time, event },
    )
    .unwrap();

    let result = ForestConfig::new(30).unwrap().with_seed(9).fit(&ds).unwrap();
    let Performance::Survival { error, brier } = result.performance() else {
        panic!("expected survival performance");
    };
    assert_eq!(error.len(), 2, "one error per event type");
    assert!(brier.is_none(), "no single-type Brier under competing risks");
}
