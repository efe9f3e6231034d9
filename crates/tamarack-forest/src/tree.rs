//! Single-tree growth and routing.
//!
//! A tree is grown top-down from its bootstrap members: impute missing
//! member values, search for the best split, fork and recurse, finalize
//! a terminal record when no split exists, the membership is at or below
//! the minimum leaf size, or the depth cap is reached. Trees own their
//! arena exclusively; nothing here is shared across trees during growth.

use rand::Rng;
use tracing::debug;

use crate::data::Dataset;
use crate::impute::TreeData;
use crate::node::{Node, NodeIndex, SplitValue};
use crate::split::SplitSearch;
use crate::survival::TimeGrid;
use crate::terminal::{LeafStats, Terminal};

/// A grown tree: an arena of nodes with the root at index 0.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
}

/// Per-tree growth inputs assembled by the forest trainer.
pub(crate) struct GrowContext<'a> {
    pub dataset: &'a Dataset,
    pub grid: Option<&'a TimeGrid>,
    pub search: SplitSearch<'a>,
    pub nodesize: usize,
    pub max_depth: Option<usize>,
    pub impute: bool,
}

/// Grow one tree from its bootstrap members (with multiplicity).
pub(crate) fn grow_tree(ctx: &GrowContext<'_>, members: Vec<usize>, rng: &mut impl Rng) -> Tree {
    let mut x = TreeData::new(ctx.dataset, ctx.impute);
    let mut arena = Vec::new();
    build_node(ctx, &mut x, members, 0, rng, &mut arena);
    debug!(n_nodes = arena.len(), "tree grown");
    Tree { nodes: arena }
}

fn build_node(
    ctx: &GrowContext<'_>,
    x: &mut TreeData<'_>,
    members: Vec<usize>,
    depth: usize,
    rng: &mut impl Rng,
    arena: &mut Vec<Node>,
) -> NodeIndex {
    let make_leaf = |members: Vec<usize>, arena: &mut Vec<Node>| -> NodeIndex {
        let idx = arena.len();
        arena.push(Node::Leaf {
            depth,
            terminal: Terminal::compute(members, ctx.dataset, ctx.grid),
        });
        NodeIndex::new(idx)
    };

    // Stopping rules: membership at or below the minimum leaf size, or
    // the depth cap.
    let depth_reached = ctx.max_depth.is_some_and(|d| depth >= d);
    if members.len() <= ctx.nodesize || depth_reached {
        return make_leaf(members, arena);
    }

    if ctx.impute {
        x.impute_node(&members, rng);
    }

    let Some(split) = ctx.search.best_split(x, &members, rng) else {
        // No admissible split: the node is irrevocably terminal.
        return make_leaf(members, arena);
    };

    // Arena pattern: reserve the index, recurse, then overwrite with the
    // materialized split.
    let node_idx = arena.len();
    arena.push(Node::Leaf {
        depth,
        terminal: Terminal::from_parts(Vec::new(), LeafStats::None),
    });

    let n_members = members.len();
    let left = build_node(ctx, x, split.left, depth + 1, rng, arena);
    let right = build_node(ctx, x, split.right, depth + 1, rng, arena);

    arena[node_idx] = Node::Split {
        covariate: split.covariate,
        value: split.value,
        statistic: split.statistic,
        depth,
        n_members,
        left,
        right,
    };

    NodeIndex::new(node_idx)
}

impl Tree {
    /// Return the node arena (root at index 0).
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the total number of nodes.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth (a lone root leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(Node::depth).max().unwrap_or(0)
    }

    /// Route a case to its leaf, reading covariate values through
    /// `value_of`. A missing value at a split follows the daughter with
    /// the larger in-bag membership (left on ties).
    pub(crate) fn leaf_index<F: Fn(usize) -> f64>(&self, value_of: F) -> NodeIndex {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return NodeIndex::new(idx),
                Node::Split {
                    covariate,
                    value,
                    left,
                    right,
                    ..
                } => {
                    let v = value_of(covariate.index());
                    let goes_left = if v.is_nan() {
                        self.nodes[left.index()].n_members()
                            >= self.nodes[right.index()].n_members()
                    } else {
                        match value {
                            SplitValue::Continuous(threshold) => v <= *threshold,
                            SplitValue::Categorical(pattern) => pattern.goes_left(v as u32),
                        }
                    };
                    idx = if goes_left { left.index() } else { right.index() };
                }
            }
        }
    }

    /// Route a training-data case to its terminal record.
    #[must_use]
    pub fn terminal_for_case(&self, dataset: &Dataset, case: usize) -> &Terminal {
        let leaf = self.leaf_index(|j| dataset.covariate(j).values()[case]);
        self.nodes[leaf.index()]
            .terminal()
            .expect("routing always ends at a leaf")
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::data::{Column, ResponseColumn, ResponseSpec};
    use crate::rules::{SplitRule, Weighting};

    fn grow(
        ds: &Dataset,
        nodesize: usize,
        max_depth: Option<usize>,
        seed: u64,
    ) -> Tree {
        let weights = vec![1.0; ds.n_covariates()];
        let rule = SplitRule::default_for(ds.family());
        let ctx = GrowContext {
            dataset: ds,
            grid: None,
            search: SplitSearch {
                dataset: ds,
                grid: None,
                rule,
                event_weights: &[],
                custom: None,
                covariate_weights: &weights,
                mtry: ds.n_covariates(),
                nodesize,
                max_exact_levels: 12,
                fallback_partition_draws: 32,
            },
            nodesize,
            max_depth,
            impute: true,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        grow_tree(&ctx, (0..ds.n_cases()).collect(), &mut rng)
    }

    fn separable_dataset() -> Dataset {
        Dataset::new(
            vec![Column::continuous(
                "x",
                vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0],
            )],
            ResponseSpec::Columns(vec![ResponseColumn::Classification {
                name: "y".to_string(),
                labels: vec![0, 0, 0, 1, 1, 1],
                n_classes: 2,
            }]),
        )
        .unwrap()
    }

    /// A node is a leaf iff it carries a terminal record; interior nodes
    /// have exactly two children whose depths are the parent's + 1.
    fn assert_structural_invariants(tree: &Tree) {
        for node in tree.nodes() {
            match node {
                Node::Leaf { terminal, .. } => {
                    assert!(node.terminal().is_some());
                    assert!(terminal.n_members() > 0);
                }
                Node::Split {
                    depth, left, right, ..
                } => {
                    assert_eq!(tree.nodes()[left.index()].depth(), depth + 1);
                    assert_eq!(tree.nodes()[right.index()].depth(), depth + 1);
                }
            }
        }
    }

    #[test]
    fn separable_tree_routes_correctly() {
        let ds = separable_dataset();
        let tree = grow(&ds, 1, None, 42);
        assert_structural_invariants(&tree);
        let left_leaf = tree.leaf_index(|_| 2.0);
        let right_leaf = tree.leaf_index(|_| 11.0);
        assert_ne!(left_leaf, right_leaf);
    }

    #[test]
    fn nodesize_stops_growth() {
        let ds = separable_dataset();
        let tree = grow(&ds, 6, None, 42);
        // All six members at or below the minimum leaf size: root leaf.
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn max_depth_caps_growth() {
        let ds = Dataset::new(
            vec![
                Column::continuous("x0", vec![0.0, 0.0, 1.0, 1.0]),
                Column::continuous("x1", vec![0.0, 1.0, 0.0, 1.0]),
            ],
            ResponseSpec::Columns(vec![ResponseColumn::Classification {
                name: "y".to_string(),
                labels: vec![0, 1, 1, 0],
                n_classes: 2,
            }]),
        )
        .unwrap();
        let tree = grow(&ds, 1, Some(1), 42);
        assert!(tree.depth() <= 1);
        assert_structural_invariants(&tree);
    }

    #[test]
    fn pure_node_becomes_terminal() {
        let ds = Dataset::new(
            vec![Column::continuous("x", vec![1.0, 2.0, 3.0])],
            ResponseSpec::Columns(vec![ResponseColumn::Classification {
                name: "y".to_string(),
                labels: vec![0, 0, 0],
                n_classes: 2,
            }]),
        )
        .unwrap();
        // A pure node admits no improving split and stays a single leaf.
        let tree = grow(&ds, 1, None, 42);
        assert_eq!(tree.n_leaves(), 1);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let ds = separable_dataset();
        let t1 = grow(&ds, 1, None, 123);
        let t2 = grow(&ds, 1, None, 123);
        for case in 0..ds.n_cases() {
            assert_eq!(
                t1.leaf_index(|j| ds.covariate(j).values()[case]),
                t2.leaf_index(|j| ds.covariate(j).values()[case]),
            );
        }
    }

    #[test]
    fn bootstrap_multiplicity_counted_in_membership() {
        let ds = separable_dataset();
        let weights = vec![1.0; 1];
        let ctx = GrowContext {
            dataset: &ds,
            grid: None,
            search: SplitSearch {
                dataset: &ds,
                grid: None,
                rule: SplitRule::WeightedGini(Weighting::Unweighted),
                event_weights: &[],
                custom: None,
                covariate_weights: &weights,
                mtry: 1,
                nodesize: 1,
                max_exact_levels: 12,
                fallback_partition_draws: 32,
            },
            nodesize: 1,
            max_depth: None,
            impute: false,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let tree = grow_tree(&ctx, vec![0, 0, 1, 5, 5, 5], &mut rng);
        let total: usize = tree
            .nodes()
            .iter()
            .filter_map(Node::terminal)
            .map(Terminal::n_members)
            .sum();
        assert_eq!(total, 6);
    }
}
