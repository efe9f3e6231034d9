//! Flattened per-tree node tables.
//!
//! A forest flattens into parallel per-node arrays — tree identifier,
//! node identifier, split covariate, continuous split point, and an
//! offset/length pair into a packed categorical-partition word buffer —
//! plus per-terminal statistic tables, so a tree can be reconstructed
//! without re-running growth. Rows are emitted in preorder (the arena
//! order), which is what restore consumes.

use std::collections::HashMap;

use crate::data::Family;
use crate::ensemble::EnsembleLayout;
use crate::error::ForestError;
use crate::factor::MwcpPattern;
use crate::forest::Forest;
use crate::node::{CovariateIndex, Node, NodeIndex, SplitValue};
use crate::survival::TimeGrid;
use crate::terminal::{LeafStats, Terminal};
use crate::tree::Tree;

/// Statistics table row for one terminal node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlatTerminal {
    /// Owning tree (0-based).
    pub tree_id: u32,
    /// Node identifier within the tree (the preorder row index).
    pub node_id: u32,
    /// Leaf membership (training case indices with multiplicity).
    pub members: Vec<usize>,
    /// The leaf statistics block.
    pub stats: LeafStats,
}

/// A forest flattened into parallel node arrays plus terminal tables.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlatForest {
    /// Tree identifier per node row.
    pub tree_id: Vec<u32>,
    /// Node identifier per row (preorder position within its tree).
    pub node_id: Vec<u32>,
    /// Split covariate + 1; 0 marks a leaf row.
    pub parm_id: Vec<u32>,
    /// Continuous split point (0 for leaves and categorical splits).
    pub cont_pt: Vec<f64>,
    /// Split-quality statistic (0 for leaves).
    pub split_stat: Vec<f64>,
    /// Packed-partition word count (0 for leaves and continuous splits).
    pub mwcp_sz: Vec<u32>,
    /// Offset of this row's words in [`FlatForest::mwcp`].
    pub mwcp_pt: Vec<u32>,
    /// Packed categorical-partition words.
    pub mwcp: Vec<u32>,
    /// Per-terminal statistic tables.
    pub terminals: Vec<FlatTerminal>,
    /// Covariate count, for reconstruction.
    pub n_covariates: usize,
    /// Model family, for reconstruction.
    pub family: Family,
    /// Event-time grid, for reconstruction.
    pub grid: Option<TimeGrid>,
    /// Ensemble storage layout, for reconstruction.
    pub layout: EnsembleLayout,
}

impl Forest {
    /// Flatten every tree into the node/terminal tables.
    #[must_use]
    pub fn flatten(&self) -> FlatForest {
        let mut flat = FlatForest {
            tree_id: Vec::new(),
            node_id: Vec::new(),
            parm_id: Vec::new(),
            cont_pt: Vec::new(),
            split_stat: Vec::new(),
            mwcp_sz: Vec::new(),
            mwcp_pt: Vec::new(),
            mwcp: Vec::new(),
            terminals: Vec::new(),
            n_covariates: self.n_covariates,
            family: self.family,
            grid: self.grid.clone(),
            layout: self.layout.clone(),
        };
        for (b, tree) in self.trees.iter().enumerate() {
            for (node_id, node) in tree.nodes().iter().enumerate() {
                flat.tree_id.push(b as u32);
                flat.node_id.push(node_id as u32);
                match node {
                    Node::Leaf { terminal, .. } => {
                        flat.parm_id.push(0);
                        flat.cont_pt.push(0.0);
                        flat.split_stat.push(0.0);
                        flat.mwcp_sz.push(0);
                        flat.mwcp_pt.push(0);
                        flat.terminals.push(FlatTerminal {
                            tree_id: b as u32,
                            node_id: node_id as u32,
                            members: terminal.members().to_vec(),
                            stats: terminal.stats().clone(),
                        });
                    }
                    Node::Split {
                        covariate,
                        value,
                        statistic,
                        ..
                    } => {
                        flat.parm_id.push(covariate.index() as u32 + 1);
                        flat.split_stat.push(*statistic);
                        match value {
                            SplitValue::Continuous(threshold) => {
                                flat.cont_pt.push(*threshold);
                                flat.mwcp_sz.push(0);
                                flat.mwcp_pt.push(0);
                            }
                            SplitValue::Categorical(pattern) => {
                                flat.cont_pt.push(0.0);
                                flat.mwcp_sz.push(pattern.words().len() as u32);
                                flat.mwcp_pt.push(flat.mwcp.len() as u32);
                                flat.mwcp.extend_from_slice(pattern.words());
                            }
                        }
                    }
                }
            }
        }
        flat
    }
}

impl FlatForest {
    /// Reconstruct a routing-identical forest from the tables.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::MalformedFlatForest`] when the tables are
    /// structurally inconsistent (truncated trees, missing terminal rows,
    /// out-of-range buffer references).
    pub fn restore(&self) -> Result<Forest, ForestError> {
        let n_rows = self.tree_id.len();
        if [
            self.node_id.len(),
            self.parm_id.len(),
            self.cont_pt.len(),
            self.split_stat.len(),
            self.mwcp_sz.len(),
            self.mwcp_pt.len(),
        ]
        .iter()
        .any(|&l| l != n_rows)
        {
            return Err(ForestError::MalformedFlatForest {
                reason: "node arrays have inconsistent lengths".to_string(),
            });
        }

        let terminals: HashMap<(u32, u32), &FlatTerminal> = self
            .terminals
            .iter()
            .map(|t| ((t.tree_id, t.node_id), t))
            .collect();

        let mut trees = Vec::new();
        let mut row = 0usize;
        while row < n_rows {
            let tree_id = self.tree_id[row];
            let start = row;
            while row < n_rows && self.tree_id[row] == tree_id {
                row += 1;
            }
            let mut cursor = start;
            let mut arena = Vec::with_capacity(row - start);
            self.restore_node(&mut cursor, row, 0, &terminals, &mut arena)?;
            if cursor != row {
                return Err(ForestError::MalformedFlatForest {
                    reason: format!("tree {tree_id} has {} unreachable rows", row - cursor),
                });
            }
            trees.push(Tree { nodes: arena });
        }

        Ok(Forest {
            trees,
            n_covariates: self.n_covariates,
            family: self.family,
            grid: self.grid.clone(),
            layout: self.layout.clone(),
        })
    }

    /// Consume one preorder row (and its subtree) into the arena.
    /// Returns the node's arena index and its member count.
    fn restore_node(
        &self,
        cursor: &mut usize,
        end: usize,
        depth: usize,
        terminals: &HashMap<(u32, u32), &FlatTerminal>,
        arena: &mut Vec<Node>,
    ) -> Result<(NodeIndex, usize), ForestError> {
        if *cursor >= end {
            return Err(ForestError::MalformedFlatForest {
                reason: "tree truncated mid-branch".to_string(),
            });
        }
        let row = *cursor;
        *cursor += 1;

        if self.parm_id[row] == 0 {
            let key = (self.tree_id[row], self.node_id[row]);
            let flat_term = terminals.get(&key).ok_or_else(|| {
                ForestError::MalformedFlatForest {
                    reason: format!("leaf ({}, {}) has no terminal row", key.0, key.1),
                }
            })?;
            let n_members = flat_term.members.len();
            let idx = arena.len();
            arena.push(Node::Leaf {
                depth,
                terminal: Terminal::from_parts(flat_term.members.clone(), flat_term.stats.clone()),
            });
            return Ok((NodeIndex::new(idx), n_members));
        }

        let value = if self.mwcp_sz[row] > 0 {
            let from = self.mwcp_pt[row] as usize;
            let to = from + self.mwcp_sz[row] as usize;
            if to > self.mwcp.len() {
                return Err(ForestError::MalformedFlatForest {
                    reason: format!("row {row} references packed words beyond the buffer"),
                });
            }
            SplitValue::Categorical(MwcpPattern::from_words(self.mwcp[from..to].to_vec()))
        } else {
            SplitValue::Continuous(self.cont_pt[row])
        };

        let idx = arena.len();
        arena.push(Node::Leaf {
            depth,
            terminal: Terminal::from_parts(Vec::new(), LeafStats::None),
        });

        let (left, n_left) = self.restore_node(cursor, end, depth + 1, terminals, arena)?;
        let (right, n_right) = self.restore_node(cursor, end, depth + 1, terminals, arena)?;

        arena[idx] = Node::Split {
            covariate: CovariateIndex::new(self.parm_id[row] as usize - 1),
            value,
            statistic: self.split_stat[row],
            depth,
            n_members: n_left + n_right,
            left,
            right,
        };
        Ok((NodeIndex::new(idx), n_left + n_right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForestConfig, MtryRule};
    use crate::data::{Column, Dataset, ResponseColumn, ResponseSpec};

    fn mixed_dataset() -> Dataset {
        Dataset::new(
            vec![
                Column::continuous("x0", vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 1.5, 10.5]),
                Column::categorical("x1", 3, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 2.0, 1.0]),
            ],
            ResponseSpec::Columns(vec![ResponseColumn::Classification {
                name: "y".to_string(),
                labels: vec![0, 0, 0, 1, 1, 1, 0, 1],
                n_classes: 2,
            }]),
        )
        .unwrap()
    }

    #[test]
    fn round_trip_identical_routing() {
        let ds = mixed_dataset();
        let forest = ForestConfig::new(6)
            .unwrap()
            .with_mtry(MtryRule::All)
            .with_seed(42)
            .fit(&ds)
            .unwrap()
            .into_forest();

        let restored = forest.flatten().restore().unwrap();
        assert_eq!(restored.n_trees(), forest.n_trees());

        for (t_orig, t_rest) in forest.trees().iter().zip(restored.trees()) {
            assert_eq!(t_orig.n_nodes(), t_rest.n_nodes());
            for case in 0..ds.n_cases() {
                let value_of = |j: usize| ds.covariate(j).values()[case];
                assert_eq!(
                    t_orig.leaf_index(value_of),
                    t_rest.leaf_index(value_of),
                    "case {case} routed differently after restore"
                );
            }
        }
    }

    #[test]
    fn terminal_stats_survive_round_trip() {
        let ds = mixed_dataset();
        let forest = ForestConfig::new(3)
            .unwrap()
            .with_seed(7)
            .fit(&ds)
            .unwrap()
            .into_forest();
        let restored = forest.flatten().restore().unwrap();
        for case in 0..ds.n_cases() {
            let a = forest.trees()[0].terminal_for_case(&ds, case);
            let b = restored.trees()[0].terminal_for_case(&ds, case);
            assert_eq!(a.members(), b.members());
            assert_eq!(a.stats(), b.stats());
        }
    }

    #[test]
    fn truncated_tables_rejected() {
        let ds = mixed_dataset();
        let forest = ForestConfig::new(2)
            .unwrap()
            .with_seed(3)
            .fit(&ds)
            .unwrap()
            .into_forest();
        let mut flat = forest.flatten();
        flat.node_id.pop();
        assert!(matches!(
            flat.restore(),
            Err(ForestError::MalformedFlatForest { .. })
        ));
    }

    #[test]
    fn missing_terminal_row_rejected() {
        let ds = mixed_dataset();
        let forest = ForestConfig::new(2)
            .unwrap()
            .with_seed(3)
            .fit(&ds)
            .unwrap()
            .into_forest();
        let mut flat = forest.flatten();
        flat.terminals.clear();
        assert!(matches!(
            flat.restore(),
            Err(ForestError::MalformedFlatForest { .. })
        ));
    }
}
