//! Pre-fit isolation forest scoring
//!
//! The forest is trained offline and shipped as a JSON artifact. Scoring here
//! follows the trainer's definition: a sample's anomaly score is
//! `-2^(-E[h(x)] / c(max_samples))` and it is an outlier when the score falls
//! below the `offset` learned from the contamination rate at fit time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// Euler–Mascheroni constant used by the average path length estimate
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Child index marking a leaf node
const LEAF: i64 = -1;

/// A node in an isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Split value; samples `<= threshold` go left
    pub threshold: f64,
    pub left: i64,
    pub right: i64,
    /// Training samples that reached this node
    pub n_samples: u64,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.left == LEAF && self.right == LEAF
    }
}

/// A single isolation tree stored as a flat node array rooted at index 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

impl IsolationTree {
    /// Path length of `value`: leaf depth plus the expected remaining depth
    fn path_length(&self, value: f64) -> f64 {
        let mut index = 0usize;
        let mut depth = 0.0;

        loop {
            let node = &self.nodes[index];
            if node.is_leaf() {
                return depth + average_path_length(node.n_samples);
            }
            index = if value <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
            depth += 1.0;
        }
    }

    fn validate(&self, tree_index: usize) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("tree {} has no nodes", tree_index);
        }
        let len = self.nodes.len() as i64;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            // Children are stored after their parent, which also rules out cycles
            let in_range = |child: i64| child > i as i64 && child < len;
            if !in_range(node.left) || !in_range(node.right) {
                anyhow::bail!(
                    "tree {} node {} has invalid children ({}, {})",
                    tree_index,
                    i,
                    node.left,
                    node.right
                );
            }
            if !node.threshold.is_finite() {
                anyhow::bail!("tree {} node {} has a non-finite threshold", tree_index, i);
            }
        }
        Ok(())
    }
}

/// Immutable isolation forest artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub version: String,
    /// Expected anomaly rate the forest was fit with
    pub contamination: f64,
    /// Subsample size each tree was grown on
    pub max_samples: u64,
    /// Decision offset learned at fit time
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Load a forest from a JSON artifact, verifying its SHA-256 when given
    pub fn load(path: &Path, expected_sha256: Option<&str>) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read model file {:?}", path))?;

        if let Some(expected) = expected_sha256 {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                anyhow::bail!(
                    "Model checksum mismatch: expected {}, got {}",
                    expected,
                    actual
                );
            }
            debug!(checksum = %actual, "Model checksum verified");
        }

        let forest = Self::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            version = %forest.version,
            trees = forest.trees.len(),
            contamination = forest.contamination,
            "Loaded isolation forest"
        );
        Ok(forest)
    }

    /// Parse and validate a forest from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let forest: IsolationForest =
            serde_json::from_slice(bytes).context("Failed to parse model artifact")?;
        forest.validate()?;
        Ok(forest)
    }

    fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            anyhow::bail!("model has no trees");
        }
        if self.max_samples < 2 {
            anyhow::bail!("max_samples must be at least 2, got {}", self.max_samples);
        }
        if !self.offset.is_finite() {
            anyhow::bail!("model offset is not finite");
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i)?;
        }
        Ok(())
    }

    /// Anomaly score in [-1, 0); lower means more anomalous
    pub fn score(&self, value: f64) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(value))
            .sum::<f64>()
            / self.trees.len() as f64;

        -(2f64.powf(-mean_path / average_path_length(self.max_samples)))
    }

    /// True when the sample falls on the outlier side of the fitted offset
    pub fn is_outlier(&self, value: f64) -> bool {
        self.score(value) - self.offset < 0.0
    }
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: u64) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// One split at `split`: values above it isolate after a single step
    pub(crate) fn single_split_forest(split: f64) -> IsolationForest {
        IsolationForest {
            version: "test".to_string(),
            contamination: 0.01,
            max_samples: 256,
            offset: -0.6,
            trees: vec![IsolationTree {
                nodes: vec![
                    TreeNode {
                        threshold: split,
                        left: 1,
                        right: 2,
                        n_samples: 256,
                    },
                    TreeNode {
                        threshold: 0.0,
                        left: LEAF,
                        right: LEAF,
                        n_samples: 255,
                    },
                    TreeNode {
                        threshold: 0.0,
                        left: LEAF,
                        right: LEAF,
                        n_samples: 1,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) ~= 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_isolated_value_scores_as_outlier() {
        let forest = single_split_forest(0.8);

        assert!(forest.is_outlier(0.95));
        assert!(!forest.is_outlier(0.3));
        assert!(forest.score(0.95) < forest.score(0.3));
    }

    #[test]
    fn test_validation_rejects_bad_children() {
        let mut forest = single_split_forest(0.8);
        forest.trees[0].nodes[0].right = 7;
        let bytes = serde_json::to_vec(&forest).unwrap();

        assert!(IsolationForest::from_slice(&bytes).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_forest() {
        let mut forest = single_split_forest(0.8);
        forest.trees.clear();
        let bytes = serde_json::to_vec(&forest).unwrap();

        assert!(IsolationForest::from_slice(&bytes).is_err());
    }

    #[test]
    fn test_load_verifies_checksum() {
        let bytes = serde_json::to_vec(&single_split_forest(0.8)).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();

        let checksum = hex::encode(Sha256::digest(&bytes));
        assert!(IsolationForest::load(file.path(), Some(&checksum)).is_ok());
        assert!(IsolationForest::load(file.path(), Some("deadbeef")).is_err());
        assert!(IsolationForest::load(file.path(), None).is_ok());
    }
}
