//! Gradient-boosted regression trees for binary classification.
//!
//! A [`TreeEnsemble`] is a base margin plus a sum of regression trees in
//! log-odds space. Node 0 of every tree is the root. A split routes a row
//! left when `x < threshold`; missing (non-finite) values follow the
//! node's default direction.

use crate::error::{AppError, Result};
use crate::ml::models::{ModelMetadata, ModelType};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Trait for probabilistic binary classifiers
pub trait Classifier: Send + Sync {
    /// Positive-class probability for each row
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>>;

    /// Expected number of input columns
    fn n_features(&self) -> usize;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;
}

/// A decision tree node (internal or leaf)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Direction taken by missing values
        default_left: bool,
        /// Sum of training hessians that reached this node
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl TreeNode {
    pub fn leaf(value: f64, cover: f64) -> Self {
        TreeNode::Leaf { value, cover }
    }

    pub fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Self {
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            default_left: true,
            cover,
        }
    }

    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }
}

/// Child taken by a row at a split node
#[inline]
pub fn route(value: f64, threshold: f64, default_left: bool, left: usize, right: usize) -> usize {
    let go_left = if value.is_finite() {
        value < threshold
    } else {
        default_left
    };
    if go_left {
        left
    } else {
        right
    }
}

/// A single regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    /// Tree nodes (node 0 is the root)
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Index of the leaf reached by `row`
    pub fn leaf_index(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut idx = 0;
        while let TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            default_left,
            ..
        } = &self.nodes[idx]
        {
            idx = route(row[*feature], *threshold, *default_left, *left, *right);
        }
        idx
    }

    /// Leaf value reached by `row`
    pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        match &self.nodes[self.leaf_index(row)] {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split { .. } => 0.0,
        }
    }

    /// Longest root-to-leaf path, in edges
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Structural validation: child indices in range, every node reached
    /// at most once from the root, features in range, finite covers/values.
    pub fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![0usize];

        while let Some(idx) = stack.pop() {
            if visited[idx] {
                return Err(format!("node {} is reachable more than once", idx));
            }
            visited[idx] = true;

            let node = &self.nodes[idx];
            let cover = node.cover();
            if !cover.is_finite() || cover < 0.0 {
                return Err(format!("node {} has invalid cover {}", idx, cover));
            }

            match node {
                TreeNode::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {} has non-finite value", idx));
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} but the model has {} features",
                            idx, feature, n_features
                        ));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {} has NaN threshold", idx));
                    }
                    if cover <= 0.0 {
                        return Err(format!("split node {} has zero cover", idx));
                    }
                    for child in [*left, *right] {
                        if child >= self.nodes.len() {
                            return Err(format!(
                                "node {} has child {} out of range ({} nodes)",
                                idx,
                                child,
                                self.nodes.len()
                            ));
                        }
                        stack.push(child);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Boosted tree ensemble with a logistic link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    /// Model metadata
    pub metadata: ModelMetadata,

    /// Initial prediction in log-odds space
    pub base_margin: f64,

    /// Number of input columns
    pub n_features: usize,

    /// Boosted trees, in boosting order
    pub trees: Vec<RegressionTree>,
}

impl TreeEnsemble {
    pub fn new(base_margin: f64, n_features: usize, trees: Vec<RegressionTree>) -> Self {
        Self {
            metadata: ModelMetadata::new("churn-gbdt", ModelType::GradientBoostedTrees, n_features),
            base_margin,
            n_features,
            trees,
        }
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Keep only the first `n` trees
    pub fn truncate(&mut self, n: usize) {
        self.trees.truncate(n);
    }

    /// Log-odds for one row
    pub fn predict_margin(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.base_margin + self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
    }

    /// Positive-class probability for one row
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    /// Validate every tree against the declared feature count
    pub fn validate(&self) -> Result<()> {
        if !self.base_margin.is_finite() {
            return Err(AppError::ModelUnavailable(
                "base margin is not finite".to_string(),
            ));
        }
        if self.n_features == 0 {
            return Err(AppError::ModelUnavailable(
                "model declares zero features".to_string(),
            ));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features).map_err(|e| {
                AppError::ModelUnavailable(format!("invalid tree {}: {}", i, e))
            })?;
        }
        Ok(())
    }

    fn check_width(&self, features: &Array2<f64>) -> Result<()> {
        if features.ncols() != self.n_features {
            return Err(AppError::SchemaDrift(format!(
                "model expects {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        Ok(())
    }

    /// Log-odds for each row
    pub fn predict_margins(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_width(features)?;
        let margins: Vec<f64> = (0..features.nrows())
            .into_par_iter()
            .map(|i| self.predict_margin(features.row(i)))
            .collect();
        Ok(Array1::from_vec(margins))
    }
}

impl Classifier for TreeEnsemble {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_margins(features)?.mapv(sigmoid))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// Logistic function
pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Inverse of [`sigmoid`], clamped away from 0 and 1
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-15, 1.0 - 1e-15);
    (p / (1.0 - p)).ln()
}
