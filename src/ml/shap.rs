//! Path-dependent TreeSHAP over a [`TreeEnsemble`].
//!
//! Attributions are computed in margin (log-odds) space for the positive
//! class, conditioning on the training cover of each node. They satisfy
//! local accuracy: `expected_value + Σ φ = margin(x)`.

use crate::error::{AppError, Result};
use crate::ml::tree::{route, RegressionTree, TreeEnsemble, TreeNode};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use std::sync::Arc;

/// Per-feature attribution of a single prediction
pub trait Explainer: Send + Sync {
    /// Mean model output in margin space over the training distribution
    fn expected_value(&self) -> f64;

    /// Signed attribution per input column
    fn shap_values(&self, row: ArrayView1<'_, f64>) -> Result<Array1<f64>>;
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Exact TreeSHAP explainer bound to one model
#[derive(Debug, Clone)]
pub struct TreeExplainer {
    model: Arc<TreeEnsemble>,
    expected_value: f64,
}

impl TreeExplainer {
    pub fn new(model: Arc<TreeEnsemble>) -> Result<Self> {
        model
            .validate()
            .map_err(|e| AppError::Explanation(e.to_string()))?;

        let expected_value = model.base_margin
            + model
                .trees
                .iter()
                .map(|tree| node_expectation(&tree.nodes, 0))
                .sum::<f64>();

        Ok(Self {
            model,
            expected_value,
        })
    }

    pub fn model(&self) -> &TreeEnsemble {
        &self.model
    }

    /// Attributions for every row of `features` (rows in parallel)
    pub fn shap_matrix(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let rows: Vec<Array1<f64>> = (0..features.nrows())
            .into_par_iter()
            .map(|i| self.shap_values(features.row(i)))
            .collect::<Result<_>>()?;

        let mut out = Array2::<f64>::zeros((features.nrows(), self.model.n_features));
        for (i, row) in rows.into_iter().enumerate() {
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }

    fn tree_shap(&self, tree: &RegressionTree, row: ArrayView1<'_, f64>, phi: &mut [f64]) {
        recurse(&tree.nodes, 0, row, phi, &[], 1.0, 1.0, None);
    }
}

impl Explainer for TreeExplainer {
    fn expected_value(&self) -> f64 {
        self.expected_value
    }

    fn shap_values(&self, row: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        if row.len() != self.model.n_features {
            return Err(AppError::Explanation(format!(
                "row has {} features, model expects {}",
                row.len(),
                self.model.n_features
            )));
        }

        let mut phi = vec![0.0; self.model.n_features];
        for tree in &self.model.trees {
            self.tree_shap(tree, row, &mut phi);
        }

        if phi.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Explanation(
                "non-finite attribution value".to_string(),
            ));
        }
        Ok(Array1::from_vec(phi))
    }
}

/// Cover-weighted mean leaf value below `idx`
fn node_expectation(nodes: &[TreeNode], idx: usize) -> f64 {
    match &nodes[idx] {
        TreeNode::Leaf { value, .. } => *value,
        TreeNode::Split {
            left, right, cover, ..
        } => {
            let l = nodes[*left].cover() / cover;
            let r = nodes[*right].cover() / cover;
            l * node_expectation(nodes, *left) + r * node_expectation(nodes, *right)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    nodes: &[TreeNode],
    idx: usize,
    row: ArrayView1<'_, f64>,
    phi: &mut [f64],
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    let mut depth = path.len();
    extend_path(&mut path, zero_fraction, one_fraction, feature);

    match &nodes[idx] {
        TreeNode::Leaf { value, .. } => {
            for i in 1..=depth {
                let weight = unwound_path_sum(&path, depth, i);
                let element = path[i];
                if let Some(f) = element.feature {
                    phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
        }
        TreeNode::Split {
            feature: split_feature,
            threshold,
            left,
            right,
            default_left,
            cover,
        } => {
            let hot = route(row[*split_feature], *threshold, *default_left, *left, *right);
            let cold = if hot == *left { *right } else { *left };
            let hot_zero_fraction = nodes[hot].cover() / cover;
            let cold_zero_fraction = nodes[cold].cover() / cover;

            let mut incoming_zero_fraction = 1.0;
            let mut incoming_one_fraction = 1.0;

            // A feature already on the path is unwound so it is counted once
            if let Some(path_index) = (1..=depth).find(|&i| path[i].feature == Some(*split_feature)) {
                incoming_zero_fraction = path[path_index].zero_fraction;
                incoming_one_fraction = path[path_index].one_fraction;
                unwind_path(&mut path, depth, path_index);
                path.truncate(depth);
                depth -= 1;
            }
            debug_assert_eq!(path.len(), depth + 1);

            recurse(
                nodes,
                hot,
                row,
                phi,
                &path,
                hot_zero_fraction * incoming_zero_fraction,
                incoming_one_fraction,
                Some(*split_feature),
            );
            recurse(
                nodes,
                cold,
                row,
                phi,
                &path,
                cold_zero_fraction * incoming_zero_fraction,
                0.0,
                Some(*split_feature),
            );
        }
    }
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });

    let d = depth as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i as f64 + 1.0) / (d + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (d - i as f64) / (d + 1.0);
    }
}

fn unwind_path(path: &mut [PathElement], depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let d = depth as f64;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (d - i as f64) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero_fraction * (d - i as f64));
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(path: &[PathElement], depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;
    let d = depth as f64;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * ((d - i as f64) / (d + 1.0));
        } else if zero_fraction != 0.0 {
            total += (path[i].pweight / zero_fraction) / ((d - i as f64) / (d + 1.0));
        }
    }

    total
}
