//! Histogram-based regression tree builder for second-order boosting.
//!
//! Features are quantized once into bins whose upper edges are candidate
//! thresholds. A split at bin `k` sends `x < cuts[k]` left, matching the
//! routing used at inference time.

use crate::ml::tree::{RegressionTree, TreeNode};
use ndarray::Array2;
use rayon::prelude::*;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    /// Minimum loss reduction required to keep a split
    pub min_split_gain: f64,
    /// Shrinkage applied to leaf values
    pub learning_rate: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            min_split_gain: 0.0,
            learning_rate: 0.3,
        }
    }
}

/// Feature matrix quantized into per-feature bins
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    /// Candidate thresholds per feature, strictly increasing
    cuts: Vec<Vec<f64>>,
    /// Bin index per (row, feature); bin `b` holds `cuts[b-1] <= x < cuts[b]`
    bins: Array2<u16>,
}

impl BinnedMatrix {
    pub fn from_features(features: &Array2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let cuts: Vec<Vec<f64>> = (0..features.ncols())
            .into_par_iter()
            .map(|j| {
                let mut values: Vec<f64> = features
                    .column(j)
                    .iter()
                    .copied()
                    .filter(|v| v.is_finite())
                    .collect();
                values.sort_by(f64::total_cmp);
                quantile_cuts(&values, max_bins)
            })
            .collect();

        let mut bins = Array2::<u16>::zeros(features.dim());
        for ((i, j), bin) in bins.indexed_iter_mut() {
            *bin = bin_of(&cuts[j], features[[i, j]]);
        }

        Self { cuts, bins }
    }

    pub fn n_rows(&self) -> usize {
        self.bins.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.cuts.len()
    }

    pub fn cuts(&self, feature: usize) -> &[f64] {
        &self.cuts[feature]
    }
}

/// Upper bin edges: distinct sorted values (minus the smallest), thinned to
/// evenly spaced quantiles when there are too many.
fn quantile_cuts(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct: Vec<f64> = Vec::new();
    for &v in sorted {
        if distinct.last() != Some(&v) {
            distinct.push(v);
        }
    }
    if distinct.len() <= 1 {
        return Vec::new();
    }

    if distinct.len() <= max_bins {
        return distinct[1..].to_vec();
    }

    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|q| sorted[(q * n / max_bins).min(n - 1)])
        .collect();
    cuts.dedup();
    if cuts.first() == Some(&sorted[0]) {
        cuts.remove(0);
    }
    cuts
}

/// Missing values land in bin 0 so they follow the default-left direction
fn bin_of(cuts: &[f64], value: f64) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    cuts.partition_point(|c| *c <= value) as u16
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Builds one regression tree from gradients and hessians
pub struct CartBuilder<'a> {
    binned: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    config: &'a TreeConfig,
    features: Vec<usize>,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        binned: &'a BinnedMatrix,
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: &'a TreeConfig,
        features: Vec<usize>,
    ) -> Self {
        debug_assert_eq!(binned.n_rows(), gradients.len());
        debug_assert_eq!(binned.n_rows(), hessians.len());
        Self {
            binned,
            gradients,
            hessians,
            config,
            features,
        }
    }

    /// Build a tree over the given rows
    pub fn build(&self, rows: &[usize]) -> RegressionTree {
        let mut nodes = Vec::new();
        self.build_node(rows, 0, &mut nodes);
        RegressionTree::new(nodes)
    }

    fn build_node(&self, rows: &[usize], depth: usize, nodes: &mut Vec<TreeNode>) -> usize {
        let current = nodes.len();
        let (g, h) = self.sums(rows);

        let split = if depth < self.config.max_depth {
            self.find_best_split(rows, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            nodes.push(TreeNode::leaf(self.leaf_value(g, h), h));
            return current;
        };

        let threshold = self.binned.cuts(split.feature)[split.bin];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| (self.binned.bins[[r, split.feature]] as usize) <= split.bin);

        // Placeholder, children are patched in once built
        nodes.push(TreeNode::split(split.feature, threshold, 0, 0, h));
        let left = self.build_node(&left_rows, depth + 1, nodes);
        let right = self.build_node(&right_rows, depth + 1, nodes);
        nodes[current] = TreeNode::split(split.feature, threshold, left, right, h);

        current
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.gradients[r], h + self.hessians[r])
        })
    }

    fn find_best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent_score = self.score(g, h);

        let candidates: Vec<Option<SplitCandidate>> = self
            .features
            .par_iter()
            .map(|&feature| self.best_split_for_feature(rows, feature, g, h, parent_score))
            .collect();

        // Sequential reduction keeps ties on the lowest feature/bin
        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, c| match best {
                Some(b) if b.gain >= c.gain => Some(b),
                _ => Some(c),
            })
    }

    fn best_split_for_feature(
        &self,
        rows: &[usize],
        feature: usize,
        g: f64,
        h: f64,
        parent_score: f64,
    ) -> Option<SplitCandidate> {
        let n_cuts = self.binned.cuts(feature).len();
        if n_cuts == 0 {
            return None;
        }

        let mut hist_g = vec![0.0; n_cuts + 1];
        let mut hist_h = vec![0.0; n_cuts + 1];
        for &r in rows {
            let b = self.binned.bins[[r, feature]] as usize;
            hist_g[b] += self.gradients[r];
            hist_h[b] += self.hessians[r];
        }

        let mut best: Option<SplitCandidate> = None;
        let (mut gl, mut hl) = (0.0, 0.0);
        for bin in 0..n_cuts {
            gl += hist_g[bin];
            hl += hist_h[bin];
            let (gr, hr) = (g - gl, h - hl);
            if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                continue;
            }

            let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent_score)
                - self.config.min_split_gain;
            if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate { feature, bin, gain });
            }
        }
        best
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let t = soft_threshold(g, self.config.reg_alpha);
        t * t / (h + self.config.reg_lambda)
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.config.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -soft_threshold(g, self.config.reg_alpha) / denom * self.config.learning_rate
    }
}

/// L1 shrinkage of a gradient sum
fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_quantile_cuts_small_domain() {
        assert_eq!(quantile_cuts(&[1.0, 1.0, 2.0, 3.0], 256), vec![2.0, 3.0]);
        assert!(quantile_cuts(&[4.0, 4.0], 256).is_empty());
        assert!(quantile_cuts(&[], 256).is_empty());
    }

    #[test]
    fn test_quantile_cuts_are_bounded() {
        let values: Vec<f64> = (0..1000).map(|v| v as f64).collect();
        let cuts = quantile_cuts(&values, 16);
        assert!(cuts.len() <= 15);
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));
        assert!(cuts[0] > 0.0);
    }

    #[test]
    fn test_binning_matches_threshold_routing() {
        let features = array![[1.0], [2.0], [3.0], [f64::NAN]];
        let binned = BinnedMatrix::from_features(&features, 256);
        assert_eq!(binned.cuts(0), &[2.0, 3.0]);
        let bins: Vec<u16> = binned.bins.column(0).to_vec();
        assert_eq!(bins, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_builds_separating_split() {
        let features = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let binned = BinnedMatrix::from_features(&features, 256);
        let gradients = [-1.0, -1.0, 1.0, 1.0];
        let hessians = [0.25; 4];
        let config = TreeConfig {
            max_depth: 1,
            min_child_weight: 0.0,
            reg_lambda: 0.0,
            learning_rate: 1.0,
            ..Default::default()
        };

        let tree = CartBuilder::new(&binned, &gradients, &hessians, &config, vec![0, 1])
            .build(&[0, 1, 2, 3]);

        match &tree.nodes[0] {
            TreeNode::Split {
                feature,
                threshold,
                cover,
                ..
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 2.0);
                assert_eq!(*cover, 1.0);
            }
            other => panic!("expected split, got {:?}", other),
        }
        assert_eq!(tree.predict(array![0.5, 5.0].view()), 4.0);
        assert_eq!(tree.predict(array![2.5, 5.0].view()), -4.0);
        assert!(tree.validate(2).is_ok());
    }

    #[test]
    fn test_min_child_weight_blocks_split() {
        let features = array![[0.0], [1.0]];
        let binned = BinnedMatrix::from_features(&features, 256);
        let config = TreeConfig {
            min_child_weight: 10.0,
            ..Default::default()
        };
        let tree = CartBuilder::new(&binned, &[-1.0, 1.0], &[0.25, 0.25], &config, vec![0])
            .build(&[0, 1]);
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.nodes[0].is_leaf());
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }
}
