//! Gradient boosted decision tree trainer with logistic loss.
//!
//! Each round fits a [`CartBuilder`] tree to the gradient/hessian of the
//! log-loss at the current margins. Row subsampling and per-tree column
//! sampling draw from a seeded `StdRng`, so a fixed seed reproduces the
//! model exactly.

use crate::error::{AppError, Result};
use crate::ml::cart::{BinnedMatrix, CartBuilder, TreeConfig};
use crate::ml::cv::log_loss;
use crate::ml::models::{ModelMetadata, ModelType, TrainingDataset};
use crate::ml::tree::{logit, sigmoid, RegressionTree, TreeEnsemble};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// GBDT hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
    pub max_bins: usize,
    /// Stop after this many rounds without validation improvement
    pub early_stopping_rounds: Option<usize>,
    pub seed: u64,
}

impl Default for GbdtParams {
    /// Tuned parameters of the production churn model
    fn default() -> Self {
        Self {
            n_estimators: 2692,
            learning_rate: 0.05786197845936901,
            max_depth: 3,
            reg_lambda: 1.0628185137032307e-08,
            reg_alpha: 3.255737505871401,
            subsample: 0.8409191153520594,
            colsample_bytree: 0.7834673458794292,
            min_child_weight: 1.0,
            max_bins: 256,
            early_stopping_rounds: Some(50),
            seed: 42,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AppError::Validation(msg.to_string()));
        if self.n_estimators == 0 {
            return fail("n_estimators must be positive");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return fail("learning_rate must be in (0, 1]");
        }
        if self.max_depth == 0 {
            return fail("max_depth must be positive");
        }
        if self.reg_lambda < 0.0 || self.reg_alpha < 0.0 {
            return fail("regularization terms must be non-negative");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return fail("colsample_bytree must be in (0, 1]");
        }
        if self.min_child_weight < 0.0 {
            return fail("min_child_weight must be non-negative");
        }
        if self.max_bins < 2 {
            return fail("max_bins must be at least 2");
        }
        Ok(())
    }

    /// Flat name/value view stored in model metadata and the manifest
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("n_estimators".to_string(), self.n_estimators as f64);
        map.insert("learning_rate".to_string(), self.learning_rate);
        map.insert("max_depth".to_string(), self.max_depth as f64);
        map.insert("reg_lambda".to_string(), self.reg_lambda);
        map.insert("reg_alpha".to_string(), self.reg_alpha);
        map.insert("subsample".to_string(), self.subsample);
        map.insert("colsample_bytree".to_string(), self.colsample_bytree);
        map.insert("min_child_weight".to_string(), self.min_child_weight);
        map.insert("max_bins".to_string(), self.max_bins as f64);
        map.insert("seed".to_string(), self.seed as f64);
        map
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_child_weight: self.min_child_weight,
            reg_lambda: self.reg_lambda,
            reg_alpha: self.reg_alpha,
            min_split_gain: 0.0,
            learning_rate: self.learning_rate,
        }
    }
}

/// Result of a single boosting run
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: TreeEnsemble,
    /// Number of trees kept (the best round when early stopping applied)
    pub best_iteration: usize,
    /// Validation log-loss at `best_iteration`
    pub best_score: Option<f64>,
}

/// GBDT trainer
pub struct GbdtTrainer {
    params: GbdtParams,
}

impl GbdtTrainer {
    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }

    /// Train on `train`, optionally early-stopping on `valid`
    pub fn fit(&self, train: &TrainingDataset, valid: Option<&TrainingDataset>) -> Result<TrainOutcome> {
        self.params.validate()?;
        let n_rows = train.n_samples();
        let n_features = train.n_features();
        if n_rows == 0 || n_features == 0 {
            return Err(AppError::Validation(
                "training set must have at least one row and one feature".to_string(),
            ));
        }
        if let Some(valid) = valid {
            if valid.n_features() != n_features {
                return Err(AppError::Validation(format!(
                    "validation set has {} features, training set has {}",
                    valid.n_features(),
                    n_features
                )));
            }
        }

        let base_margin = logit(train.positive_rate());
        let binned = BinnedMatrix::from_features(&train.features, self.params.max_bins);
        let tree_config = self.params.tree_config();
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let mut margins = vec![base_margin; n_rows];
        let mut valid_margins = valid.map(|v| vec![base_margin; v.n_samples()]);
        let valid_labels: Vec<f64> = valid.map(|v| v.labels.to_vec()).unwrap_or_default();
        let mut gradients = vec![0.0; n_rows];
        let mut hessians = vec![0.0; n_rows];

        let mut trees: Vec<RegressionTree> = Vec::with_capacity(self.params.n_estimators);
        let mut best_score: Option<f64> = None;
        let mut best_iteration = 0;

        for round in 0..self.params.n_estimators {
            gradients
                .par_iter_mut()
                .zip(hessians.par_iter_mut())
                .enumerate()
                .for_each(|(i, (g, h))| {
                    let p = sigmoid(margins[i]);
                    *g = p - train.labels[i];
                    *h = (p * (1.0 - p)).max(1e-16);
                });

            let rows = self.sample_rows(&mut rng, n_rows);
            let features = self.sample_features(&mut rng, n_features);
            let tree = CartBuilder::new(&binned, &gradients, &hessians, &tree_config, features)
                .build(&rows);

            margins.par_iter_mut().enumerate().for_each(|(i, m)| {
                *m += tree.predict(train.features.row(i));
            });

            if let (Some(valid), Some(vm)) = (valid, valid_margins.as_mut()) {
                vm.par_iter_mut().enumerate().for_each(|(i, m)| {
                    *m += tree.predict(valid.features.row(i));
                });
                let probabilities: Vec<f64> = vm.iter().map(|m| sigmoid(*m)).collect();
                let score = log_loss(&valid_labels, &probabilities);

                trees.push(tree);
                if best_score.map_or(true, |best| score < best) {
                    best_score = Some(score);
                    best_iteration = round + 1;
                } else if let Some(patience) = self.params.early_stopping_rounds {
                    if round + 1 - best_iteration >= patience {
                        tracing::debug!(
                            round = round + 1,
                            best_iteration,
                            "Early stopping"
                        );
                        break;
                    }
                }
            } else {
                trees.push(tree);
                best_iteration = round + 1;
            }
        }

        trees.truncate(best_iteration.max(1));

        let mut metadata = ModelMetadata::new("churn-gbdt", ModelType::GradientBoostedTrees, n_features);
        metadata.n_training_samples = n_rows;
        metadata.hyperparameters = self.params.as_map();

        let model = TreeEnsemble::new(base_margin, n_features, trees).with_metadata(metadata);

        Ok(TrainOutcome {
            best_iteration: model.trees.len(),
            model,
            best_score,
        })
    }

    /// Bernoulli row sampling; falls back to every row if none were drawn
    fn sample_rows(&self, rng: &mut StdRng, n_rows: usize) -> Vec<usize> {
        if self.params.subsample >= 1.0 {
            return (0..n_rows).collect();
        }
        let rows: Vec<usize> = (0..n_rows)
            .filter(|_| rng.gen::<f64>() < self.params.subsample)
            .collect();
        if rows.is_empty() {
            (0..n_rows).collect()
        } else {
            rows
        }
    }

    fn sample_features(&self, rng: &mut StdRng, n_features: usize) -> Vec<usize> {
        let mut features: Vec<usize> = (0..n_features).collect();
        if self.params.colsample_bytree >= 1.0 {
            return features;
        }
        let keep = ((n_features as f64 * self.params.colsample_bytree).round() as usize).clamp(1, n_features);
        features.shuffle(rng);
        features.truncate(keep);
        features.sort_unstable();
        features
    }
}
