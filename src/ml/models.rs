use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Where a tree ensemble came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelType {
    /// Trained by the built-in gradient boosting trainer
    GradientBoostedTrees,
    /// Converted from an XGBoost JSON model dump
    XgboostImport,
}

/// Model metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,

    /// Model version
    pub version: String,

    /// Model type
    pub model_type: ModelType,

    /// Training timestamp
    pub trained_at: chrono::DateTime<chrono::Utc>,

    /// Number of training rows
    pub n_training_samples: usize,

    /// Number of input features
    pub n_features: usize,

    /// Cross-validation metrics, when the model came out of a CV run
    #[serde(default)]
    pub validation_metrics: Option<ModelMetrics>,

    /// Hyperparameters used
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, f64>,
}

impl ModelMetadata {
    pub fn new(name: &str, model_type: ModelType, n_features: usize) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            model_type,
            trained_at: chrono::Utc::now(),
            n_training_samples: 0,
            n_features,
            validation_metrics: None,
            hyperparameters: BTreeMap::new(),
        }
    }
}

/// Cross-validated model evaluation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelMetrics {
    /// Mean ROC AUC across validation folds
    pub auc_mean: f64,

    /// Standard deviation of the fold AUCs
    pub auc_std: f64,

    /// ROC AUC of each fold
    pub fold_auc: Vec<f64>,

    /// Best boosting round per fold (early stopping)
    pub fold_best_iteration: Vec<usize>,

    /// Mean validation log-loss at the best iteration
    pub logloss_mean: f64,
}

impl ModelMetrics {
    /// Aggregate per-fold results into mean/std summaries
    pub fn from_folds(fold_auc: Vec<f64>, fold_best_iteration: Vec<usize>, fold_logloss: &[f64]) -> Self {
        let (auc_mean, auc_std) = mean_std(&fold_auc);
        let (logloss_mean, _) = mean_std(fold_logloss);
        Self {
            auc_mean,
            auc_std,
            fold_auc,
            fold_best_iteration,
            logloss_mean,
        }
    }

    /// Rounded mean of the best iterations, at least one round
    pub fn mean_best_iteration(&self) -> usize {
        if self.fold_best_iteration.is_empty() {
            return 1;
        }
        let total: usize = self.fold_best_iteration.iter().sum();
        let mean = total as f64 / self.fold_best_iteration.len() as f64;
        (mean.round() as usize).max(1)
    }
}

/// Population mean and standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Training dataset
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Binary labels (0.0 / 1.0)
    pub labels: Array1<f64>,

    /// Column names matching `features`
    pub feature_names: Vec<String>,
}

impl TrainingDataset {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Rows selected by index, in the given order
    pub fn subset(&self, rows: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(ndarray::Axis(0), rows),
            labels: self.labels.select(ndarray::Axis(0), rows),
            feature_names: self.feature_names.clone(),
        }
    }

    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.sum() / self.labels.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metrics_from_folds() {
        let metrics = ModelMetrics::from_folds(vec![0.8, 0.9], vec![10, 13], &[0.4, 0.2]);
        assert!((metrics.auc_mean - 0.85).abs() < 1e-12);
        assert!((metrics.auc_std - 0.05).abs() < 1e-12);
        assert!((metrics.logloss_mean - 0.3).abs() < 1e-12);
        assert_eq!(metrics.mean_best_iteration(), 12);
        assert_eq!(ModelMetrics::default().mean_best_iteration(), 1);
    }

    #[test]
    fn test_dataset_subset() {
        let dataset = TrainingDataset {
            features: array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            labels: array![0.0, 1.0, 1.0],
            feature_names: vec!["a".to_string(), "b".to_string()],
        };
        let subset = dataset.subset(&[2, 0]);

        assert_eq!(subset.features, array![[5.0, 6.0], [1.0, 2.0]]);
        assert_eq!(subset.labels, array![1.0, 0.0]);
        assert!((dataset.positive_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_model_type_names() {
        assert_eq!(ModelType::XgboostImport.to_string(), "xgboost_import");
        assert_eq!(
            serde_json::to_string(&ModelType::GradientBoostedTrees).unwrap(),
            "\"gradient_boosted_trees\""
        );
    }
}
