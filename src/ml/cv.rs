//! Stratified cross-validation and ranking/probability metrics.

use crate::error::{AppError, Result};
use crate::ml::models::{ModelMetrics, TrainingDataset};
use crate::ml::trainer::{GbdtParams, GbdtTrainer};
use crate::ml::tree::{Classifier, TreeEnsemble};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;
use tracing::{debug, info};

/// One cross-validation split: (training rows, validation rows)
pub type Fold = (Vec<usize>, Vec<usize>);

/// Shuffled stratified K-fold split. Each class is shuffled with the seed
/// and dealt round-robin across folds so every fold keeps the class ratio.
pub fn stratified_k_fold(labels: &Array1<f64>, k: usize, seed: u64) -> Result<Vec<Fold>> {
    let n = labels.len();
    if k < 2 {
        return Err(AppError::Validation(
            "cross-validation needs at least 2 folds".to_string(),
        ));
    }
    if n < k {
        return Err(AppError::Validation(format!(
            "cannot split {} rows into {} folds",
            n, k
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut negatives: Vec<usize> = (0..n).filter(|&i| labels[i] != 1.0).collect();
    let mut positives: Vec<usize> = (0..n).filter(|&i| labels[i] == 1.0).collect();
    negatives.shuffle(&mut rng);
    positives.shuffle(&mut rng);

    let mut assignment = vec![0usize; n];
    for (pos, &row) in negatives.iter().chain(positives.iter()).enumerate() {
        assignment[row] = pos % k;
    }

    Ok((0..k)
        .map(|fold| {
            let (valid, train): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|&row| assignment[row] == fold);
            (train, valid)
        })
        .collect())
}

/// Area under the ROC curve via the rank-sum statistic (ties averaged)
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(AppError::Validation(
            "labels and scores differ in length".to_string(),
        ));
    }
    let n_pos = labels.iter().filter(|&&y| y == 1.0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(AppError::Validation(
            "ROC AUC needs both classes present".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = average_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(ranks.iter())
        .filter(|(y, _)| **y == 1.0)
        .map(|(_, r)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Mean binary cross-entropy
pub fn log_loss(labels: &[f64], probabilities: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let eps = 1e-15;
    let total: f64 = labels
        .iter()
        .zip(probabilities.iter())
        .map(|(y, p)| {
            let p = p.clamp(eps, 1.0 - eps);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f64
}

/// Output of a cross-validation run
#[derive(Debug, Clone)]
pub struct CvReport {
    pub metrics: ModelMetrics,
    /// Out-of-fold probability for every training row
    pub oof: Array1<f64>,
    /// Model trained on each fold, in fold order
    pub fold_models: Vec<TreeEnsemble>,
}

impl CvReport {
    /// Mean probability of the fold models, used for hold-out scoring
    pub fn predict_mean(&self, features: &ndarray::Array2<f64>) -> Result<Array1<f64>> {
        let mut total = Array1::<f64>::zeros(features.nrows());
        for model in &self.fold_models {
            total += &model.predict_proba(features)?;
        }
        Ok(total / self.fold_models.len().max(1) as f64)
    }
}

/// Stratified K-fold CV with early stopping on each validation fold
pub fn cross_validate(params: &GbdtParams, dataset: &TrainingDataset, k: usize) -> Result<CvReport> {
    let folds = stratified_k_fold(&dataset.labels, k, params.seed)?;
    let trainer = GbdtTrainer::new(params.clone());

    let mut oof = Array1::<f64>::zeros(dataset.n_samples());
    let mut fold_auc = Vec::with_capacity(k);
    let mut fold_best = Vec::with_capacity(k);
    let mut fold_logloss = Vec::with_capacity(k);
    let mut fold_models = Vec::with_capacity(k);

    for (fold, (train_rows, valid_rows)) in folds.iter().enumerate() {
        let train = dataset.subset(train_rows);
        let valid = dataset.subset(valid_rows);

        let outcome = trainer.fit(&train, Some(&valid))?;
        let proba = outcome.model.predict_proba(&valid.features)?;
        for (&row, &p) in valid_rows.iter().zip(proba.iter()) {
            oof[row] = p;
        }

        let labels = valid.labels.to_vec();
        let probabilities = proba.to_vec();
        let auc = roc_auc(&labels, &probabilities)?;
        let loss = log_loss(&labels, &probabilities);
        debug!(
            fold = fold + 1,
            auc,
            logloss = loss,
            best_iteration = outcome.best_iteration,
            "Fold finished"
        );

        fold_auc.push(auc);
        fold_best.push(outcome.best_iteration);
        fold_logloss.push(loss);
        fold_models.push(outcome.model);
    }

    let metrics = ModelMetrics::from_folds(fold_auc, fold_best, &fold_logloss);
    info!(
        folds = k,
        auc_mean = metrics.auc_mean,
        auc_std = metrics.auc_std,
        "Cross-validation finished"
    );

    Ok(CvReport {
        metrics,
        oof,
        fold_models,
    })
}
