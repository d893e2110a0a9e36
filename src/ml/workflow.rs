//! Offline jobs: train and persist a bundle, score a hold-out file, and
//! compute global SHAP importance for a persisted bundle.

use crate::error::{AppError, Result};
use crate::features::{align, FeatureSchema, PipelineVersion};
use crate::ingest::DecodedBatch;
use crate::ml::artifact::ArtifactBundle;
use crate::ml::cv::{cross_validate, CvReport};
use crate::ml::explainer::GlobalImportance;
use crate::ml::models::TrainingDataset;
use crate::ml::shap::TreeExplainer;
use crate::ml::trainer::{GbdtParams, GbdtTrainer};
use crate::ml::tuning::{RandomSearch, TuningReport};
use crate::models::RawRecord;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub params: GbdtParams,
    pub folds: usize,
    /// Random-search trials before the final fit; 0 disables tuning
    pub tune_trials: usize,
    pub pipeline: PipelineVersion,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            params: GbdtParams::default(),
            folds: 5,
            tune_trials: 0,
            pipeline: PipelineVersion::default(),
        }
    }
}

pub struct TrainingRun {
    pub bundle: ArtifactBundle,
    pub cv: CvReport,
    pub tuning: Option<TuningReport>,
    /// Parameters of the final refit
    pub params: GbdtParams,
}

/// Run the feature pipeline over labelled records and freeze the schema
pub fn build_dataset(
    records: &[RawRecord],
    labels: Vec<f64>,
    pipeline: PipelineVersion,
) -> Result<(TrainingDataset, FeatureSchema)> {
    if records.len() != labels.len() {
        return Err(AppError::Validation(format!(
            "{} records but {} labels",
            records.len(),
            labels.len()
        )));
    }
    if let Some(bad) = labels.iter().find(|&&y| y != 0.0 && y != 1.0) {
        return Err(AppError::Validation(format!("labels must be 0 or 1, found {}", bad)));
    }

    let frame = pipeline.run(records);
    let schema = FeatureSchema::derive(&frame)?;
    let matrix = align(&frame, &schema)?;

    let dataset = TrainingDataset {
        features: matrix.into_values(),
        labels: Array1::from(labels),
        feature_names: schema.columns().to_vec(),
    };
    Ok((dataset, schema))
}

/// Cross-validate (optionally after tuning), then refit on every row with
/// the mean best iteration of the folds
pub fn train_bundle(batch: DecodedBatch, options: &TrainingOptions) -> Result<TrainingRun> {
    let labels = batch
        .labels
        .ok_or_else(|| AppError::Validation("training data has no label column".to_string()))?;
    let (dataset, schema) = build_dataset(&batch.records, labels, options.pipeline)?;
    info!(
        rows = dataset.n_samples(),
        features = dataset.n_features(),
        positive_rate = dataset.positive_rate(),
        pipeline = %options.pipeline,
        "Training dataset prepared"
    );

    let tuning = if options.tune_trials > 0 {
        let report = RandomSearch::new(options.tune_trials, options.folds, options.params.seed)
            .run(&options.params, &dataset)?;
        Some(report)
    } else {
        None
    };
    let params = tuning
        .as_ref()
        .map(|t| t.best.params.clone())
        .unwrap_or_else(|| options.params.clone());

    let cv = cross_validate(&params, &dataset, options.folds)?;

    let final_params = GbdtParams {
        n_estimators: cv.metrics.mean_best_iteration(),
        early_stopping_rounds: None,
        ..params
    };
    let outcome = GbdtTrainer::new(final_params.clone()).fit(&dataset, None)?;
    let mut model = outcome.model;
    model.metadata.validation_metrics = Some(cv.metrics.clone());

    let bundle = ArtifactBundle::new(model, schema, options.pipeline)?;
    info!(
        n_trees = bundle.manifest.n_trees,
        auc_mean = cv.metrics.auc_mean,
        auc_std = cv.metrics.auc_std,
        fingerprint = %bundle.fingerprint(),
        "🎯 Final model trained"
    );

    Ok(TrainingRun {
        bundle,
        cv,
        tuning,
        params: final_params,
    })
}

/// Mean fold-model probability for hold-out records, aligned to `schema`
pub fn score_holdout(
    cv: &CvReport,
    schema: &FeatureSchema,
    pipeline: PipelineVersion,
    records: &[RawRecord],
) -> Result<Vec<f64>> {
    let frame = pipeline.run(records);
    let matrix = align(&frame, schema)?;
    Ok(cv.predict_mean(matrix.values())?.to_vec())
}

/// Write an `id,Exited` submission file
pub fn write_submission(path: &Path, ids: &[i64], probabilities: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["id", "Exited"])?;
    for (id, p) in ids.iter().zip(probabilities) {
        writer.write_record([id.to_string(), p.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Mean |SHAP| per feature over a seeded sample of `records`
pub fn global_importance(
    bundle: &ArtifactBundle,
    records: &[RawRecord],
    sample_size: usize,
    seed: u64,
) -> Result<GlobalImportance> {
    if records.is_empty() {
        return Err(AppError::Validation(
            "no records to compute global importance from".to_string(),
        ));
    }

    let mut rows: Vec<usize> = if records.len() > sample_size {
        let mut rng = StdRng::seed_from_u64(seed);
        rand::seq::index::sample(&mut rng, records.len(), sample_size).into_vec()
    } else {
        (0..records.len()).collect()
    };
    rows.sort_unstable();
    let sample: Vec<RawRecord> = rows.iter().map(|&i| records[i].clone()).collect();

    let frame = bundle.pipeline.run(&sample);
    let matrix = align(&frame, &bundle.schema)?;
    let explainer = TreeExplainer::new(Arc::new(bundle.model.clone()))?;
    GlobalImportance::compute(&explainer, bundle.schema.columns(), matrix.values())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::trainer::tests::fast_params;
    use crate::models::{Gender, Geography};

    fn labelled_batch(n: i64) -> DecodedBatch {
        let records: Vec<RawRecord> = (0..n)
            .map(|i| RawRecord {
                id: i,
                age: 18.0 + (i * 7 % 60) as f64,
                balance: if i % 4 == 0 { 0.0 } else { 20_000.0 + (i * 997 % 150_000) as f64 },
                num_of_products: (1 + i % 3) as f64,
                is_active_member: ((i / 2) % 2) as f64,
                geography: Geography::from_code(i % 3).unwrap_or(Geography::France),
                gender: if i % 5 == 0 { Gender::Female } else { Gender::Male },
                ..Default::default()
            })
            .collect();
        let labels = records
            .iter()
            .map(|r| {
                let risky = r.age > 45.0 && r.is_active_member == 0.0;
                let german = r.geography == Geography::Germany && r.num_of_products == 1.0;
                if risky || german { 1.0 } else { 0.0 }
            })
            .collect();
        DecodedBatch {
            records,
            labels: Some(labels),
        }
    }

    fn options() -> TrainingOptions {
        TrainingOptions {
            params: fast_params(),
            folds: 3,
            tune_trials: 0,
            pipeline: PipelineVersion::V2,
        }
    }

    #[test]
    fn test_train_bundle() {
        let run = train_bundle(labelled_batch(240), &options()).unwrap();

        assert_eq!(run.cv.metrics.fold_auc.len(), 3);
        assert!(run.cv.metrics.auc_mean > 0.7);
        assert_eq!(run.bundle.manifest.n_trees, run.params.n_estimators);
        assert_eq!(run.params.n_estimators, run.cv.metrics.mean_best_iteration());
        assert!(run.bundle.schema.position("is_mature_inactive_transit").is_some());
        assert!(run.bundle.manifest.cv_metrics.is_some());
    }

    #[test]
    fn test_training_is_deterministic() {
        let a = train_bundle(labelled_batch(150), &options()).unwrap();
        let b = train_bundle(labelled_batch(150), &options()).unwrap();
        assert_eq!(a.bundle.model.trees, b.bundle.model.trees);
        assert_eq!(a.bundle.manifest.model_sha256.len(), 64);
    }

    #[test]
    fn test_rejects_bad_labels() {
        let mut batch = labelled_batch(10);
        batch.labels = Some(vec![2.0; 10]);
        assert!(train_bundle(batch, &options()).is_err());

        let batch = DecodedBatch {
            labels: None,
            ..labelled_batch(10)
        };
        assert!(train_bundle(batch, &options()).is_err());
    }

    #[test]
    fn test_holdout_submission_and_global_importance() {
        let run = train_bundle(labelled_batch(150), &options()).unwrap();
        let holdout = labelled_batch(20).records;

        let probabilities =
            score_holdout(&run.cv, &run.bundle.schema, run.bundle.pipeline, &holdout).unwrap();
        assert_eq!(probabilities.len(), 20);
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        let ids: Vec<i64> = holdout.iter().map(|r| r.id).collect();
        write_submission(&path, &ids, &probabilities).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,Exited\n0,"));
        assert_eq!(text.lines().count(), 21);

        let importance = global_importance(&run.bundle, &holdout, 10, 42).unwrap();
        assert_eq!(importance.n_samples, 10);
        assert_eq!(importance.features.len(), run.bundle.schema.len());
        assert!(importance
            .features
            .windows(2)
            .all(|w| w[0].value >= w[1].value));
    }
}
