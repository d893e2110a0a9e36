//! Shared fixtures: a synthetic churn dataset and a trained bundle on disk.

#![allow(dead_code)]

use churn_bank_service::{
    charts,
    config::Config,
    features::PipelineVersion,
    ingest::BatchReader,
    ml::{workflow, ArtifactBundle, GbdtParams, TrainingOptions},
};
use std::collections::HashMap;
use tempfile::TempDir;

pub const BATCH_HEADER: &str =
    "id,CustomerId,Surname,CreditScore,Geography,Gender,Age,Tenure,Balance,NumOfProducts,HasCrCard,IsActiveMember,EstimatedSalary";

/// Deterministic labelled CSV. Older inactive customers and German
/// single-product customers churn.
pub fn training_csv(n: usize) -> String {
    let countries = ["France", "Spain", "Germany"];
    let mut csv = format!("{},Exited\n", BATCH_HEADER);
    for i in 0..n {
        let geography = countries[i % 3];
        let gender = if i % 5 == 0 { "Female" } else { "Male" };
        let age = 18 + (i * 7) % 60;
        let products = 1 + i % 3;
        let active = (i / 2) % 2;
        let balance = if i % 4 == 0 { 0 } else { 20_000 + (i * 997) % 150_000 };
        let exited = (age > 45 && active == 0) || (geography == "Germany" && products == 1);
        csv.push_str(&format!(
            "{},{},S{},{},{},{},{},{},{}.0,{},{},{},{}.5,{}\n",
            i,
            15_600_000 + i,
            i,
            500 + (i * 13) % 350,
            geography,
            gender,
            age,
            i % 10,
            balance,
            products,
            (i + 1) % 2,
            active,
            40_000 + (i * 331) % 150_000,
            u8::from(exited),
        ));
    }
    csv
}

pub fn fast_params() -> GbdtParams {
    GbdtParams {
        n_estimators: 40,
        learning_rate: 0.3,
        max_depth: 3,
        reg_lambda: 1.0,
        reg_alpha: 0.0,
        subsample: 0.9,
        colsample_bytree: 1.0,
        early_stopping_rounds: Some(10),
        ..Default::default()
    }
}

pub fn train_bundle(n: usize) -> ArtifactBundle {
    let batch = BatchReader::labelled("Exited")
        .read(training_csv(n).as_bytes())
        .unwrap();
    let options = TrainingOptions {
        params: fast_params(),
        folds: 3,
        tune_trials: 0,
        pipeline: PipelineVersion::V2,
    };
    workflow::train_bundle(batch, &options).unwrap().bundle
}

/// Trained bundle plus global chart in a temporary artifact directory
pub fn artifact_dir() -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let bundle = train_bundle(300);
    bundle.save(dir.path()).unwrap();

    let batch = BatchReader::labelled("Exited")
        .read(training_csv(300).as_bytes())
        .unwrap();
    let importance = workflow::global_importance(&bundle, &batch.records, 100, 42).unwrap();
    charts::write_global_chart(&importance, &dir.path().join("shap_summary.svg")).unwrap();

    let mut config = Config::default();
    config.model.artifact_dir = dir.path().to_path_buf();
    (dir, config)
}

/// Prometheus exposition lines grouped by metric family
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}
