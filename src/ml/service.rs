use crate::analytics::{RoiCalculator, RoiInput, RoiSummary};
use crate::charts::{self, EncodedChart};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::features::{align, AlignedMatrix, FeatureSchema, PipelineVersion};
use crate::ingest::BatchReader;
use crate::metrics::{
    BATCH_ROWS_SCORED_TOTAL, CHURN_PROBABILITY, ERRORS_TOTAL, PREDICTIONS_TOTAL,
    PREDICTION_DURATION_SECONDS,
};
use crate::ml::artifact::{ArtifactBundle, ArtifactManifest};
use crate::ml::explainer::{explain_local, explanation_prompt, FeatureAttribution};
use crate::ml::shap::TreeExplainer;
use crate::ml::tree::{Classifier, TreeEnsemble};
use crate::models::{RawRecord, ReadableRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of scoring one customer
#[derive(Debug, Clone, Serialize)]
pub struct SinglePrediction {
    pub request_id: Uuid,
    pub status: &'static str,
    /// Churn probability
    pub prediction: f64,
    pub predicted_class: u8,
    pub readable_features: ReadableRecord,
    /// Top-K attributions, largest magnitude first
    pub local_shap: Vec<FeatureAttribution>,
    pub explanation_prompt: String,
    /// Global chart first when available, then the local chart
    pub charts: Vec<EncodedChart>,
    pub model_fingerprint: String,
}

/// One scored batch row: the raw inputs plus the churn probability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    pub id: i64,
    #[serde(rename = "CreditScore")]
    pub credit_score: f64,
    #[serde(rename = "Geography")]
    pub geography: i64,
    #[serde(rename = "Gender")]
    pub gender: i64,
    #[serde(rename = "Age")]
    pub age: f64,
    #[serde(rename = "Tenure")]
    pub tenure: f64,
    #[serde(rename = "Balance")]
    pub balance: f64,
    #[serde(rename = "NumOfProducts")]
    pub num_of_products: i64,
    #[serde(rename = "HasCrCard")]
    pub has_cr_card: i64,
    #[serde(rename = "IsActiveMember")]
    pub is_active_member: i64,
    #[serde(rename = "EstimatedSalary")]
    pub estimated_salary: f64,
    pub probability: f64,
}

impl ScoredRow {
    fn new(record: &RawRecord, probability: f64) -> Self {
        Self {
            id: record.id,
            credit_score: round2(record.credit_score),
            geography: record.geography.code(),
            gender: record.gender.code(),
            age: round2(record.age),
            tenure: round2(record.tenure),
            balance: round2(record.balance),
            num_of_products: record.num_of_products as i64,
            has_cr_card: record.has_cr_card as i64,
            is_active_member: record.is_active_member as i64,
            estimated_salary: round2(record.estimated_salary),
            probability: round2(probability),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub request_id: Uuid,
    pub status: &'static str,
    pub message: String,
    pub data: Vec<ScoredRow>,
    pub roi: RoiSummary,
    pub model_fingerprint: String,
}

/// Description of the loaded bundle
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub fingerprint: String,
    pub pipeline: PipelineVersion,
    pub feature_columns: Vec<String>,
    pub explainer_available: bool,
    pub global_chart_available: bool,
    pub decision_threshold: f64,
    pub top_k: usize,
    pub manifest: ArtifactManifest,
}

/// Inference over one verified artifact bundle.
///
/// Everything is loaded once and read-only afterwards, so the service is
/// shared across requests behind an `Arc` without locking.
pub struct ChurnService {
    model: Arc<TreeEnsemble>,
    schema: FeatureSchema,
    pipeline: PipelineVersion,
    manifest: ArtifactManifest,
    explainer: Option<TreeExplainer>,
    global_chart: Option<EncodedChart>,
    roi: RoiCalculator,
    top_k: usize,
    decision_threshold: f64,
    max_batch_rows: usize,
}

impl ChurnService {
    /// Load the artifact bundle and precomputed global chart named by `config`
    pub fn load(config: &Config) -> Result<Self> {
        let dir = &config.model.artifact_dir;
        info!(dir = %dir.display(), "Loading churn model artifacts");
        let bundle = ArtifactBundle::load(dir)?;

        let chart_path = config.model.global_shap_path();
        let global_chart = if chart_path.exists() {
            match EncodedChart::from_file(&chart_path, "Global feature importance (SHAP)") {
                Ok(chart) => Some(chart),
                Err(e) => {
                    warn!(path = %chart_path.display(), error = %e, "Global SHAP chart unreadable");
                    None
                }
            }
        } else {
            warn!(path = %chart_path.display(), "Global SHAP chart not found, responses will omit it");
            None
        };

        Self::from_bundle(bundle, config, global_chart)
    }

    pub fn from_bundle(
        bundle: ArtifactBundle,
        config: &Config,
        global_chart: Option<EncodedChart>,
    ) -> Result<Self> {
        let ArtifactBundle {
            model,
            schema,
            pipeline,
            manifest,
        } = bundle;
        let model = Arc::new(model);

        let explainer = match TreeExplainer::new(Arc::clone(&model)) {
            Ok(explainer) => Some(explainer),
            Err(e) => {
                warn!(error = %e, "SHAP explainer unavailable, predictions will not be explained");
                None
            }
        };

        info!(
            fingerprint = %manifest.bundle_fingerprint,
            pipeline = %pipeline,
            n_features = schema.len(),
            n_trees = model.trees.len(),
            explainer = explainer.is_some(),
            "✅ Churn model ready"
        );

        Ok(Self {
            model,
            schema,
            pipeline,
            manifest,
            explainer,
            global_chart,
            roi: RoiCalculator::new(config.roi.clone()),
            top_k: config.model.top_k,
            decision_threshold: config.model.decision_threshold,
            max_batch_rows: config.model.max_batch_rows,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.manifest.bundle_fingerprint
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            fingerprint: self.fingerprint().to_string(),
            pipeline: self.pipeline,
            feature_columns: self.schema.columns().to_vec(),
            explainer_available: self.explainer.is_some(),
            global_chart_available: self.global_chart.is_some(),
            decision_threshold: self.decision_threshold,
            top_k: self.top_k,
            manifest: self.manifest.clone(),
        }
    }

    /// Feature pipeline followed by schema alignment
    pub fn prepare(&self, records: &[RawRecord]) -> Result<AlignedMatrix> {
        let frame = self.pipeline.run(records);
        align(&frame, &self.schema)
    }

    pub fn predict_single(&self, record: RawRecord) -> Result<SinglePrediction> {
        let _timer = PREDICTION_DURATION_SECONDS
            .with_label_values(&["single"])
            .start_timer();
        let result = self.score_single(record);
        record_outcome("single", &result);
        result
    }

    fn score_single(&self, record: RawRecord) -> Result<SinglePrediction> {
        let request_id = Uuid::new_v4();
        let matrix = self.prepare(std::slice::from_ref(&record))?;
        let probabilities = self.model.predict_proba(matrix.values())?;
        let probability = *probabilities
            .first()
            .ok_or_else(|| AppError::Internal("model returned no prediction".to_string()))?;
        CHURN_PROBABILITY.observe(probability);

        let explanation = explain_local(
            self.explainer.as_ref(),
            self.schema.columns(),
            matrix.row(0),
            self.top_k,
        );

        let mut charts = Vec::with_capacity(2);
        if let Some(global) = &self.global_chart {
            charts.push(global.clone());
        }
        match charts::local_chart(&explanation, probability) {
            Ok(Some(local)) => charts.push(local),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to render local SHAP chart");
                ERRORS_TOTAL.with_label_values(&["charts", "render"]).inc();
            }
        }

        debug!(
            %request_id,
            probability,
            n_attributions = explanation.attributions.len(),
            "Scored single record"
        );

        Ok(SinglePrediction {
            request_id,
            status: "success",
            prediction: probability,
            predicted_class: u8::from(probability >= self.decision_threshold),
            readable_features: record.readable(),
            explanation_prompt: explanation_prompt(probability, &explanation),
            local_shap: explanation.attributions,
            charts,
            model_fingerprint: self.fingerprint().to_string(),
        })
    }

    /// Validate and score a CSV upload. CPU-bound; call from a blocking
    /// context.
    pub fn predict_batch(&self, csv: &[u8]) -> Result<BatchPrediction> {
        let _timer = PREDICTION_DURATION_SECONDS
            .with_label_values(&["batch"])
            .start_timer();
        let result = self.score_batch(csv);
        record_outcome("batch", &result);
        result
    }

    fn score_batch(&self, csv: &[u8]) -> Result<BatchPrediction> {
        let request_id = Uuid::new_v4();
        let batch = BatchReader::scoring(self.max_batch_rows).read(csv)?;
        let records = batch.records;

        let matrix = self.prepare(&records)?;
        let probabilities = self.model.predict_proba(matrix.values())?;

        let roi_inputs: Vec<RoiInput> = records
            .iter()
            .zip(probabilities.iter())
            .map(|(r, &p)| RoiInput {
                id: r.id,
                balance: r.balance,
                num_of_products: r.num_of_products,
                has_cr_card: r.has_cr_card,
                is_active_member: r.is_active_member,
                churn_probability: p,
            })
            .collect();
        let roi = self.roi.summarize(&roi_inputs);

        let data: Vec<ScoredRow> = records
            .iter()
            .zip(probabilities.iter())
            .map(|(r, &p)| {
                CHURN_PROBABILITY.observe(p);
                ScoredRow::new(r, p)
            })
            .collect();
        BATCH_ROWS_SCORED_TOTAL.inc_by(data.len() as u64);

        info!(
            %request_id,
            rows = data.len(),
            actionable = roi.actionable_count,
            total_roi = roi.total_roi,
            "📊 Batch scored"
        );

        Ok(BatchPrediction {
            request_id,
            status: "success",
            message: format!("Scored {} rows.", data.len()),
            data,
            roi,
            model_fingerprint: self.fingerprint().to_string(),
        })
    }
}

fn record_outcome<T>(mode: &str, result: &Result<T>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    PREDICTIONS_TOTAL.with_label_values(&[mode, outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::trainer::{tests::fast_params, GbdtParams, GbdtTrainer};
    use crate::ml::models::TrainingDataset;
    use crate::models::{Gender, Geography};
    use ndarray::Array1;

    /// Small model trained on the real feature pipeline
    fn trained_service() -> ChurnService {
        let records: Vec<RawRecord> = (0..120)
            .map(|i| RawRecord {
                id: i,
                age: 20.0 + (i % 50) as f64,
                balance: if i % 3 == 0 { 0.0 } else { 50_000.0 + i as f64 * 100.0 },
                is_active_member: (i % 2) as f64,
                geography: Geography::from_code(i % 3).unwrap_or(Geography::France),
                gender: if i % 4 == 0 { Gender::Female } else { Gender::Male },
                ..Default::default()
            })
            .collect();
        let labels: Array1<f64> = records
            .iter()
            .map(|r| if r.age > 45.0 && r.is_active_member == 0.0 { 1.0 } else { 0.0 })
            .collect();

        let frame = PipelineVersion::V2.run(&records);
        let schema = FeatureSchema::derive(&frame).unwrap();
        let matrix = align(&frame, &schema).unwrap();
        let dataset = TrainingDataset {
            features: matrix.into_values(),
            labels,
            feature_names: schema.columns().to_vec(),
        };

        let params = GbdtParams {
            early_stopping_rounds: None,
            ..fast_params()
        };
        let outcome = GbdtTrainer::new(params).fit(&dataset, None).unwrap();
        let bundle = ArtifactBundle::new(outcome.model, schema, PipelineVersion::V2).unwrap();
        ChurnService::from_bundle(bundle, &Config::default(), None).unwrap()
    }

    #[test]
    fn test_single_prediction() {
        let service = trained_service();
        let prediction = service.predict_single(RawRecord::default()).unwrap();

        assert!(prediction.prediction > 0.0 && prediction.prediction < 1.0);
        assert_eq!(
            prediction.predicted_class,
            u8::from(prediction.prediction >= 0.5)
        );
        assert!(prediction.local_shap.len() <= 7);
        assert!(prediction.explanation_prompt.contains("churn probability"));
        assert_eq!(prediction.model_fingerprint, service.fingerprint());
        // No global chart configured, only the local one
        assert!(prediction.charts.len() <= 1);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let service = trained_service();
        let record = RawRecord {
            age: 55.0,
            is_active_member: 0.0,
            ..Default::default()
        };
        let a = service.prepare(std::slice::from_ref(&record)).unwrap();
        let b = service.prepare(std::slice::from_ref(&record)).unwrap();
        assert_eq!(a.values(), b.values());

        let p1 = service.predict_single(record.clone()).unwrap().prediction;
        let p2 = service.predict_single(record).unwrap().prediction;
        assert_eq!(p1.to_bits(), p2.to_bits());
    }

    #[test]
    fn test_global_chart_comes_first() {
        let service = trained_service();
        let global = EncodedChart::new(b"<svg/>", charts::SVG_MIME, "Global");
        let service = ChurnService {
            global_chart: Some(global.clone()),
            ..service
        };
        let prediction = service.predict_single(RawRecord::default()).unwrap();
        assert_eq!(prediction.charts[0], global);
    }

    #[test]
    fn test_batch_prediction() {
        let service = trained_service();
        let csv = "id,CreditScore,Geography,Gender,Age,Tenure,Balance,NumOfProducts,HasCrCard,IsActiveMember,EstimatedSalary\n\
                   7,600,2,1,58,3,120000.456,1,1,0,90000\n\
                   8,720,0,0,30,8,0,2,1,1,50000\n";
        let result = service.predict_batch(csv.as_bytes()).unwrap();

        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].id, 7);
        assert_eq!(result.data[0].geography, 2);
        assert_eq!(result.data[0].balance, 120000.46);
        for row in &result.data {
            assert_eq!(row.probability, round2(row.probability));
        }
        assert!(result.roi.total_ltv > 0.0);
    }

    #[test]
    fn test_batch_missing_column_rejected() {
        let service = trained_service();
        let csv = "id,CreditScore,Age\n1,600,40\n";
        let err = service.predict_batch(csv.as_bytes()).unwrap_err();
        assert_eq!(err.error_code(), "BATCH_REJECTED");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.12345), 0.12);
        assert_eq!(round2(0.125001), 0.13);
    }
}
