use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::ml::{BatchPrediction, ModelInfo, SinglePrediction};
use crate::models::{Gender, Geography, RawRecord};
use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model_loaded: state.service.is_some(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model_loaded: bool,
}

/// Ready only once a verified model bundle is loaded
pub async fn readiness(State(state): State<AppState>) -> Result<Json<ReadinessResponse>> {
    let service = state.service()?;
    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        model_fingerprint: service.fingerprint().to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub model_fingerprint: String,
}

/// Single-customer prediction request. Omitted fields take the defaults of
/// [`RawRecord`].
#[derive(Debug, Default, Deserialize, Validate)]
pub struct PredictRequest {
    #[serde(rename = "CreditScore")]
    pub credit_score: Option<f64>,
    #[serde(rename = "Age")]
    #[validate(range(min = 0.0))]
    pub age: Option<f64>,
    #[serde(rename = "Tenure")]
    #[validate(range(min = 0.0))]
    pub tenure: Option<f64>,
    #[serde(rename = "Balance")]
    pub balance: Option<f64>,
    #[serde(rename = "NumOfProducts")]
    #[validate(range(min = 0.0))]
    pub num_of_products: Option<f64>,
    #[serde(rename = "HasCrCard")]
    pub has_cr_card: Option<f64>,
    #[serde(rename = "IsActiveMember")]
    pub is_active_member: Option<f64>,
    #[serde(rename = "EstimatedSalary")]
    pub estimated_salary: Option<f64>,
    /// 0=France, 1=Spain, 2=Germany
    #[serde(rename = "Geography")]
    #[validate(range(min = 0, max = 2))]
    pub geography: Option<i64>,
    /// 0=Male, 1=Female
    #[serde(rename = "Gender")]
    #[validate(range(min = 0, max = 1))]
    pub gender: Option<i64>,
}

impl PredictRequest {
    pub fn into_record(self) -> Result<RawRecord> {
        let defaults = RawRecord::default();

        let numeric = [
            ("CreditScore", self.credit_score),
            ("Age", self.age),
            ("Tenure", self.tenure),
            ("Balance", self.balance),
            ("NumOfProducts", self.num_of_products),
            ("HasCrCard", self.has_cr_card),
            ("IsActiveMember", self.is_active_member),
            ("EstimatedSalary", self.estimated_salary),
        ];
        if let Some((name, _)) = numeric
            .iter()
            .find(|(_, v)| v.map_or(false, |v| !v.is_finite()))
        {
            return Err(AppError::Validation(format!("{} must be a finite number", name)));
        }

        let geography = match self.geography {
            Some(code) => Geography::from_code(code).ok_or_else(|| {
                AppError::Validation(format!("Geography must be 0, 1 or 2, got {}", code))
            })?,
            None => defaults.geography,
        };
        let gender = match self.gender {
            Some(code) => Gender::from_code(code).ok_or_else(|| {
                AppError::Validation(format!("Gender must be 0 or 1, got {}", code))
            })?,
            None => defaults.gender,
        };

        Ok(RawRecord {
            credit_score: self.credit_score.unwrap_or(defaults.credit_score),
            age: self.age.unwrap_or(defaults.age),
            tenure: self.tenure.unwrap_or(defaults.tenure),
            balance: self.balance.unwrap_or(defaults.balance),
            num_of_products: self.num_of_products.unwrap_or(defaults.num_of_products),
            has_cr_card: self.has_cr_card.unwrap_or(defaults.has_cr_card),
            is_active_member: self.is_active_member.unwrap_or(defaults.is_active_member),
            estimated_salary: self.estimated_salary.unwrap_or(defaults.estimated_salary),
            geography,
            gender,
            ..defaults
        })
    }
}

/// Score one customer
pub async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<SinglePrediction>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate()?;
    let record = request.into_record()?;

    let service = state.service()?;
    let prediction = tokio::task::spawn_blocking(move || service.predict_single(record))
        .await
        .map_err(|e| AppError::Internal(format!("prediction task failed: {}", e)))??;

    Ok(Json(prediction))
}

/// Score a CSV upload (multipart field `file`)
pub async fn predict_batch(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchPrediction>> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let service = state.service()?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(AppError::BadRequest("no file selected".to_string()));
        }
        if !filename.to_ascii_lowercase().ends_with(".csv") {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a CSV file, upload a .csv",
                filename
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        tracing::info!(filename = %filename, bytes = bytes.len(), "Batch upload received");
        upload = Some(bytes);
        break;
    }
    let bytes = upload
        .ok_or_else(|| AppError::BadRequest("missing multipart field 'file'".to_string()))?;

    let result = tokio::task::spawn_blocking(move || service.predict_batch(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("batch task failed: {}", e)))??;

    Ok(Json(result))
}

/// Loaded model, schema and pipeline
pub async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfo>> {
    Ok(Json(state.service()?.info()))
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
