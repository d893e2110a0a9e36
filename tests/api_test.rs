/// HTTP API tests, driven through the router without a network listener
mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use churn_bank_service::{
    api::{build_router, AppState},
    config::Config,
    metrics,
    ml::ChurnService,
};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "churn-test-boundary";

/// Training is shared by every test in this file
fn fixture() -> &'static (TempDir, Config) {
    static FIXTURE: OnceLock<(TempDir, Config)> = OnceLock::new();
    FIXTURE.get_or_init(common::artifact_dir)
}

fn app_with_model() -> Router {
    let (_, config) = fixture();
    let service = ChurnService::load(config).unwrap();
    build_router(AppState::new(config.clone()).with_service(Arc::new(service)))
}

fn app_without_model() -> Router {
    build_router(AppState::new(Config::default()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_upload(filename: &str, contents: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = filename,
        c = contents
    );
    Request::builder()
        .method("POST")
        .uri("/api/churn_bank/predict_batch")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_without_model() {
    let (status, body) = send(app_without_model(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);

    let (status, body) = send(app_without_model(), get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "MODEL_UNAVAILABLE");
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let (status, body) = send(
        app_without_model(),
        post_json("/api/churn_bank/predict", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["status"], 503);
}

#[tokio::test]
async fn test_ready_with_model() {
    let (status, body) = send(app_with_model(), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["model_fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_predict_single() {
    let request = post_json(
        "/api/churn_bank/predict",
        json!({"Age": 58, "Geography": 2, "Gender": 1, "IsActiveMember": 0, "NumOfProducts": 1}),
    );
    let (status, body) = send(app_with_model(), request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    assert_eq!(body["status"], "success");
    assert_eq!(body["request_id"].as_str().unwrap().len(), 36);
    let probability = body["prediction"].as_f64().unwrap();
    assert!(probability > 0.0 && probability < 1.0);
    assert_eq!(
        body["predicted_class"].as_u64().unwrap(),
        u64::from(probability >= 0.5)
    );
    assert_eq!(body["readable_features"]["Geography"], "Germany");
    assert_eq!(body["readable_features"]["Active Member"], "No");

    let local = body["local_shap"].as_array().unwrap();
    assert!(!local.is_empty() && local.len() <= 7);
    let magnitudes: Vec<f64> = local
        .iter()
        .map(|a| a["value"].as_f64().unwrap().abs())
        .collect();
    assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));

    let charts = body["charts"].as_array().unwrap();
    assert_eq!(charts.len(), 2);
    assert_eq!(charts[0]["type"], "image/svg+xml");
    assert!(charts[0]["title"].as_str().unwrap().contains("Global"));
    assert!(charts[1]["title"].as_str().unwrap().contains("Local"));

    assert!(body["explanation_prompt"]
        .as_str()
        .unwrap()
        .contains("Main factors"));
}

#[tokio::test]
async fn test_predict_is_deterministic() {
    let payload = json!({"Age": 44, "Balance": 120000.0, "Geography": 1});
    let (_, first) = send(
        app_with_model(),
        post_json("/api/churn_bank/predict", payload.clone()),
    )
    .await;
    let (_, second) = send(app_with_model(), post_json("/api/churn_bank/predict", payload)).await;
    assert_eq!(first["prediction"], second["prediction"]);
    assert_eq!(first["local_shap"], second["local_shap"]);
}

#[tokio::test]
async fn test_predict_rejects_invalid_codes() {
    let (status, body) = send(
        app_with_model(),
        post_json("/api/churn_bank/predict", json!({"Geography": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let request = Request::builder()
        .method("POST")
        .uri("/api/churn_bank/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app_with_model(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_batch_prediction() {
    let csv = format!(
        "{}\n1,15600001,Smith,600,2,1,58,3,120000.456,1,1,0,90000\n2,15600002,Lee,720,0,0,30,8,0,2,1,1,50000\n",
        common::BATCH_HEADER
    );
    let (status, body) = send(app_with_model(), multipart_upload("batch.csv", &csv)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["id"], 1);
    assert_eq!(data[0]["Balance"], 120000.46);
    for row in data {
        let p = row["probability"].as_f64().unwrap();
        assert_eq!(p, (p * 100.0).round() / 100.0);
    }
    assert!(body["roi"]["total_ltv"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_batch_missing_columns_rejected() {
    let csv = "id,CreditScore,Age\n1,600,40\n";
    let (status, body) = send(app_with_model(), multipart_upload("batch.csv", csv)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BATCH_REJECTED");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("Geography"));
    assert!(message.contains("EstimatedSalary"));
}

#[tokio::test]
async fn test_batch_null_value_rejected() {
    let csv = format!(
        "{}\n1,15600001,Smith,600,2,1,,3,1000,1,1,0,90000\n",
        common::BATCH_HEADER
    );
    let (status, body) = send(app_with_model(), multipart_upload("batch.csv", &csv)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("Age"));
}

#[tokio::test]
async fn test_batch_requires_csv_upload() {
    let (status, body) = send(app_with_model(), multipart_upload("batch.xlsx", "x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // A non-multipart body is rejected by the extractor, before any scoring
    let request = post_json("/api/churn_bank/predict_batch", json!({}));
    let (status, body) = send(app_with_model(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_model_info() {
    let (_, config) = fixture();
    let (status, body) = send(app_with_model(), get("/api/churn_bank/model")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipeline"], "feature_engineer_v2");
    assert_eq!(body["global_chart_available"], true);
    assert_eq!(body["top_k"], config.model.top_k);
    assert_eq!(body["fingerprint"], body["manifest"]["bundle_fingerprint"]);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    metrics::init_metrics().unwrap();
    send(
        app_with_model(),
        post_json("/api/churn_bank/predict", json!({})),
    )
    .await;

    let response = app_with_model().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let families = common::parse_prometheus_output(&text);
    assert!(families.contains_key("churn_bank_predictions_total"));
    assert!(families.contains_key("churn_bank_http_requests_total"));
}
