use crate::api::{handlers, AppState};
use crate::metrics::track_metrics;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes;
    let cors_permissive = state.config.server.cors_permissive;
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let router = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        // Churn inference
        .route("/api/churn_bank/predict", post(handlers::predict))
        .route("/api/churn_bank/predict_batch", post(handlers::predict_batch))
        .route("/api/churn_bank/model", get(handlers::model_info))
        // Prometheus exposition
        .route("/metrics", get(handlers::metrics))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(false)),
        );

    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
