//! Bank customer churn inference service.
//!
//! A gradient-boosted tree model scores customers through a shared feature
//! pipeline, aligned to a frozen feature schema, and explains each
//! prediction with exact TreeSHAP attributions. The artifact bundle tying
//! model, schema and pipeline together is verified by SHA-256 digests at
//! load time.

pub mod analytics;
pub mod api;
pub mod charts;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod metrics;
pub mod ml;
pub mod models;

pub use error::{AppError, Result};
