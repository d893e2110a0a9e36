pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::{config::Config, ml::ChurnService};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when the artifact bundle could not be loaded at startup
    pub service: Option<Arc<ChurnService>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            service: None,
            started_at: Instant::now(),
        }
    }

    /// Set the loaded inference service
    pub fn with_service(mut self, service: Arc<ChurnService>) -> Self {
        self.service = Some(service);
        self
    }

    /// The inference service, or 503 when no model is loaded
    pub fn service(&self) -> crate::error::Result<Arc<ChurnService>> {
        self.service.clone().ok_or_else(|| {
            crate::error::AppError::ModelUnavailable(format!(
                "no model bundle loaded from {}",
                self.config.model.artifact_dir.display()
            ))
        })
    }
}
