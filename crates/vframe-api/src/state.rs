//! Application state.

use std::sync::Arc;

use vframe_engine::{AnalysisService, EngineConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<AnalysisService>,
}

impl AppState {
    /// Create new application state, starting the analysis engine.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        tokio::fs::create_dir_all(&config.upload_dir).await?;

        let engine_config = EngineConfig::from_env();
        let service = AnalysisService::with_defaults(engine_config)?;

        Ok(Self { config, service })
    }

    /// Create state around an already-running service (tests).
    pub fn with_service(config: ApiConfig, service: Arc<AnalysisService>) -> Self {
        Self { config, service }
    }
}
