use std::sync::Arc;

use tts_core::TtsManager;

use crate::{config::ServerConfig, metrics::AppMetrics, session::SessionManager};

/// Shared by every handler on every transport.
#[derive(Debug, Clone)]
pub struct AppState {
    pub tts: TtsManager,
    pub sessions: SessionManager,
    pub metrics: AppMetrics,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(tts: TtsManager, config: ServerConfig) -> Self {
        let metrics = AppMetrics::new();
        let sessions = SessionManager::new(tts.clone(), metrics.clone(), config.session_config());
        Self {
            tts,
            sessions,
            metrics,
            config: Arc::new(config),
        }
    }
}
