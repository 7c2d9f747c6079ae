//! HTTP endpoints and router assembly.

use std::{sync::atomic::Ordering, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    error::ApiError,
    metrics::{MetricsResponse, SessionMetrics, SystemMetrics},
    socketio,
    state::AppState,
    validation::validate_tts_request,
    ws::ws_handler,
};

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoicesResponse {
    pub voices: Vec<String>,
    pub default_voice: String,
}

/// Assemble every transport behind one router.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_interval_ms(config.rate_limit_per_minute))
            .burst_size(config.rate_limit_per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let api = Router::new()
        .route("/voices", get(list_voices))
        .route("/tts", post(tts_endpoint))
        .layer(GovernorLayer::new(governor_conf));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/ws", get(ws_handler))
        .merge(api.clone())
        .nest("/api", api)
        .layer(socketio::layer(state.clone()))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state);

    Ok(app)
}

/// One token back every `60_000 / per_minute` ms.
fn replenish_interval_ms(per_minute: u32) -> u64 {
    (60_000 / u64::from(per_minute.max(1))).max(1)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &value {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    state.metrics.http_requests.fetch_add(1, Ordering::Relaxed);
    Json(VoicesResponse {
        voices: state.tts.list_voices(),
        default_voice: state.tts.default_voice().to_string(),
    })
}

/// Synthesize the whole text and answer with a WAV attachment.
pub async fn tts_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.metrics.http_requests.fetch_add(1, Ordering::Relaxed);
    let Json(req) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

    let (text, voice) =
        validate_tts_request(&state.tts, req.text.as_deref(), req.voice.as_deref())?;
    info!(voice = %voice, chars = text.chars().count(), "HTTP TTS request");

    let audio = match state.tts.synthesize(&text, &voice).await {
        Ok(audio) => audio,
        Err(e) => {
            if !e.is_client_error() {
                state.metrics.synthesis.record_error();
            }
            return Err(e.into());
        }
    };
    state.metrics.record_synthesis(&audio);
    info!(
        voice = %voice,
        bytes = audio.wav.len(),
        duration_ms = audio.duration_ms(),
        "HTTP TTS response ready"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"speech.wav\""),
        ],
        audio.wav,
    )
        .into_response())
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();

    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            memory_used_mb: system.used_memory() / 1024 / 1024,
            memory_total_mb: system.total_memory() / 1024 / 1024,
            request_count: state.metrics.http_requests.load(Ordering::Relaxed),
            uptime_seconds: state.metrics.uptime_seconds(),
        },
        synthesis: state.metrics.synthesis.snapshot(),
        sessions: SessionMetrics {
            active_sessions: state.sessions.len(),
            sessions_opened: state.metrics.sessions_opened.load(Ordering::Relaxed),
            batches_enqueued: state.metrics.batches_enqueued.load(Ordering::Relaxed),
            total_samples: state.metrics.total_samples.load(Ordering::Relaxed),
            synth_workers: state.tts.workers(),
            idle_workers: state.tts.idle_workers(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replenish_interval() {
        assert_eq!(replenish_interval_ms(60), 1000);
        assert_eq!(replenish_interval_ms(120), 500);
        assert_eq!(replenish_interval_ms(0), 60_000);
        assert_eq!(replenish_interval_ms(u32::MAX), 1);
    }
}
