//! Shared helpers for the integration tests: a deterministic model and an app
//! built from the real router.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use ndarray::Array2;
use tokio::net::TcpListener;
use tts_core::{voices::STYLE_DIM, SpeechModel, TtsManager, Voice, VoiceStore};
use tts_server::{build_router, AppState, ServerConfig};

/// Deterministic stand-in for the neural model.
pub struct FakeModel;

impl SpeechModel for FakeModel {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn generate(&self, text: &str, _voice: &Voice, _lang: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains("explode") {
            anyhow::bail!("model exploded");
        }
        Ok((0..text.chars().count() * 200)
            .map(|i| (i as f32 * 0.03).sin() * 0.4)
            .collect())
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        audio_chunk_size: 256,
        chunk_delay_ms: 0,
        synth_workers: 2,
        ..ServerConfig::default()
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let voices = VoiceStore::from_voices(["af", "am_adam", "bf_emma"].map(|id| {
        Voice::new(id, Array2::from_elem((8, STYLE_DIM), 0.2)).unwrap()
    }));
    let tts = TtsManager::new(voices, Arc::new(FakeModel), config.tts_options()).unwrap();
    AppState::new(tts, config)
}

pub fn create_test_app() -> Router {
    build_router(test_state()).unwrap()
}

/// Serve the app on an ephemeral port.
pub async fn spawn_server() -> SocketAddr {
    spawn_server_with(test_state()).await
}

/// Serve `state` on an ephemeral port; the caller keeps a handle to it.
pub async fn spawn_server_with(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state).unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
