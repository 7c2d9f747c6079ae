// Shared fixtures for unit tests: an in-memory model and voice set.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ndarray::Array2;
use tts_core::{voices::STYLE_DIM, SpeechModel, TtsManager, TtsOptions, Voice, VoiceStore};

/// Emits a short tone per character; fails on any text containing "explode".
pub struct FakeModel {
    pub calls: AtomicUsize,
    delay: Duration,
}

impl FakeModel {
    pub const FAILURE: &'static str = "fake model failure";

    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

impl SpeechModel for FakeModel {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn generate(&self, text: &str, _voice: &Voice, _lang: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if text.contains("explode") {
            anyhow::bail!(Self::FAILURE);
        }
        let len = text.chars().count() * 100;
        Ok((0..len)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect())
    }
}

pub fn voice_store() -> VoiceStore {
    let voices = ["af", "bf_emma"].map(|id| {
        Voice::new(id, Array2::from_elem((4, STYLE_DIM), 0.1)).expect("valid voice")
    });
    VoiceStore::from_voices(voices)
}

pub fn fake_tts_with(delay: Duration) -> (TtsManager, Arc<FakeModel>) {
    let model = Arc::new(FakeModel::new(delay));
    let options = TtsOptions {
        workers: 2,
        ..TtsOptions::default()
    };
    let tts = TtsManager::new(voice_store(), model.clone(), options).expect("fake tts");
    (tts, model)
}

pub fn fake_tts() -> TtsManager {
    fake_tts_with(Duration::ZERO).0
}
