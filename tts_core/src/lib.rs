pub mod chunking;
pub mod model;
pub mod voices;
pub mod wav;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use chunking::{batch_sentences, preprocess_text, AudioFrame, AudioMessage};
pub use model::{KokoroModel, SpeechModel};
pub use voices::{Voice, VoiceStore};

/// Upper bound on concurrent synthesis calls when not configured.
pub const MAX_DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextError {
    #[error("No text provided")]
    Empty,
    #[error("Text too long ({len} chars). Maximum is {max} characters.")]
    TooLong { len: usize, max: usize },
}

/// Check the synthesis preconditions on text. Length is counted in characters.
pub fn validate_text(text: &str, max_len: usize) -> Result<(), TextError> {
    if text.trim().is_empty() {
        return Err(TextError::Empty);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(TextError::TooLong { len, max: max_len });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    InvalidText(#[from] TextError),
    #[error("Voice not found. Available voices: {available:?}")]
    UnknownVoice { voice: String, available: Vec<String> },
    #[error("Synthesis timed out after {0} seconds")]
    Timeout(u64),
    #[error("Synthesis failed: {0:#}")]
    Failed(#[from] anyhow::Error),
}

impl SynthesisError {
    /// Whether the caller sent something invalid (as opposed to a model failure).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidText(_) | Self::UnknownVoice { .. })
    }
}

/// Result of one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub sample_count: usize,
    pub elapsed: Duration,
}

impl SynthesizedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count as u64 * 1000) / self.sample_rate as u64
    }

    pub fn to_base64(&self) -> String {
        wav::encode_base64(&self.wav)
    }
}

#[derive(Debug, Clone)]
pub struct TtsOptions {
    pub default_voice: String,
    pub max_text_length: usize,
    pub max_processing_time: Duration,
    /// Concurrent synthesis calls allowed across the whole process.
    pub workers: usize,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            default_voice: "af".to_string(),
            max_text_length: 500,
            max_processing_time: Duration::from_secs(240),
            workers: default_workers(),
        }
    }
}

/// Available cores, capped at [`MAX_DEFAULT_WORKERS`].
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

/// Synthesis front door: voice lookup, validation, the model call and WAV
/// framing, with a bounded number of blocking calls in flight.
#[derive(Clone)]
pub struct TtsManager {
    voices: Arc<VoiceStore>,
    model: Arc<dyn SpeechModel>,
    options: TtsOptions,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for TtsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsManager")
            .field("voices", &self.voices.list())
            .field("model", &"<SpeechModel>")
            .field("options", &self.options)
            .finish()
    }
}

impl TtsManager {
    pub fn new(
        voices: VoiceStore,
        model: Arc<dyn SpeechModel>,
        options: TtsOptions,
    ) -> anyhow::Result<Self> {
        if !voices.contains(&options.default_voice) {
            anyhow::bail!(
                "default voice '{}' not found. Available voices: {:?}",
                options.default_voice,
                voices.list()
            );
        }
        if options.workers == 0 {
            anyhow::bail!("synthesis worker count must be at least 1");
        }
        let permits = Arc::new(Semaphore::new(options.workers));
        Ok(Self {
            voices: Arc::new(voices),
            model,
            options,
            permits,
        })
    }

    pub fn list_voices(&self) -> Vec<String> {
        self.voices.list()
    }

    pub fn default_voice(&self) -> &str {
        &self.options.default_voice
    }

    pub fn has_voice(&self, id: &str) -> bool {
        self.voices.contains(id)
    }

    pub fn max_text_length(&self) -> usize {
        self.options.max_text_length
    }

    pub fn workers(&self) -> usize {
        self.options.workers
    }

    /// Synthesis slots not currently in use.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Resolve a voice id, listing the valid ids on failure.
    pub fn voice(&self, id: &str) -> Result<Arc<Voice>, SynthesisError> {
        self.voices.get(id).ok_or_else(|| SynthesisError::UnknownVoice {
            voice: id.to_string(),
            available: self.voices.list(),
        })
    }

    /// Validate, wait for a free slot, then synthesize on the blocking pool.
    ///
    /// The wait for the result is bounded by `max_processing_time`; a model
    /// call that overruns keeps its slot until it returns.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        validate_text(text, self.options.max_text_length)?;
        let voice = self.voice(voice_id)?;

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("synthesis pool closed: {e}"))?;

        let model = Arc::clone(&self.model);
        let text = text.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            synthesize_with(model.as_ref(), &text, &voice)
        });

        let limit = self.options.max_processing_time;
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("Task join error: {join_err}").into()),
            Err(_) => {
                warn!("Synthesis exceeded {}s, abandoning wait", limit.as_secs());
                Err(SynthesisError::Timeout(limit.as_secs()))
            }
        }
    }
}

fn synthesize_with(
    model: &dyn SpeechModel,
    text: &str,
    voice: &Voice,
) -> Result<SynthesizedAudio, SynthesisError> {
    let start = Instant::now();
    let samples = model.generate(text, voice, voice.language_hint())?;
    let sample_rate = model.sample_rate();
    let wav = wav::encode_wav(&samples, sample_rate)?;
    wav::check_wav_header(&wav)?;

    let elapsed = start.elapsed();
    debug!(
        voice = voice.id(),
        samples = samples.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "synthesized batch"
    );
    Ok(SynthesizedAudio {
        wav,
        sample_rate,
        sample_count: samples.len(),
        elapsed,
    })
}
