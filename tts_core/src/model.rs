//! Speech model seam.
//!
//! Waveform generation is owned by an external runtime. [`SpeechModel`] is
//! the only thing the rest of the crate knows about it; [`KokoroModel`] runs
//! a Kokoro-style ONNX export through `ort`.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{bail, Context};
use ndarray::{Array1, Array2};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::voices::Voice;

pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Token budget of the Kokoro graph, excluding the two pad tokens.
const MAX_TOKENS: usize = 510;
const PAD_TOKEN: i64 = 0;

/// Anything that turns text into a mono waveform in [-1.0, 1.0].
pub trait SpeechModel: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Blocking; may take seconds on CPU.
    fn generate(&self, text: &str, voice: &Voice, lang: &str) -> anyhow::Result<Vec<f32>>;
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    vocab: HashMap<String, i64>,
    #[serde(default)]
    sample_rate: Option<u32>,
}

pub struct KokoroModel {
    session: Session,
    vocab: HashMap<char, i64>,
    sample_rate: u32,
}

impl std::fmt::Debug for KokoroModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KokoroModel")
            .field("session", &"<ort::Session>")
            .field("vocab_size", &self.vocab.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl KokoroModel {
    /// Load the ONNX graph and its JSON config (`{"vocab": {...}}`).
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        config_path: Q,
        intra_threads: usize,
    ) -> anyhow::Result<Self> {
        let config_path = config_path.as_ref();
        let text = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read model config {}", config_path.display()))?;
        let config: ModelConfig = serde_json::from_str(&text)
            .with_context(|| "model config is not valid JSON")?;

        let vocab = parse_vocab(config.vocab)?;

        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

        let sample_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        info!(
            "Loaded speech model {} ({} symbols, {} Hz)",
            model_path.display(),
            vocab.len(),
            sample_rate
        );

        Ok(Self {
            session,
            vocab,
            sample_rate,
        })
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    fn tokenize(&self, text: &str) -> Vec<i64> {
        tokenize(&self.vocab, text)
    }
}

fn parse_vocab(raw: HashMap<String, i64>) -> anyhow::Result<HashMap<char, i64>> {
    let mut vocab = HashMap::with_capacity(raw.len());
    for (symbol, id) in raw {
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                vocab.insert(c, id);
            }
            _ => bail!("vocab symbol {:?} is not a single character", symbol),
        }
    }
    if vocab.is_empty() {
        bail!("model config has an empty vocab");
    }
    Ok(vocab)
}

/// Map text to token ids, dropping unknown symbols and capping the length.
fn tokenize(vocab: &HashMap<char, i64>, text: &str) -> Vec<i64> {
    let mut tokens: Vec<i64> = text.chars().filter_map(|c| vocab.get(&c).copied()).collect();
    tokens.truncate(MAX_TOKENS);
    tokens
}

/// Text must already be in the model's symbol set (phonemes for a stock
/// Kokoro config); unknown symbols are dropped. `lang` is only logged, the
/// graph takes no language input.
impl SpeechModel for KokoroModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(&self, text: &str, voice: &Voice, lang: &str) -> anyhow::Result<Vec<f32>> {
        let mut tokens = self.tokenize(text);
        if tokens.is_empty() {
            bail!("text contains no speakable symbols");
        }
        let token_count = tokens.len();
        debug!(voice = voice.id(), lang, token_count, "running speech model");

        tokens.insert(0, PAD_TOKEN);
        tokens.push(PAD_TOKEN);

        let style = voice.style_for(token_count).to_vec();
        let style = Array2::from_shape_vec((1, style.len()), style)
            .context("failed building style tensor")?;
        let input_ids = Array2::from_shape_vec((1, tokens.len()), tokens)
            .context("failed building token tensor")?;
        let speed = Array1::from_vec(vec![1.0f32]);

        let outputs = self.session.run(ort::inputs![
            "tokens" => Tensor::from_array(input_ids)?,
            "style" => Tensor::from_array(style)?,
            "speed" => Tensor::from_array(speed)?,
        ]?)?;

        let audio = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed extracting f32 audio tensor")?;
        Ok(audio.iter().copied().collect())
    }
}
