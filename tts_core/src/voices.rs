//! Voice store.
//!
//! Voices are style embeddings stored as raw little-endian `f32` files
//! (`<id>.bin`), one 256-wide style vector per row. They are loaded once at
//! startup and never change afterwards.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use ndarray::{Array2, ArrayView1};
use tracing::{debug, info};

/// Width of a single style vector.
pub const STYLE_DIM: usize = 256;

const VOICE_EXTENSION: &str = "bin";

#[derive(Debug, Clone)]
pub struct Voice {
    id: String,
    embedding: Array2<f32>,
}

impl Voice {
    pub fn new(id: impl Into<String>, embedding: Array2<f32>) -> anyhow::Result<Self> {
        let id = id.into();
        if embedding.ncols() != STYLE_DIM {
            bail!(
                "voice '{}' has style width {}, expected {}",
                id,
                embedding.ncols(),
                STYLE_DIM
            );
        }
        if embedding.nrows() == 0 {
            bail!("voice '{}' has no style rows", id);
        }
        Ok(Self { id, embedding })
    }

    /// Parse a voice from the raw bytes of a `.bin` file.
    pub fn from_bytes(id: impl Into<String>, bytes: &[u8]) -> anyhow::Result<Self> {
        let id = id.into();
        let row_bytes = STYLE_DIM * std::mem::size_of::<f32>();
        if bytes.is_empty() || bytes.len() % row_bytes != 0 {
            bail!(
                "voice '{}': {} bytes is not a multiple of {} (one {}-wide f32 row)",
                id,
                bytes.len(),
                row_bytes,
                STYLE_DIM
            );
        }

        let mut values = Vec::with_capacity(bytes.len() / 4);
        for chunk in bytes.chunks_exact(4) {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !v.is_finite() {
                bail!("voice '{}' contains a non-finite value", id);
            }
            values.push(v);
        }

        let rows = values.len() / STYLE_DIM;
        let embedding = Array2::from_shape_vec((rows, STYLE_DIM), values)
            .with_context(|| format!("voice '{id}': bad embedding shape"))?;
        Self::new(id, embedding)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rows(&self) -> usize {
        self.embedding.nrows()
    }

    /// Language hint passed to the model: the first character of the id
    /// (`af` -> `a`, `bm_lewis` -> `b`).
    pub fn language_hint(&self) -> &str {
        match self.id.char_indices().nth(1) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }

    /// Style row for an input of `token_count` tokens, clamped to the last row.
    pub fn style_for(&self, token_count: usize) -> ArrayView1<'_, f32> {
        let row = token_count.min(self.rows() - 1);
        self.embedding.row(row)
    }
}

/// Read-only mapping from voice id to embedding.
#[derive(Debug, Clone, Default)]
pub struct VoiceStore {
    voices: BTreeMap<String, Arc<Voice>>,
}

impl VoiceStore {
    pub fn from_voices(voices: impl IntoIterator<Item = Voice>) -> Self {
        let voices = voices
            .into_iter()
            .map(|v| (v.id.clone(), Arc::new(v)))
            .collect();
        Self { voices }
    }

    /// Load every `*.bin` voice in `dir`. Any malformed file fails the whole load.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read voices directory {}", dir.display()))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(VOICE_EXTENSION) {
                paths.push(path);
            } else {
                debug!("Skipping non-voice file {}", path.display());
            }
        }
        paths.sort();

        let mut voices = BTreeMap::new();
        for path in paths {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid voice file name {}", path.display()))?
                .to_string();
            let bytes = fs::read(&path)
                .with_context(|| format!("Failed to read voice file {}", path.display()))?;
            let voice = Voice::from_bytes(id.clone(), &bytes)
                .with_context(|| format!("Malformed voice file {}", path.display()))?;
            info!("Loaded voice: {} ({} style rows)", id, voice.rows());
            voices.insert(id, Arc::new(voice));
        }

        if voices.is_empty() {
            bail!("no voice files found in {}", dir.display());
        }

        Ok(Self { voices })
    }

    /// Voice ids in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Voice>> {
        self.voices.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.voices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
