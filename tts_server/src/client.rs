//! Client-side reassembly of chunked audio messages and batch bookkeeping.

use std::collections::HashMap;

use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("message {message_id}: chunk {chunk_index} out of range (total {total_chunks})")]
    OutOfRange {
        message_id: u64,
        chunk_index: usize,
        total_chunks: usize,
    },

    #[error("message {message_id}: chunk count changed from {expected} to {got}")]
    TotalMismatch {
        message_id: u64,
        expected: usize,
        got: usize,
    },

    #[error("message {message_id}: invalid base64 audio: {reason}")]
    Decode { message_id: u64, reason: String },
}

#[derive(Debug)]
struct Partial {
    chunks: Vec<Option<String>>,
    received: usize,
    text: String,
}

/// A fully reassembled audio message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAudio {
    pub message_id: u64,
    pub text: String,
    pub wav: Vec<u8>,
}

/// Collects `audio_chunk` frames, which may interleave across messages.
#[derive(Debug, Default)]
pub struct AudioAssembler {
    partial: HashMap<u64, Partial>,
}

impl AudioAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages with at least one chunk still missing.
    pub fn in_flight(&self) -> usize {
        self.partial.len()
    }

    /// Add one frame; returns the decoded WAV once every chunk arrived.
    pub fn push(
        &mut self,
        message_id: u64,
        chunk_index: usize,
        total_chunks: usize,
        data: &str,
        text: &str,
    ) -> Result<Option<CompletedAudio>, AssemblyError> {
        if chunk_index >= total_chunks {
            return Err(AssemblyError::OutOfRange {
                message_id,
                chunk_index,
                total_chunks,
            });
        }

        let partial = self.partial.entry(message_id).or_insert_with(|| Partial {
            chunks: vec![None; total_chunks],
            received: 0,
            text: text.to_string(),
        });
        if partial.chunks.len() != total_chunks {
            return Err(AssemblyError::TotalMismatch {
                message_id,
                expected: partial.chunks.len(),
                got: total_chunks,
            });
        }

        let slot = &mut partial.chunks[chunk_index];
        if slot.is_none() {
            partial.received += 1;
        }
        *slot = Some(data.to_string());

        if partial.received < total_chunks {
            return Ok(None);
        }

        let Some(done) = self.partial.remove(&message_id) else {
            return Ok(None);
        };
        let encoded: String = done.chunks.into_iter().flatten().collect();
        let wav = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| AssemblyError::Decode {
                message_id,
                reason: e.to_string(),
            })?;
        Ok(Some(CompletedAudio {
            message_id,
            text: done.text,
            wav,
        }))
    }
}

/// Tracks batches announced by `processing` until their audio or error
/// arrives. A session's worker is serial, so at most one batch awaits audio.
#[derive(Debug, Default)]
pub struct BatchTracker {
    outstanding: usize,
    awaiting: Option<u64>,
    completed: usize,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processing(&mut self, message_id: u64) {
        self.outstanding += 1;
        self.awaiting = Some(message_id);
    }

    /// First audio frame of a message: an error can no longer end it.
    pub fn audio_started(&mut self, message_id: u64) {
        if self.awaiting == Some(message_id) {
            self.awaiting = None;
        }
    }

    pub fn audio_completed(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.completed += 1;
    }

    /// An `{error}` reply. It ends the awaiting batch when there is one;
    /// otherwise it was a rejected request that never queued anything.
    pub fn error(&mut self) {
        if self.awaiting.take().is_some() {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Nothing left to wait for once the connection has gone quiet.
    pub fn is_done(&self) -> bool {
        self.outstanding == 0
    }
}
