//! Text batching and audio framing.
//!
//! Input text is cut into sentence batches so each model call stays short,
//! and encoded audio is cut into fixed-size frames for transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tags some editors prepend to dictated text; they are never spoken.
const STRIPPED_TAGS: [&str; 2] = ["#fiction\r\n", "#style\r\n"];

const PREVIEW_CHARS: usize = 100;

/// Normalize raw client text before validation.
pub fn preprocess_text(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for tag in STRIPPED_TAGS {
        text = text.replace(tag, "");
    }
    text.replace("\r\n", " ")
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split text into trimmed sentences.
///
/// A run of terminators ends a sentence only when followed by whitespace or
/// the end of the text, so `3.14` and `Wait...` stay intact.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !is_terminator(c) {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            current.push(next);
            chars.next();
        }
        let at_boundary = chars.peek().map_or(true, |n| n.is_whitespace());
        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Group sentences into batches of at most `target_chars` characters.
///
/// Each sentence is followed by a single space. A sentence longer than the
/// target becomes its own oversized batch.
pub fn batch_sentences(text: &str, target_chars: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let added = sentence.chars().count() + 1;
        if current_len > 0 && current_len + added > target_chars {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(&sentence);
        current.push(' ');
        current_len += added;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Cut an ASCII (base64) string into frames of `frame_size` bytes.
pub fn split_frames(encoded: &str, frame_size: usize) -> Vec<&str> {
    assert!(frame_size > 0, "frame size must be positive");
    debug_assert!(encoded.is_ascii());
    encoded
        .as_bytes()
        .chunks(frame_size)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect()
}

/// Short form of a batch for progress messages.
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

static LAST_MESSAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds, bumped when needed so ids never repeat.
pub fn next_message_id() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut last = LAST_MESSAGE_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MESSAGE_ID.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// One transport frame of an [`AudioMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame<'a> {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub is_final: bool,
    pub data: &'a str,
}

/// A synthesized batch ready to be streamed.
#[derive(Debug, Clone)]
pub struct AudioMessage {
    pub message_id: u64,
    pub text: String,
    chunks: Vec<String>,
}

impl AudioMessage {
    pub fn new(message_id: u64, audio_base64: &str, frame_size: usize, text: impl Into<String>) -> Self {
        let chunks = split_frames(audio_base64, frame_size)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            message_id,
            text: text.into(),
            chunks,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = AudioFrame<'_>> {
        let total = self.chunks.len();
        self.chunks.iter().enumerate().map(move |(i, data)| AudioFrame {
            chunk_index: i,
            total_chunks: total,
            is_final: i + 1 == total,
            data,
        })
    }
}
