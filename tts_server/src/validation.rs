use tts_core::{preprocess_text, validate_text, TextError, TtsManager};

use crate::error::ApiError;

/// Validate a synchronous TTS request and resolve the voice to use.
///
/// Text is normalized first; the returned pair is what gets synthesized.
pub fn validate_tts_request(
    tts: &TtsManager,
    text: Option<&str>,
    voice: Option<&str>,
) -> Result<(String, String), ApiError> {
    let text = preprocess_text(text.unwrap_or_default());
    validate_text(&text, tts.max_text_length()).map_err(text_error)?;

    let voice = voice
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(tts.default_voice());
    validate_voice(tts, voice)?;

    Ok((text, voice.to_string()))
}

pub fn validate_voice(tts: &TtsManager, voice: &str) -> Result<(), ApiError> {
    if tts.has_voice(voice) {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Voice not found. Available voices: {:?}",
            tts.list_voices()
        )))
    }
}

fn text_error(e: TextError) -> ApiError {
    ApiError::InvalidInput(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_tts;

    #[test]
    fn test_validate_tts_request_valid() {
        let tts = fake_tts();
        let (text, voice) = validate_tts_request(&tts, Some("Hello"), None).unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(voice, "af");

        let (_, voice) = validate_tts_request(&tts, Some("Hello"), Some("bf_emma")).unwrap();
        assert_eq!(voice, "bf_emma");
    }

    #[test]
    fn test_validate_tts_request_missing_text() {
        let tts = fake_tts();
        for text in [None, Some(""), Some("   ")] {
            match validate_tts_request(&tts, text, None) {
                Err(ApiError::InvalidInput(msg)) => assert_eq!(msg, "No text provided"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_tts_request_too_long() {
        let tts = fake_tts();
        let long_text = "a".repeat(600);
        match validate_tts_request(&tts, Some(&long_text), None) {
            Err(ApiError::InvalidInput(msg)) => {
                assert!(msg.contains("600"));
                assert!(msg.contains("500"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validate_tts_request_unknown_voice() {
        let tts = fake_tts();
        match validate_tts_request(&tts, Some("Hello"), Some("nope")) {
            Err(ApiError::InvalidInput(msg)) => {
                assert!(msg.starts_with("Voice not found"));
                assert!(msg.contains("af"));
                assert!(msg.contains("bf_emma"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_blank_voice_falls_back_to_default() {
        let tts = fake_tts();
        let (_, voice) = validate_tts_request(&tts, Some("Hello"), Some("  ")).unwrap();
        assert_eq!(voice, "af");
    }
}
