// Configuration for the server, read from the environment

use std::{path::PathBuf, time::Duration};

use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub model_path: PathBuf,
    pub model_config_path: PathBuf,
    pub voices_dir: PathBuf,
    pub default_voice: String,
    pub max_text_length: usize,
    pub target_batch_chars: usize,
    pub audio_chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub max_processing_secs: u64,
    pub session_queue_capacity: usize,
    pub synth_workers: usize,
    pub sample_rate: Option<u32>,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            model_path: PathBuf::from("models/kokoro.onnx"),
            model_config_path: PathBuf::from("models/config.json"),
            voices_dir: PathBuf::from("voices"),
            default_voice: "af".to_string(),
            max_text_length: 500,
            target_batch_chars: 150,
            audio_chunk_size: 8192,
            chunk_delay_ms: 20,
            max_processing_secs: 240,
            session_queue_capacity: 32,
            synth_workers: tts_core::default_workers(),
            sample_rate: None,
            request_timeout_secs: 300,
            rate_limit_per_minute: 60,
            cors_allowed_origins: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            model_path: env_path("MODEL_PATH").unwrap_or(defaults.model_path),
            model_config_path: env_path("MODEL_CONFIG_PATH").unwrap_or(defaults.model_config_path),
            voices_dir: env_path("VOICES_DIR").unwrap_or(defaults.voices_dir),
            default_voice: std::env::var("DEFAULT_VOICE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.default_voice),
            max_text_length: env_parse("MAX_TEXT_LENGTH").unwrap_or(defaults.max_text_length),
            target_batch_chars: env_parse("TARGET_BATCH_CHARS").unwrap_or(defaults.target_batch_chars),
            audio_chunk_size: env_parse("AUDIO_CHUNK_SIZE").unwrap_or(defaults.audio_chunk_size),
            chunk_delay_ms: env_parse("CHUNK_DELAY_MS").unwrap_or(defaults.chunk_delay_ms),
            max_processing_secs: env_parse("MAX_PROCESSING_SECS").unwrap_or(defaults.max_processing_secs),
            session_queue_capacity: env_parse("SESSION_QUEUE_CAPACITY")
                .unwrap_or(defaults.session_queue_capacity),
            synth_workers: env_parse("SYNTH_WORKERS").unwrap_or(defaults.synth_workers),
            sample_rate: env_parse("SAMPLE_RATE"),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_per_minute),
            cors_allowed_origins,
        }
    }

    /// Reject settings that would make the server misbehave at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("MAX_TEXT_LENGTH", self.max_text_length),
            ("TARGET_BATCH_CHARS", self.target_batch_chars),
            ("AUDIO_CHUNK_SIZE", self.audio_chunk_size),
            ("SESSION_QUEUE_CAPACITY", self.session_queue_capacity),
            ("SYNTH_WORKERS", self.synth_workers),
            ("RATE_LIMIT_PER_MINUTE", self.rate_limit_per_minute as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.max_processing_secs == 0 {
            bail!("MAX_PROCESSING_SECS must be greater than zero");
        }
        if self.default_voice.trim().is_empty() {
            bail!("DEFAULT_VOICE must not be empty");
        }
        Ok(())
    }

    pub fn tts_options(&self) -> tts_core::TtsOptions {
        tts_core::TtsOptions {
            default_voice: self.default_voice.clone(),
            max_text_length: self.max_text_length,
            max_processing_time: self.max_processing_time(),
            workers: self.synth_workers,
        }
    }

    pub fn session_config(&self) -> crate::session::SessionConfig {
        crate::session::SessionConfig {
            target_batch_chars: self.target_batch_chars,
            queue_capacity: self.session_queue_capacity,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_processing_time(&self) -> Duration {
        Duration::from_secs(self.max_processing_secs)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_text_length, 500);
        assert_eq!(config.target_batch_chars, 150);
        assert_eq!(config.audio_chunk_size, 8192);
        assert!(config.synth_workers >= 1 && config.synth_workers <= 4);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = ServerConfig {
            audio_chunk_size: 0,
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("AUDIO_CHUNK_SIZE"));

        let config = ServerConfig {
            session_queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tts_options_follow_config() {
        let config = ServerConfig {
            default_voice: "bf_emma".to_string(),
            max_processing_secs: 12,
            synth_workers: 3,
            ..ServerConfig::default()
        };
        let options = config.tts_options();
        assert_eq!(options.default_voice, "bf_emma");
        assert_eq!(options.max_processing_time, Duration::from_secs(12));
        assert_eq!(options.workers, 3);
    }
}
