use std::io::Cursor;

use anyhow::bail;
use base64::{engine::general_purpose, Engine as _};

/// Size of the canonical PCM WAV header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// Encode PCM f32 samples as mono 16-bit PCM WAV (RIFF) bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        // 32767 rather than 32768 keeps +1.0 in range
        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}

/// Reject anything that does not look like a RIFF/WAVE payload.
pub fn check_wav_header(bytes: &[u8]) -> anyhow::Result<()> {
    if bytes.len() < WAV_HEADER_LEN {
        bail!(
            "malformed WAV: {} bytes is shorter than the {}-byte header",
            bytes.len(),
            WAV_HEADER_LEN
        );
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("malformed WAV: missing RIFF/WAVE magic");
    }
    Ok(())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}
