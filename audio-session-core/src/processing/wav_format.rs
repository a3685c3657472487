//! WAV byte-layout helpers.
//!
//! Generates standard 44-byte RIFF headers for exporting captured audio and
//! reads PCM clips handed to the playback path. Nothing here touches disk.

use crate::models::error::AudioError;
use crate::processing::sample_convert;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Generate a 44-byte WAV RIFF header.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(sample_rate: u32, bit_depth: u16, channels: u16, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Header followed by 16-bit PCM data.
pub fn encode_pcm16_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let pcm = sample_convert::f32_to_pcm16(samples);
    let header = generate_wav_header(sample_rate, 16, channels, pcm.len() as u32);
    let mut out = Vec::with_capacity(WAV_HEADER_SIZE + pcm.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&pcm);
    out
}

/// Decoded contents of a WAV byte image.
#[derive(Debug, Clone, PartialEq)]
pub struct WavContents {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

/// Parse a RIFF/WAVE image holding 16-bit PCM or 32-bit float samples.
///
/// Walks the chunk list so files with `LIST`/`fact` chunks before `data`
/// are accepted.
pub fn parse_wav(bytes: &[u8]) -> Result<WavContents, AudioError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::InvalidAudioData("missing RIFF/WAVE signature".into()));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(AudioError::InvalidAudioData("truncated fmt chunk".into()));
                }
                let mut code = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bit_depth = u16::from_le_bytes([body[14], body[15]]);
                if code == FORMAT_EXTENSIBLE && body.len() >= 26 {
                    // Sub-format GUID starts with the plain format code.
                    code = u16::from_le_bytes([body[24], body[25]]);
                }
                format = Some((code, channels, sample_rate, bit_depth));
            }
            b"data" => {
                let (code, channels, sample_rate, bit_depth) = format
                    .ok_or_else(|| AudioError::InvalidAudioData("data chunk before fmt chunk".into()))?;
                if channels == 0 || sample_rate == 0 {
                    return Err(AudioError::InvalidAudioData(format!(
                        "unsupported layout: {} channels at {} Hz",
                        channels, sample_rate
                    )));
                }
                let samples = match (code, bit_depth) {
                    (FORMAT_PCM, 16) => sample_convert::pcm16_to_f32(body),
                    (FORMAT_IEEE_FLOAT, 32) => sample_convert::float32_le_to_f32(body),
                    _ => {
                        return Err(AudioError::InvalidAudioData(format!(
                            "unsupported sample format {} at {} bits",
                            code, bit_depth
                        )))
                    }
                };
                return Ok(WavContents {
                    sample_rate,
                    channels,
                    samples,
                });
            }
            _ => {}
        }

        // Chunks are word aligned.
        offset = body_start.saturating_add(size).saturating_add(size % 2);
    }

    Err(AudioError::InvalidAudioData("no data chunk".into()))
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += samples[frame * channels + ch];
        }
        mono.push(sum * scale);
    }
    mono
}
