use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::AudioError;
use crate::processing::{sample_convert, wav_format};

/// A finite piece of audio handed to the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioClip {
    /// Interleaved f32 samples at `sample_rate` with `channels` channels.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidAudioData("sample rate must be positive".into()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidAudioData("channel count must be positive".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Raw 16-bit little-endian PCM.
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        Self::new(sample_convert::pcm16_to_f32(bytes), sample_rate, channels)
    }

    /// A RIFF/WAVE byte image (16-bit PCM or 32-bit float).
    pub fn from_wav(bytes: &[u8]) -> Result<Self, AudioError> {
        let contents = wav_format::parse_wav(bytes)?;
        Self::new(contents.samples, contents.sample_rate, contents.channels)
    }

    /// Mono silence of the given length.
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames],
            sample_rate: sample_rate.max(1),
            channels: 1,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn to_pcm16(&self) -> Vec<u8> {
        sample_convert::f32_to_pcm16(&self.samples)
    }
}

/// Audio accumulated by one recording, handed out by value on stop.
///
/// Mono, at the configured capture rate.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl CapturedAudio {
    pub(crate) fn new(
        id: Uuid,
        started_at: DateTime<Utc>,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Self {
        Self {
            id: Some(id),
            started_at: Some(started_at),
            samples,
            sample_rate,
        }
    }

    /// What a stop returns when nothing was recording.
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            id: None,
            started_at: None,
            samples: Vec::new(),
            sample_rate,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// 16-bit little-endian PCM bytes.
    pub fn to_pcm16(&self) -> Vec<u8> {
        sample_convert::f32_to_pcm16(&self.samples)
    }

    /// 44-byte WAV header followed by the PCM16 data.
    pub fn to_wav(&self) -> Vec<u8> {
        wav_format::encode_pcm16_wav(&self.samples, self.sample_rate, 1)
    }

    /// Descriptive metadata, or `None` for an empty stop result.
    pub fn metadata(&self) -> Option<RecordingMetadata> {
        let id = self.id?;
        let created_at = self.started_at?;
        let digest = Sha256::digest(self.to_pcm16());
        Some(RecordingMetadata {
            id: id.to_string(),
            created_at: created_at.to_rfc3339(),
            duration_secs: self.duration().as_secs_f64(),
            sample_rate: self.sample_rate,
            channels: 1,
            checksum: hex_encode(&digest),
        })
    }
}

/// Serializable description of a recording, for host-side logging or upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub created_at: String,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// SHA-256 of the PCM16 bytes.
    pub checksum: String,
}

impl RecordingMetadata {
    pub fn to_json(&self) -> Result<String, AudioError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AudioError::Unknown(format!("failed to serialize metadata: {}", e)))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
