use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AudioError;
use super::policy::{BluetoothMode, VolumeLevel};

/// Configuration for an `AudioManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioManagerConfiguration {
    /// Sample rate of the captured buffer in Hz (default: 16000).
    pub capture_sample_rate: f64,

    /// Seconds of audio the capture hand-off queue can hold before dropping
    /// the oldest samples (default: 5).
    pub capture_queue_secs: f64,

    /// Delay between the haptic cue and the start of capture, so the
    /// vibration is not recorded (default: 300 ms).
    pub vibrate_delay_ms: u64,

    /// Cap on a single recording in seconds (None = unlimited).
    pub max_recording_secs: Option<f64>,

    pub initial_volume_level: VolumeLevel,

    pub initial_bluetooth_mode: BluetoothMode,
}

impl AudioManagerConfiguration {
    pub fn validate(&self) -> Result<(), AudioError> {
        if !(self.capture_sample_rate > 0.0) {
            return Err(AudioError::ConfigurationInvalid(
                "capture sample rate must be positive".into(),
            ));
        }
        if !(self.capture_queue_secs > 0.0) {
            return Err(AudioError::ConfigurationInvalid(
                "capture queue length must be positive".into(),
            ));
        }
        if let Some(max) = self.max_recording_secs {
            if !(max > 0.0) {
                return Err(AudioError::ConfigurationInvalid(format!(
                    "max recording duration must be positive, got {}",
                    max
                )));
            }
        }
        Ok(())
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, AudioError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AudioError::ConfigurationInvalid(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn vibrate_delay(&self) -> Duration {
        Duration::from_millis(self.vibrate_delay_ms)
    }

    pub(crate) fn capture_queue_capacity(&self) -> usize {
        (self.capture_sample_rate * self.capture_queue_secs) as usize
    }

    pub(crate) fn max_recording_samples(&self) -> Option<usize> {
        self.max_recording_secs
            .map(|secs| (secs * self.capture_sample_rate) as usize)
    }

    pub(crate) fn capture_rate_hz(&self) -> u32 {
        self.capture_sample_rate.round() as u32
    }
}

impl Default for AudioManagerConfiguration {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000.0,
            capture_queue_secs: 5.0,
            vibrate_delay_ms: 300,
            max_recording_secs: None,
            initial_volume_level: VolumeLevel::Medium,
            initial_bluetooth_mode: BluetoothMode::Auto,
        }
    }
}
