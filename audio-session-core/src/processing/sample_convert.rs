//! Sample-format helpers shared by the capture and playback paths.
//!
//! Everything here works on `&[f32]` buffers in `[-1.0, 1.0]` with no
//! platform dependencies.

/// Linear-interpolation resampler for mono audio.
///
/// The capture callback uses this to bring whatever rate the microphone
/// negotiated (48 kHz, 44.1 kHz, 16 kHz on Bluetooth HFP) down to the
/// configured capture rate.
#[derive(Debug, Clone)]
pub struct Resampler {
    pub target_sample_rate: f64,
}

impl Resampler {
    pub fn new(target_sample_rate: f64) -> Self {
        Self { target_sample_rate }
    }

    /// Resample from `source_sample_rate` to `self.target_sample_rate`.
    /// Returns input unchanged if rates match.
    pub fn resample(&self, samples: &[f32], source_sample_rate: f64) -> Vec<f32> {
        if (source_sample_rate - self.target_sample_rate).abs() < 0.01 || samples.is_empty() {
            return samples.to_vec();
        }

        let ratio = self.target_sample_rate / source_sample_rate;
        let output_count = (samples.len() as f64 * ratio) as usize;
        if output_count == 0 {
            return Vec::new();
        }

        let mut output = vec![0.0f32; output_count];
        for (i, sample) in output.iter_mut().enumerate() {
            let source_index = i as f64 / ratio;
            let index = source_index as usize;
            let fraction = (source_index - index as f64) as f32;

            if index + 1 < samples.len() {
                *sample = samples[index] * (1.0 - fraction) + samples[index + 1] * fraction;
            } else if index < samples.len() {
                *sample = samples[index];
            }
        }
        output
    }
}

/// Convert f32 samples to 16-bit little-endian PCM, clamping out-of-range values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Convert 16-bit little-endian PCM to f32. A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Convert 32-bit little-endian float PCM to f32.
pub fn float32_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect()
}

/// RMS level of samples (0.0–1.0 for normalized audio).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pcm16_full_scale_and_clamp() {
        let pcm = f32_to_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(pcm.len(), 8);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
    }

    #[test]
    fn pcm16_decode_ignores_odd_byte() {
        let bytes = [0xFF, 0x7F, 0x00];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 1);
        assert_relative_eq!(samples[0], 1.0);
    }

    #[test]
    fn float32_decode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.5f32).to_le_bytes());
        assert_eq!(float32_le_to_f32(&bytes), vec![0.25, -0.5]);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let resampler = Resampler::new(16000.0);
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resampler.resample(&samples, 16000.0), samples);
    }

    #[test]
    fn resample_downsample_halves_length() {
        let resampler = Resampler::new(16000.0);
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        assert_eq!(resampler.resample(&samples, 32000.0).len(), 240);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampler = Resampler::new(32000.0);
        let result = resampler.resample(&[0.0, 1.0], 16000.0);
        assert_eq!(result.len(), 4);
        assert_relative_eq!(result[1], 0.5, epsilon = 0.01);
    }

    #[test]
    fn levels() {
        assert_eq!(rms_level(&[]), 0.0);
        assert_relative_eq!(rms_level(&[1.0, -1.0, 1.0]), 1.0);
        assert_relative_eq!(peak_level(&[0.1, -0.5, 0.3]), 0.5);
    }
}
