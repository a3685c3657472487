//! Clip → endpoint-format conversion for the render path.

use audio_session_core::models::audio::AudioClip;
use audio_session_core::processing::sample_convert::Resampler;
use audio_session_core::processing::wav_format::downmix_to_mono;

/// Interleaved Float32 frames at the endpoint's mix rate and channel count.
///
/// Prompts and speech are mono in practice, so the clip is downmixed,
/// resampled, then copied to every output channel.
pub fn to_mix_format(clip: &AudioClip, mix_rate: u32, mix_channels: u16) -> Vec<f32> {
    let mono = downmix_to_mono(clip.samples(), clip.channels() as usize);
    let resampled = Resampler::new(mix_rate as f64).resample(&mono, clip.sample_rate() as f64);
    let channels = mix_channels.max(1) as usize;

    let mut out = Vec::with_capacity(resampled.len() * channels);
    for sample in resampled {
        out.extend(std::iter::repeat(sample).take(channels));
    }
    out
}

/// Copy `source` into `dest` scaled by `gain`.
pub fn write_scaled(dest: &mut [f32], source: &[f32], gain: f32) {
    for (d, s) in dest.iter_mut().zip(source) {
        *d = s * gain;
    }
}
