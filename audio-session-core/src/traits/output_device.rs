use std::time::Duration;

use crate::models::audio::AudioClip;
use crate::models::error::AudioError;

/// Invoked once when output of a clip ends: `true` if it played to the end.
pub type OutputFinishedCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Audio output for one clip at a time.
///
/// Implemented by:
/// - `SimulatedHardware` (this crate)
/// - `WasapiOutput` (audio-session-windows)
pub trait OutputDevice: Send + Sync {
    /// Begin playing `clip` scaled by `gain`. `on_finished` may fire on any
    /// thread; after `stop` it may fire with `false` or not at all.
    fn start(&self, clip: &AudioClip, gain: f32, on_finished: OutputFinishedCallback) -> Result<(), AudioError>;

    /// Stop the current clip, if any.
    fn stop(&self);

    /// Change the gain of the clip in flight.
    fn set_gain(&self, gain: f32);

    /// Playback position within the current clip.
    fn position(&self) -> Duration;
}
