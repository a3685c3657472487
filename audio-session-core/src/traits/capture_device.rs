use std::sync::Arc;

use crate::models::error::AudioError;

/// Callback invoked when a captured buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of channels (1 = mono, 2 = stereo interleaved).
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], f64, u16) + Send + Sync + 'static>;

/// Invoked once hardware teardown has finished.
pub type TeardownCallback = Box<dyn FnOnce() + Send + 'static>;

/// Microphone capture.
///
/// Implemented by:
/// - `SimulatedHardware` (this crate)
/// - `WasapiMicCapture` (audio-session-windows)
pub trait CaptureDevice: Send + Sync {
    /// Whether a microphone is present.
    fn is_available(&self) -> bool;

    /// Start capturing, delivering buffers via `callback`.
    ///
    /// The callback fires on a dedicated audio thread; keep processing minimal.
    fn start(&self, callback: AudioBufferCallback) -> Result<(), AudioError>;

    /// Stop capturing. Must return without waiting for the hardware;
    /// `on_stopped` fires once teardown is complete, possibly before this
    /// call returns. Buffers may still arrive until then.
    fn stop(&self, on_stopped: TeardownCallback);
}
