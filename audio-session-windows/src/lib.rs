//! # audio-session-windows
//!
//! Windows WASAPI backend for audio-session-kit.
//!
//! Provides:
//! - `WindowsAudioSession`: route detection and endpoint selection (`AudioSessionHardware`)
//! - `WasapiMicCapture`: microphone capture via a WASAPI capture endpoint
//! - `WasapiOutput`: clip playback via a WASAPI render endpoint
//! - `WindowsMicPermission`: Windows microphone privacy check
//! - `DeviceEnumerator`: endpoint enumeration via the MMDevice API
//! - `CaptureThread`: per-stream capture thread and stop flag (all platforms)
//!
//! Speech synthesis is not bundled; the host passes its own
//! `SpeechSynthesizer`, which must answer through its callback rather than
//! render on the calling thread.
//!
//! ## Usage
//! ```ignore
//! use audio_session_core::{AudioManager, AudioManagerConfiguration, ThreadDispatcher, ThreadTimer};
//!
//! let backend = audio_session_windows::backend(
//!     speech,
//!     Arc::new(ThreadDispatcher::new("audio-main")?),
//!     Arc::new(ThreadTimer::new()),
//! )?;
//! let manager = AudioManager::new(backend, AudioManagerConfiguration::default())?;
//! ```

pub mod capture_thread;
pub mod clip_render;
pub mod port_mapping;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod haptics;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod session;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;
#[cfg(target_os = "windows")]
pub mod wasapi_output;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use haptics::NoHaptics;
#[cfg(target_os = "windows")]
pub use permissions::WindowsMicPermission;
#[cfg(target_os = "windows")]
pub use session::{EndpointSelection, WindowsAudioSession};
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiMicCapture;
#[cfg(target_os = "windows")]
pub use wasapi_output::WasapiOutput;

/// Bundle the Windows implementations into an `AudioBackend`. Output and
/// session share one endpoint selection.
#[cfg(target_os = "windows")]
pub fn backend(
    speech: std::sync::Arc<dyn audio_session_core::SpeechSynthesizer>,
    dispatcher: std::sync::Arc<dyn audio_session_core::Dispatcher>,
    timer: std::sync::Arc<dyn audio_session_core::Timer>,
) -> Result<audio_session_core::AudioBackend, audio_session_core::AudioError> {
    use std::sync::Arc;

    let session = WindowsAudioSession::new()?;
    let output = WasapiOutput::new(session.selection());
    Ok(audio_session_core::AudioBackend {
        session: Arc::new(session),
        capture: Arc::new(WasapiMicCapture::default_device()),
        output: Arc::new(output),
        speech,
        haptics: Arc::new(NoHaptics),
        permissions: Arc::new(WindowsMicPermission),
        dispatcher,
        timer,
    })
}
