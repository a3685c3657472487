//! # audio-session-core
//!
//! Platform-agnostic audio session core library.
//!
//! Arbitrates a single recorder and a single player on a device with one
//! shared audio session, tracks the output route, and keeps the session
//! configured for the app's activity, Bluetooth preference and volume.
//! Platform backends implement the hardware traits and plug into
//! `AudioManager` through an `AudioBackend`.
//!
//! ## Architecture
//!
//! ```text
//! audio-session-core (this crate)
//! ├── traits/       ← AudioSessionHardware, CaptureDevice, OutputDevice, SpeechSynthesizer, delegates
//! ├── models/       ← AudioError, AudioRoute, SessionPolicy, AudioManagerConfiguration, clips
//! ├── processing/   ← CaptureQueue, resampling, WAV encode/parse
//! ├── scheduling/   ← Dispatcher, Timer, DelayedInvocation
//! ├── session/      ← AudioManager, RecordingSession, PlaybackSession, RouteObserver
//! └── backend/      ← AudioBackend bundle, SimulatedHardware
//! ```

pub mod backend;
pub mod models;
pub mod processing;
pub mod scheduling;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backend::simulated::SimulatedHardware;
pub use backend::AudioBackend;
pub use models::audio::{AudioClip, CapturedAudio, RecordingMetadata};
pub use models::config::AudioManagerConfiguration;
pub use models::error::AudioError;
pub use models::policy::{BluetoothMode, SessionActivity, SessionCategory, SessionConfiguration, SessionPolicy, VolumeLevel};
pub use models::route::{AudioRoute, PortDescription, PortType, RouteDescription, RouteSnapshot, AUDIO_ROUTE_CHANGED};
pub use models::state::{AudioRole, PermissionStatus, PlaybackState, RecordingState};
pub use scheduling::delayed::DelayedInvocation;
pub use scheduling::dispatcher::{Dispatcher, MainQueue, ThreadDispatcher};
pub use scheduling::timer::{ManualTimer, ThreadTimer, Timer, TimerHandle};
pub use session::manager::AudioManager;
pub use session::route_observer::ObserverToken;
pub use traits::capture_device::{AudioBufferCallback, CaptureDevice};
pub use traits::delegate::{AudioLogDelegate, RouteChange, RouteChangeObserver};
pub use traits::output_device::OutputDevice;
pub use traits::platform::{Haptics, PermissionPrompt};
pub use traits::session_hardware::{AudioSessionHardware, Interruption, RouteChangeReason};
pub use traits::speech::{SpeechCallback, SpeechSynthesizer};
