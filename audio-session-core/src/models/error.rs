use thiserror::Error;

/// Errors raised by the audio hardware layer and the clip parsers.
///
/// None of these cross the `AudioManager` boundary: the manager turns them
/// into a `false` return, a `false` completion, an empty buffer or a log line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("record permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("session configuration failed: {0}")]
    SessionConfigurationFailed(String),

    #[error("capture start failed: {0}")]
    CaptureStartFailed(String),

    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    #[error("playback interrupted")]
    PlaybackInterrupted,

    #[error("speech synthesis failed: {0}")]
    SpeechSynthesisFailed(String),

    #[error("invalid audio data: {0}")]
    InvalidAudioData(String),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}
