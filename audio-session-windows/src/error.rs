use thiserror::Error;

use audio_session_core::models::error::AudioError;

/// A failed WASAPI / COM call, before it is folded into `AudioError`.
#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("no audio endpoint available")]
    NoEndpoint,

    #[error("unsupported mix format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl WasapiError {
    pub(crate) fn call(call: &'static str) -> impl FnOnce(windows::core::Error) -> Self {
        move |source| Self::Call { call, source }
    }
}

impl From<WasapiError> for AudioError {
    fn from(e: WasapiError) -> Self {
        match e {
            WasapiError::NoEndpoint => AudioError::DeviceNotAvailable,
            other => AudioError::Unknown(other.to_string()),
        }
    }
}
