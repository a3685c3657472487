use serde::{Deserialize, Serialize};

/// Recording lifecycle.
///
/// State transitions:
/// ```text
/// idle → awaiting_permission → idle
/// idle → preparing (vibrate-first delay) → recording
/// idle → recording → idle
///                  → stopped_with_pending_completion → idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    AwaitingPermission,
    Preparing,
    Recording,
    StoppedWithPendingCompletion,
}

impl RecordingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// A recording request was accepted and has not been stopped.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Preparing | Self::Recording)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// The manager's single "current audio role". Recording and playing are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRole {
    #[default]
    Idle,
    Recording,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    #[default]
    Undetermined,
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}
