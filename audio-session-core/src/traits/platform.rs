use crate::models::state::PermissionStatus;

/// Haptic feedback played before recording starts.
pub trait Haptics: Send + Sync {
    fn vibrate(&self);
}

/// Invoked once with the user's answer to the record-permission prompt.
pub type PermissionCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Microphone permission prompt.
pub trait PermissionPrompt: Send + Sync {
    /// Answer already on record, without prompting.
    fn status(&self) -> PermissionStatus;

    /// Prompt if needed. `completion` may fire on any thread.
    fn request(&self, completion: PermissionCallback);
}
