use audio_session_core::traits::platform::Haptics;

/// Desktops have no vibration motor; the cue is logged and skipped.
#[derive(Debug, Default)]
pub struct NoHaptics;

impl Haptics for NoHaptics {
    fn vibrate(&self) {
        log::debug!("Haptic cue requested; no motor on this device");
    }
}
