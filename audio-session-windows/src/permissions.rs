//! Windows microphone privacy permission.
//!
//! Access is governed by Settings > Privacy > Microphone. Unpackaged
//! desktop apps get no consent dialog: the toggle is either on or off, so
//! `request` reports the current answer instead of prompting.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_session_core::models::state::PermissionStatus;
use audio_session_core::traits::platform::{PermissionCallback, PermissionPrompt};

use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;

/// Check if microphone access is available.
///
/// Activates an `IAudioClient` on the default capture endpoint. Access
/// denied or device-in-use means the privacy toggle is off (or another app
/// holds the mic exclusively); no capture endpoint at all also reads as no.
pub fn check_microphone_permission() -> Result<bool, WasapiError> {
    let _com = ComScope::enter()?;
    let device = match DeviceEnumerator::new()?.capture_device(None) {
        Ok(device) => device,
        Err(_) => return Ok(false),
    };

    let result: windows::core::Result<IAudioClient> = unsafe { device.Activate(CLSCTX_ALL, None) };
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.code() == E_ACCESSDENIED || e.code() == AUDCLNT_E_DEVICE_IN_USE => Ok(false),
        Err(e) => {
            log::warn!("Unexpected error checking mic permission: {}", e);
            Ok(true)
        }
    }
}

#[derive(Debug, Default)]
pub struct WindowsMicPermission;

impl PermissionPrompt for WindowsMicPermission {
    fn status(&self) -> PermissionStatus {
        match check_microphone_permission() {
            Ok(granted) => PermissionStatus::from_granted(granted),
            Err(e) => {
                log::warn!("Mic permission check failed: {}", e);
                PermissionStatus::Undetermined
            }
        }
    }

    fn request(&self, completion: PermissionCallback) {
        let granted = self.status().is_granted();
        if !granted {
            log::info!("Microphone access is off in Windows privacy settings");
        }
        completion(granted);
    }
}
