//! Render and capture endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` and turns each active render endpoint into a
//! `PortDescription` using the classification in `port_mapping`.

use std::time::Duration;

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::{PropVariantClear, PROPVARIANT};
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use audio_session_core::models::route::PortDescription;

use crate::error::WasapiError;
use crate::port_mapping::{port_from_endpoint, FormFactor};

/// Endpoint enumerator. Requires COM on the calling thread (see `ComScope`).
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> std::result::Result<Self, WasapiError> {
        let enumerator: IMMDeviceEnumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(WasapiError::call("CoCreateInstance(MMDeviceEnumerator)"))?;
        Ok(Self { enumerator })
    }

    /// Every active output endpoint, default first.
    pub fn render_ports(&self) -> std::result::Result<Vec<PortDescription>, WasapiError> {
        let default_id = self.default_render_id().ok();
        let collection = unsafe { self.enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
            .map_err(WasapiError::call("EnumAudioEndpoints"))?;
        let count = unsafe { collection.GetCount() }.map_err(WasapiError::call("GetCount"))?;

        let mut ports = Vec::with_capacity(count as usize);
        for i in 0..count {
            let Ok(device) = (unsafe { collection.Item(i) }) else {
                continue;
            };
            match Self::describe(&device) {
                Some(port) if default_id.as_deref() == Some(port.uid.as_str()) => ports.insert(0, port),
                Some(port) => ports.push(port),
                None => log::debug!("Skipping render endpoint {} with no id", i),
            }
        }
        Ok(ports)
    }

    /// The endpoint Windows currently routes console audio to.
    pub fn default_render_port(&self) -> std::result::Result<PortDescription, WasapiError> {
        let device = unsafe { self.enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(|_| WasapiError::NoEndpoint)?;
        Self::describe(&device).ok_or(WasapiError::NoEndpoint)
    }

    pub fn default_render_id(&self) -> std::result::Result<String, WasapiError> {
        let device = unsafe { self.enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(|_| WasapiError::NoEndpoint)?;
        device_id(&device).ok_or(WasapiError::NoEndpoint)
    }

    pub fn has_capture_device(&self) -> bool {
        unsafe { self.enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) }.is_ok()
    }

    /// A render endpoint by id, or the default one when `id` is `None`.
    pub fn render_device(&self, id: Option<&str>) -> std::result::Result<IMMDevice, WasapiError> {
        self.device(eRender, id)
    }

    pub fn capture_device(&self, id: Option<&str>) -> std::result::Result<IMMDevice, WasapiError> {
        self.device(eCapture, id)
    }

    fn device(&self, flow: EDataFlow, id: Option<&str>) -> std::result::Result<IMMDevice, WasapiError> {
        unsafe {
            match id {
                Some(id) => {
                    let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    self.enumerator
                        .GetDevice(PCWSTR(wide.as_ptr()))
                        .map_err(|_| WasapiError::NoEndpoint)
                }
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(flow, eConsole)
                    .map_err(|_| WasapiError::NoEndpoint),
            }
        }
    }

    fn describe(device: &IMMDevice) -> Option<PortDescription> {
        let id = device_id(device)?;
        let store = unsafe { device.OpenPropertyStore(STGM_READ) }.ok();
        let name = store
            .as_ref()
            .and_then(|s| read_string(s, &PKEY_Device_FriendlyName))
            .unwrap_or_else(|| "Audio Output".into());
        let enumerator = store
            .as_ref()
            .and_then(|s| read_string(s, &PKEY_Device_EnumeratorName))
            .unwrap_or_default();
        let form_factor = store
            .as_ref()
            .and_then(|s| read_u32(s, &PKEY_AudioEndpoint_FormFactor))
            .map(FormFactor::from_raw)
            .unwrap_or(FormFactor::Unknown);

        Some(port_from_endpoint(&id, &name, &enumerator, form_factor, device_period(device)))
    }
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        let text = id.to_string().ok();
        CoTaskMemFree(Some(id.0 as *const _));
        text
    }
}

/// Default engine period; `GetDevicePeriod` reports 100 ns units.
fn device_period(device: &IMMDevice) -> Option<Duration> {
    unsafe {
        let client: IAudioClient = device.Activate(CLSCTX_ALL, None).ok()?;
        let mut default_period = 0i64;
        client.GetDevicePeriod(Some(&mut default_period), None).ok()?;
        Some(Duration::from_nanos(default_period.max(0) as u64 * 100))
    }
}

fn read_string(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
    unsafe {
        let mut value: PROPVARIANT = store.GetValue(key).ok()?;
        let text = if value.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = value.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                None
            } else {
                pwsz.to_string().ok()
            }
        } else {
            None
        };
        PropVariantClear(&mut value).ok();
        text
    }
}

fn read_u32(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<u32> {
    unsafe {
        let mut value: PROPVARIANT = store.GetValue(key).ok()?;
        let number = (value.Anonymous.Anonymous.vt == VT_UI4).then(|| value.Anonymous.Anonymous.Anonymous.ulVal);
        PropVariantClear(&mut value).ok();
        number
    }
}
