//! Endpoint → `PortType` classification.
//!
//! Pure functions over the strings and integers the MMDevice property store
//! hands back, so they can be tested on any platform.

use std::time::Duration;

use audio_session_core::models::route::{PortDescription, PortType};
use audio_session_core::traits::session_hardware::RouteChangeReason;

/// `PKEY_AudioEndpoint_FormFactor` values (`EndpointFormFactor` in mmdeviceapi.h).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactor {
    RemoteNetworkDevice,
    Speakers,
    LineLevel,
    Headphones,
    Microphone,
    Headset,
    Handset,
    UnknownDigitalPassthrough,
    Spdif,
    DigitalAudioDisplayDevice,
    Unknown,
}

impl FormFactor {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::RemoteNetworkDevice,
            1 => Self::Speakers,
            2 => Self::LineLevel,
            3 => Self::Headphones,
            4 => Self::Microphone,
            5 => Self::Headset,
            6 => Self::Handset,
            7 => Self::UnknownDigitalPassthrough,
            8 => Self::Spdif,
            9 => Self::DigitalAudioDisplayDevice,
            _ => Self::Unknown,
        }
    }
}

/// Classify a render endpoint.
///
/// The bus (`PKEY_Device_EnumeratorName`) wins over the form factor: a USB
/// headset is a USB route, a Bluetooth speaker is a Bluetooth route.
///
/// ```text
/// BTHENUM   + Headset/Handset or "Hands-Free" name → BluetoothHfp
/// BTHENUM                                          → BluetoothA2dp
/// BTHLEENUM                                        → BluetoothLe
/// USB                                              → UsbAudio
/// Speakers                                         → BuiltInSpeaker
/// Handset                                          → BuiltInReceiver
/// Headphones | Headset                             → Headphones
/// LineLevel | SPDIF                                → LineOut
/// DigitalAudioDisplayDevice                        → Hdmi
/// anything else                                    → Unknown(enumerator)
/// ```
pub fn classify_endpoint(enumerator: &str, form_factor: FormFactor, friendly_name: &str) -> PortType {
    let bus = enumerator.to_ascii_uppercase();

    if bus.contains("BTHLEENUM") {
        return PortType::BluetoothLe;
    }
    if bus.contains("BTHENUM") || bus.contains("BTHHFENUM") {
        let hands_free = matches!(form_factor, FormFactor::Headset | FormFactor::Handset)
            || friendly_name.to_ascii_lowercase().contains("hands-free");
        return if hands_free {
            PortType::BluetoothHfp
        } else {
            PortType::BluetoothA2dp
        };
    }
    if bus.contains("USB") {
        return PortType::UsbAudio;
    }

    match form_factor {
        FormFactor::Speakers => PortType::BuiltInSpeaker,
        FormFactor::Handset => PortType::BuiltInReceiver,
        FormFactor::Headphones | FormFactor::Headset => PortType::Headphones,
        FormFactor::LineLevel | FormFactor::Spdif => PortType::LineOut,
        FormFactor::DigitalAudioDisplayDevice => PortType::Hdmi,
        _ => PortType::Unknown(if enumerator.is_empty() {
            "unknown".into()
        } else {
            enumerator.to_string()
        }),
    }
}

/// Build the port description for an endpoint. `device_period` is the
/// engine period reported by `IAudioClient::GetDevicePeriod`, if known; it
/// is added on top of the transport's nominal latency.
pub fn port_from_endpoint(
    id: &str,
    friendly_name: &str,
    enumerator: &str,
    form_factor: FormFactor,
    device_period: Option<Duration>,
) -> PortDescription {
    let port_type = classify_endpoint(enumerator, form_factor, friendly_name);
    let mut port = PortDescription::new(id, friendly_name, port_type);
    if let Some(period) = device_period {
        port.latency += period;
    }
    port
}

/// The port audio actually reaches: the preferred endpoint while it is
/// still connected, otherwise the system default (first in `ports`).
pub fn effective_output<'a>(ports: &'a [PortDescription], preferred: Option<&str>) -> Option<&'a PortDescription> {
    preferred
        .and_then(|uid| ports.iter().find(|p| p.uid == uid))
        .or_else(|| ports.first())
}

/// Why the effective output moved, judged from the endpoint count.
pub fn transition_reason(previous_count: usize, current_count: usize) -> RouteChangeReason {
    match current_count.cmp(&previous_count) {
        std::cmp::Ordering::Greater => RouteChangeReason::NewDeviceAvailable,
        std::cmp::Ordering::Less => RouteChangeReason::OldDeviceUnavailable,
        std::cmp::Ordering::Equal => RouteChangeReason::Override,
    }
}
