use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the broadcast raised whenever the hardware reports a route transition.
pub const AUDIO_ROUTE_CHANGED: &str = "AudioManagerAudioRouteChanged";

/// Category of the output path audio currently takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioRoute {
    Speaker,
    Bluetooth,
    Usb,
    #[serde(rename = "aux")]
    Auxiliary,
    #[default]
    Other,
}

impl AudioRoute {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Speaker => "Speaker",
            Self::Bluetooth => "Bluetooth",
            Self::Usb => "USB",
            Self::Auxiliary => "AUX",
            Self::Other => "Other",
        }
    }

    pub fn is_bluetooth(&self) -> bool {
        matches!(self, Self::Bluetooth)
    }
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Platform output-port identifiers.
///
/// Backends translate their native port enumeration into this set; anything
/// they cannot name goes into `Unknown` with the raw identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortType {
    BuiltInSpeaker,
    BuiltInReceiver,
    Headphones,
    LineOut,
    Hdmi,
    AirPlay,
    CarAudio,
    BluetoothA2dp,
    BluetoothHfp,
    BluetoothLe,
    UsbAudio,
    Unknown(String),
}

impl PortType {
    /// Classify a port into its route category.
    ///
    /// ```text
    /// BluetoothA2dp | BluetoothHfp | BluetoothLe → Bluetooth
    /// UsbAudio                                  → Usb
    /// Headphones | LineOut                      → Auxiliary
    /// BuiltInSpeaker | BuiltInReceiver          → Speaker
    /// Hdmi | AirPlay | CarAudio | Unknown       → Other
    /// ```
    pub fn route(&self) -> AudioRoute {
        match self {
            Self::BluetoothA2dp | Self::BluetoothHfp | Self::BluetoothLe => AudioRoute::Bluetooth,
            Self::UsbAudio => AudioRoute::Usb,
            Self::Headphones | Self::LineOut => AudioRoute::Auxiliary,
            Self::BuiltInSpeaker | Self::BuiltInReceiver => AudioRoute::Speaker,
            Self::Hdmi | Self::AirPlay | Self::CarAudio | Self::Unknown(_) => AudioRoute::Other,
        }
    }

    /// Hands-free profile ports trade audio quality for a duplex mic link.
    pub fn is_hands_free(&self) -> bool {
        matches!(self, Self::BluetoothHfp)
    }

    /// Typical output latency for the transport, used when the hardware
    /// does not report one.
    pub fn nominal_latency(&self) -> Duration {
        match self {
            Self::BuiltInSpeaker | Self::BuiltInReceiver => Duration::from_millis(10),
            Self::Headphones | Self::LineOut => Duration::from_millis(5),
            Self::UsbAudio => Duration::from_millis(15),
            Self::Hdmi => Duration::from_millis(40),
            Self::BluetoothHfp => Duration::from_millis(120),
            Self::BluetoothA2dp | Self::BluetoothLe => Duration::from_millis(180),
            Self::AirPlay => Duration::from_millis(2000),
            Self::CarAudio => Duration::from_millis(60),
            Self::Unknown(_) => Duration::from_millis(20),
        }
    }
}

/// One output port as reported by the hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescription {
    pub uid: String,
    pub name: String,
    pub port_type: PortType,
    pub latency: Duration,
}

impl PortDescription {
    /// Port with the nominal latency of its transport.
    pub fn new(uid: impl Into<String>, name: impl Into<String>, port_type: PortType) -> Self {
        let latency = port_type.nominal_latency();
        Self {
            uid: uid.into(),
            name: name.into(),
            port_type,
            latency,
        }
    }

    pub fn built_in_speaker() -> Self {
        Self::new("built-in-speaker", "Speaker", PortType::BuiltInSpeaker)
    }

    pub fn route(&self) -> AudioRoute {
        self.port_type.route()
    }
}

/// The set of outputs the hardware is currently routing to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteDescription {
    pub outputs: Vec<PortDescription>,
}

impl RouteDescription {
    pub fn new(outputs: Vec<PortDescription>) -> Self {
        Self { outputs }
    }

    pub fn primary_output(&self) -> Option<&PortDescription> {
        self.outputs.first()
    }

    pub fn classify(&self) -> AudioRoute {
        self.primary_output()
            .map(PortDescription::route)
            .unwrap_or(AudioRoute::Other)
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        match self.primary_output() {
            Some(port) => RouteSnapshot::from_port(port),
            None => RouteSnapshot::unknown(),
        }
    }
}

/// Route as tracked by the manager: either the confirmed hardware route or
/// the one it intends to establish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub route: AudioRoute,
    pub name: String,
    pub latency: Duration,
}

impl RouteSnapshot {
    pub fn from_port(port: &PortDescription) -> Self {
        Self {
            route: port.route(),
            name: port.name.clone(),
            latency: port.latency,
        }
    }

    /// What a failed hardware read degrades to.
    pub fn unknown() -> Self {
        Self {
            route: AudioRoute::Other,
            name: "Unknown".into(),
            latency: Duration::ZERO,
        }
    }
}

impl Default for RouteSnapshot {
    fn default() -> Self {
        Self::unknown()
    }
}
