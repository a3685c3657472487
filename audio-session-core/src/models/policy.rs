use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::route::{AudioRoute, PortDescription};

/// Whether Bluetooth outputs are preferred when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BluetoothMode {
    #[default]
    Auto,
    On,
    Off,
    #[serde(rename = "hfp")]
    HandsFreeProfile,
}

/// App playback volume. Ordered by loudness: `Mute < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeLevel {
    High,
    #[default]
    Medium,
    Low,
    Mute,
}

impl VolumeLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Mute => "Mute",
        }
    }

    /// Linear gain applied to output samples.
    pub fn gain(&self) -> f32 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.75,
            Self::Low => 0.5,
            Self::Mute => 0.0,
        }
    }

    fn loudness_rank(&self) -> u8 {
        match self {
            Self::Mute => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl PartialOrd for VolumeLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VolumeLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.loudness_rank().cmp(&other.loudness_rank())
    }
}

/// `active`: the app intends to produce audio (e.g. while navigating).
/// `foreground`: the app is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionActivity {
    pub active: bool,
    pub foreground: bool,
}

/// Audio-system-wide role the app claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    /// Session released; other apps own the hardware.
    Inactive,
    /// Mixes with other audio, respects the silent switch.
    Ambient,
    /// Background prompts: ducks other audio while speaking.
    DuckingPlayback,
    /// Foreground navigation: exclusive playback routing.
    ExclusivePlayback,
    /// Microphone open alongside output.
    PlayAndRecord,
}

/// Everything the manager decides about the session, in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionPolicy {
    pub activity: SessionActivity,
    pub bluetooth_mode: BluetoothMode,
    pub volume_level: VolumeLevel,
}

impl SessionPolicy {
    pub fn category(&self, recording: bool) -> SessionCategory {
        if recording {
            return SessionCategory::PlayAndRecord;
        }
        match (self.activity.active, self.activity.foreground) {
            (true, true) => SessionCategory::ExclusivePlayback,
            (true, false) => SessionCategory::DuckingPlayback,
            (false, true) => SessionCategory::Ambient,
            (false, false) => SessionCategory::Inactive,
        }
    }

    pub fn allows_bluetooth(&self) -> bool {
        !matches!(self.bluetooth_mode, BluetoothMode::Off)
    }

    /// HFP is only usable with an open mic, or when explicitly requested.
    pub fn allows_hands_free(&self, recording: bool) -> bool {
        match self.bluetooth_mode {
            BluetoothMode::Off => false,
            BluetoothMode::HandsFreeProfile => true,
            BluetoothMode::Auto | BluetoothMode::On => recording,
        }
    }

    /// Hardware volume buttons drive app volume only while the app is both
    /// active and visible; otherwise they stay on the ringer.
    pub fn volume_buttons_control_app(&self) -> bool {
        self.activity.active && self.activity.foreground
    }

    /// Pick the output this policy wants among the connected ones.
    ///
    /// Falls back to the first built-in speaker, or `None` if the hardware
    /// reported no speaker either.
    pub fn preferred_output<'a>(
        &self,
        recording: bool,
        available: &'a [PortDescription],
    ) -> Option<&'a PortDescription> {
        use OutputClass::*;

        let hfp_allowed = self.allows_hands_free(recording);
        let order: &[OutputClass] = match self.bluetooth_mode {
            BluetoothMode::Auto => &[Usb, Aux, BluetoothMedia, BluetoothHandsFree, Speaker],
            BluetoothMode::On => &[BluetoothMedia, BluetoothHandsFree, Usb, Aux, Speaker],
            BluetoothMode::HandsFreeProfile => &[BluetoothHandsFree, BluetoothMedia, Usb, Aux, Speaker],
            BluetoothMode::Off => &[Usb, Aux, Speaker],
        };

        order.iter().find_map(|class| {
            available
                .iter()
                .find(|port| class.matches(port, hfp_allowed))
        })
    }

    pub fn session_configuration(
        &self,
        recording: bool,
        preferred_output: Option<PortDescription>,
    ) -> SessionConfiguration {
        SessionConfiguration {
            category: self.category(recording),
            allow_bluetooth: self.allows_bluetooth(),
            allow_bluetooth_hfp: self.allows_hands_free(recording),
            volume_buttons_control_app: self.volume_buttons_control_app(),
            preferred_output,
        }
    }
}

/// Buckets used to rank connected outputs.
#[derive(Debug, Clone, Copy)]
enum OutputClass {
    BluetoothMedia,
    BluetoothHandsFree,
    Usb,
    Aux,
    Speaker,
}

impl OutputClass {
    fn matches(&self, port: &PortDescription, hfp_allowed: bool) -> bool {
        match self {
            Self::BluetoothMedia => port.route().is_bluetooth() && !port.port_type.is_hands_free(),
            Self::BluetoothHandsFree => hfp_allowed && port.port_type.is_hands_free(),
            Self::Usb => port.route() == AudioRoute::Usb,
            Self::Aux => port.route() == AudioRoute::Auxiliary,
            Self::Speaker => port.route() == AudioRoute::Speaker,
        }
    }
}

/// What the manager asks the hardware session to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfiguration {
    pub category: SessionCategory,
    pub allow_bluetooth: bool,
    pub allow_bluetooth_hfp: bool,
    pub volume_buttons_control_app: bool,
    pub preferred_output: Option<PortDescription>,
}
