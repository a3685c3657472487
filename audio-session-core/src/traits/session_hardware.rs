use std::sync::Arc;

use crate::models::error::AudioError;
use crate::models::policy::SessionConfiguration;
use crate::models::route::{PortDescription, RouteDescription};

/// Why the hardware changed the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Unknown,
}

/// Another app or the system took the audio hardware away, or gave it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interruption {
    Began,
    Ended { should_resume: bool },
}

/// Invoked on a hardware notification thread whenever the route changes.
pub type RouteChangeCallback = Arc<dyn Fn(RouteChangeReason) + Send + Sync + 'static>;

/// Invoked on a hardware notification thread when an interruption begins or ends.
pub type InterruptionCallback = Arc<dyn Fn(Interruption) + Send + Sync + 'static>;

/// The platform's shared audio session.
///
/// Implemented by:
/// - `SimulatedHardware` (this crate)
/// - `WindowsAudioSession` (audio-session-windows)
pub trait AudioSessionHardware: Send + Sync {
    /// Apply a category and route preference. The hardware may refuse, in
    /// which case the route stays where it was.
    fn configure(&self, config: &SessionConfiguration) -> Result<(), AudioError>;

    /// Outputs audio is currently routed to.
    fn current_route(&self) -> Result<RouteDescription, AudioError>;

    /// Outputs that are connected and could be routed to.
    fn available_outputs(&self) -> Result<Vec<PortDescription>, AudioError>;

    /// Install (or with `None`, remove) the route-change listener.
    fn set_route_change_listener(&self, listener: Option<RouteChangeCallback>);

    /// Install (or with `None`, remove) the interruption listener.
    fn set_interruption_listener(&self, listener: Option<InterruptionCallback>);
}
