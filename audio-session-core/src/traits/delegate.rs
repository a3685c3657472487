use crate::models::route::{AudioRoute, AUDIO_ROUTE_CHANGED};
use crate::traits::session_hardware::RouteChangeReason;

/// Receives free-text diagnostic events. Not part of any correctness contract.
///
/// Called on the designated context.
pub trait AudioLogDelegate: Send + Sync {
    fn audio_log_event(&self, event: &str);
}

/// Payload of the route-changed broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChange {
    pub previous: AudioRoute,
    pub current: AudioRoute,
    pub route_name: String,
    pub reason: RouteChangeReason,
}

impl RouteChange {
    /// Notification name observers can key on.
    pub const NAME: &'static str = AUDIO_ROUTE_CHANGED;

    pub fn route_type_changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Listener for the route-changed broadcast.
///
/// Called on the designated context, after the manager has updated its
/// own route state.
pub trait RouteChangeObserver: Send + Sync {
    fn audio_route_changed(&self, change: &RouteChange);
}
