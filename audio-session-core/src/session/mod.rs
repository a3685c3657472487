use std::sync::Arc;

pub mod event_log;
pub mod manager;
pub mod playback;
pub mod recording;
pub mod route_observer;

/// Notified on the designated context when a session returns to idle.
pub type IdleHandler = Arc<dyn Fn() + Send + Sync + 'static>;
