use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::traits::delegate::AudioLogDelegate;

/// Diagnostic event sink shared by the manager and its sessions.
///
/// Every event goes to the `log` facade and, if one is registered and still
/// alive, to the host's `AudioLogDelegate`.
#[derive(Default)]
pub struct EventLog {
    delegate: Mutex<Option<Weak<dyn AudioLogDelegate>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the delegate. Held weakly; the host keeps it alive.
    pub fn set_delegate(&self, delegate: &Arc<dyn AudioLogDelegate>) {
        *self.delegate.lock() = Some(Arc::downgrade(delegate));
    }

    pub fn clear_delegate(&self) {
        *self.delegate.lock() = None;
    }

    pub fn event(&self, message: &str) {
        log::info!("{}", message);
        self.forward(message);
    }

    /// Like `event`, at warn level.
    pub fn warn(&self, message: &str) {
        log::warn!("{}", message);
        self.forward(message);
    }

    fn forward(&self, message: &str) {
        let delegate = self.delegate.lock().as_ref().and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            delegate.audio_log_event(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<String>>,
    }

    impl AudioLogDelegate for Collector {
        fn audio_log_event(&self, event: &str) {
            self.events.lock().push(event.to_string());
        }
    }

    #[test]
    fn forwards_to_delegate() {
        let log = EventLog::new();
        let collector = Arc::new(Collector::default());
        let delegate: Arc<dyn AudioLogDelegate> = collector.clone();
        log.set_delegate(&delegate);

        log.event("one");
        log.warn("two");

        assert_eq!(*collector.events.lock(), vec!["one", "two"]);
    }

    #[test]
    fn delegate_is_held_weakly() {
        let log = EventLog::new();
        let delegate: Arc<dyn AudioLogDelegate> = Arc::new(Collector::default());
        log.set_delegate(&delegate);
        let weak = Arc::downgrade(&delegate);
        drop(delegate);

        assert!(weak.upgrade().is_none());
        log.event("nobody listening");
    }

    #[test]
    fn cleared_delegate_gets_nothing() {
        let log = EventLog::new();
        let collector = Arc::new(Collector::default());
        let delegate: Arc<dyn AudioLogDelegate> = collector.clone();
        log.set_delegate(&delegate);
        log.clear_delegate();

        log.event("dropped");
        assert!(collector.events.lock().is_empty());
    }
}
