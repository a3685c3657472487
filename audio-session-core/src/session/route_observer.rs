use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::route::{AudioRoute, RouteSnapshot};
use crate::scheduling::delayed::DelayedInvocation;
use crate::session::event_log::EventLog;
use crate::traits::delegate::{RouteChange, RouteChangeObserver};
use crate::traits::session_hardware::{AudioSessionHardware, RouteChangeReason};

/// Identifies a registered route observer for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// Tracks the confirmed hardware route and broadcasts transitions.
///
/// ```text
/// [hardware thread] ──reason──→ [Dispatcher] ──→ re-read route ──→ observers (in registration order)
/// ```
pub struct RouteObserver {
    hardware: Arc<dyn AudioSessionHardware>,
    log: Arc<EventLog>,
    last: Mutex<RouteSnapshot>,
    observers: Mutex<Vec<(ObserverToken, Arc<dyn RouteChangeObserver>)>>,
    next_token: AtomicU64,
    listening: AtomicBool,
}

impl RouteObserver {
    pub fn new(hardware: Arc<dyn AudioSessionHardware>, log: Arc<EventLog>) -> Self {
        Self {
            hardware,
            log,
            last: Mutex::new(RouteSnapshot::unknown()),
            observers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            listening: AtomicBool::new(false),
        }
    }

    /// Classify the route the hardware reports right now.
    ///
    /// A failed read is `Other`; route classification never blocks audio.
    pub fn current_route(&self) -> AudioRoute {
        self.read().route
    }

    /// The route as of the last transition or refresh.
    pub fn last_confirmed(&self) -> RouteSnapshot {
        self.last.lock().clone()
    }

    /// Re-read the hardware and record the result without broadcasting.
    pub fn refresh(&self) -> RouteSnapshot {
        let snapshot = self.read();
        *self.last.lock() = snapshot.clone();
        snapshot
    }

    pub fn add_observer(&self, observer: Arc<dyn RouteChangeObserver>) -> ObserverToken {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((token, observer));
        token
    }

    /// Returns false if the token was not registered.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(t, _)| *t != token);
        observers.len() != before
    }

    /// Install the hardware listener. Idempotent.
    pub fn start(self: &Arc<Self>, delayed: &DelayedInvocation) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let delayed = delayed.clone();
        self.hardware
            .set_route_change_listener(Some(Arc::new(move |reason: RouteChangeReason| {
                let Some(observer) = weak.upgrade() else {
                    return;
                };
                delayed.perform_on_main(&observer, move |observer| observer.handle_hardware_change(reason));
            })));
    }

    /// Remove the hardware listener.
    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.hardware.set_route_change_listener(None);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn read(&self) -> RouteSnapshot {
        match self.hardware.current_route() {
            Ok(route) => route.snapshot(),
            Err(e) => {
                self.log
                    .warn(&format!("Could not read audio route ({}); treating as {}", e, AudioRoute::Other));
                RouteSnapshot::unknown()
            }
        }
    }

    fn handle_hardware_change(&self, reason: RouteChangeReason) {
        let current = self.read();
        let previous = std::mem::replace(&mut *self.last.lock(), current.clone());

        self.log.event(&format!(
            "Audio route changed: {} -> {} \"{}\" ({:?})",
            previous.route, current.route, current.name, reason
        ));

        let change = RouteChange {
            previous: previous.route,
            current: current.route,
            route_name: current.name,
            reason,
        };

        let observers: Vec<Arc<dyn RouteChangeObserver>> =
            self.observers.lock().iter().map(|(_, o)| Arc::clone(o)).collect();
        for observer in observers {
            observer.audio_route_changed(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedHardware;
    use crate::models::route::{PortDescription, PortType};
    use crate::scheduling::dispatcher::MainQueue;
    use crate::scheduling::timer::ManualTimer;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<RouteChange>>,
    }

    impl RouteChangeObserver for Recorder {
        fn audio_route_changed(&self, change: &RouteChange) {
            self.changes.lock().push(change.clone());
        }
    }

    struct Fixture {
        hw: Arc<SimulatedHardware>,
        queue: Arc<MainQueue>,
        observer: Arc<RouteObserver>,
    }

    fn fixture() -> Fixture {
        let hw = SimulatedHardware::new();
        let queue = Arc::new(MainQueue::new());
        let delayed = DelayedInvocation::new(Arc::new(ManualTimer::new()), queue.clone());
        let observer = Arc::new(RouteObserver::new(hw.clone(), Arc::new(EventLog::new())));
        observer.refresh();
        observer.start(&delayed);
        Fixture { hw, queue, observer }
    }

    #[test]
    fn classifies_current_route() {
        let f = fixture();
        assert_eq!(f.observer.current_route(), AudioRoute::Speaker);

        f.hw.connect_output(PortDescription::new("usb", "Interface", PortType::UsbAudio));
        assert_eq!(f.observer.current_route(), AudioRoute::Usb);
    }

    #[test]
    fn read_failure_is_other() {
        let f = fixture();
        f.hw.set_route_readable(false);
        assert_eq!(f.observer.current_route(), AudioRoute::Other);
        assert_eq!(f.observer.refresh(), RouteSnapshot::unknown());
    }

    #[test]
    fn hardware_change_is_redispatched_then_broadcast() {
        let f = fixture();
        let recorder = Arc::new(Recorder::default());
        f.observer.add_observer(recorder.clone());

        f.hw.connect_output(PortDescription::new("bt", "Buds", PortType::BluetoothLe));
        assert!(recorder.changes.lock().is_empty(), "delivered only on the dispatcher");
        assert_eq!(f.observer.last_confirmed().route, AudioRoute::Speaker);

        f.queue.run_pending();

        let changes = recorder.changes.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous, AudioRoute::Speaker);
        assert_eq!(changes[0].current, AudioRoute::Bluetooth);
        assert_eq!(changes[0].route_name, "Buds");
        assert_eq!(changes[0].reason, RouteChangeReason::NewDeviceAvailable);
        assert!(changes[0].route_type_changed());
        assert_eq!(f.observer.last_confirmed().name, "Buds");
    }

    #[test]
    fn removed_observer_is_not_called() {
        let f = fixture();
        let recorder = Arc::new(Recorder::default());
        let token = f.observer.add_observer(recorder.clone());

        assert!(f.observer.remove_observer(token));
        assert!(!f.observer.remove_observer(token));

        f.hw.emit_route_change(RouteChangeReason::Unknown);
        f.queue.run_pending();
        assert!(recorder.changes.lock().is_empty());
    }

    #[test]
    fn observers_run_in_registration_order() {
        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl RouteChangeObserver for Tagged {
            fn audio_route_changed(&self, _: &RouteChange) {
                self.1.lock().push(self.0);
            }
        }

        let f = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));
        f.observer.add_observer(Arc::new(Tagged("first", order.clone())));
        f.observer.add_observer(Arc::new(Tagged("second", order.clone())));

        f.hw.emit_route_change(RouteChangeReason::Override);
        f.queue.run_pending();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn dropped_observer_ignores_late_events() {
        let f = fixture();
        f.hw.emit_route_change(RouteChangeReason::Unknown);
        let weak = Arc::downgrade(&f.observer);
        drop(f.observer);

        assert!(weak.upgrade().is_none());
        f.queue.run_pending();
        f.hw.emit_route_change(RouteChangeReason::Unknown);
        assert_eq!(f.queue.run_pending(), 0);
    }

    #[test]
    fn stop_uninstalls_listener() {
        let f = fixture();
        assert!(f.hw.has_route_listener());
        f.observer.stop();
        assert!(!f.hw.has_route_listener());
        assert!(!f.observer.is_listening());
    }
}
