//! `AudioSessionHardware` for Windows.
//!
//! Desktop Windows has no app-wide session category, and apps cannot move
//! the system default endpoint. The session therefore routes by *selection*:
//! `configure` records the preferred endpoint in an `EndpointSelection`
//! shared with `WasapiOutput`, and the route reported back is the endpoint
//! output will actually open. A watcher thread polls the endpoint list and
//! raises route-change events when that endpoint moves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use audio_session_core::models::error::AudioError;
use audio_session_core::models::policy::SessionConfiguration;
use audio_session_core::models::route::{PortDescription, RouteDescription};
use audio_session_core::traits::session_hardware::{
    AudioSessionHardware, Interruption, InterruptionCallback, RouteChangeCallback, RouteChangeReason,
};

use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;
use crate::port_mapping::{effective_output, transition_reason};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_STEP: Duration = Duration::from_millis(50);

/// The render endpoint the app wants, shared between session and output.
#[derive(Clone, Default)]
pub struct EndpointSelection(Arc<Mutex<Option<String>>>);

impl EndpointSelection {
    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    fn set(&self, uid: Option<String>) {
        *self.0.lock() = uid;
    }
}

/// What the watcher compares between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteSignature {
    endpoint_count: usize,
    effective: Option<String>,
}

struct SessionShared {
    selection: EndpointSelection,
    config: Mutex<Option<SessionConfiguration>>,
    last_seen: Mutex<Option<RouteSignature>>,
    route_listener: Mutex<Option<RouteChangeCallback>>,
    interruption_listener: Mutex<Option<InterruptionCallback>>,
}

impl SessionShared {
    fn ports(&self) -> Result<Vec<PortDescription>, WasapiError> {
        let _com = ComScope::enter()?;
        DeviceEnumerator::new()?.render_ports()
    }

    fn signature(&self, ports: &[PortDescription]) -> RouteSignature {
        let preferred = self.selection.get();
        RouteSignature {
            endpoint_count: ports.len(),
            effective: effective_output(ports, preferred.as_deref()).map(|p| p.uid.clone()),
        }
    }

    /// Record `current`; returns the reason to report if the effective
    /// endpoint moved since the last look.
    fn observe(&self, current: RouteSignature, reason: Option<RouteChangeReason>) -> Option<RouteChangeReason> {
        let mut last = self.last_seen.lock();
        let previous = last.replace(current.clone());
        match previous {
            Some(previous) if previous.effective != current.effective => {
                Some(reason.unwrap_or_else(|| transition_reason(previous.endpoint_count, current.endpoint_count)))
            }
            _ => None,
        }
    }

    fn emit_route_change(&self, reason: RouteChangeReason) {
        let listener = self.route_listener.lock().clone();
        if let Some(listener) = listener {
            listener(reason);
        }
    }

    fn poll(&self) {
        match self.ports() {
            Ok(ports) => {
                let signature = self.signature(&ports);
                if let Some(reason) = self.observe(signature, None) {
                    log::info!("Render endpoint changed ({:?})", reason);
                    self.emit_route_change(reason);
                }
            }
            Err(e) => log::debug!("Route poll failed: {}", e),
        }
    }
}

/// Windows session hardware. Spawns the route watcher on construction and
/// joins it on drop.
pub struct WindowsAudioSession {
    shared: Arc<SessionShared>,
    running: Arc<AtomicBool>,
    watcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WindowsAudioSession {
    pub fn new() -> Result<Self, AudioError> {
        let shared = Arc::new(SessionShared {
            selection: EndpointSelection::default(),
            config: Mutex::new(None),
            last_seen: Mutex::new(None),
            route_listener: Mutex::new(None),
            interruption_listener: Mutex::new(None),
        });
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("wasapi-route-watch".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        shared.poll();
                        let mut waited = Duration::ZERO;
                        while waited < POLL_INTERVAL && running.load(Ordering::SeqCst) {
                            thread::sleep(POLL_STEP);
                            waited += POLL_STEP;
                        }
                    }
                })
                .map_err(|source| WasapiError::Thread {
                    name: "wasapi-route-watch",
                    source,
                })?
        };

        Ok(Self {
            shared,
            running,
            watcher: Mutex::new(Some(handle)),
        })
    }

    /// Shared with `WasapiOutput` so playback opens the selected endpoint.
    pub fn selection(&self) -> EndpointSelection {
        self.shared.selection.clone()
    }

    pub fn last_configuration(&self) -> Option<SessionConfiguration> {
        self.shared.config.lock().clone()
    }

    /// Hosts forward system events that pre-empt audio (lock screen, an
    /// exclusive-mode stream taking the device, a call app) through here.
    pub fn notify_interruption(&self, interruption: Interruption) {
        let listener = self.shared.interruption_listener.lock().clone();
        if let Some(listener) = listener {
            listener(interruption);
        }
    }
}

impl AudioSessionHardware for WindowsAudioSession {
    fn configure(&self, config: &SessionConfiguration) -> Result<(), AudioError> {
        let ports = self.shared.ports()?;

        let wanted = config
            .preferred_output
            .as_ref()
            .filter(|port| ports.iter().any(|p| p.uid == port.uid))
            .map(|port| port.uid.clone());
        if let (Some(port), None) = (&config.preferred_output, &wanted) {
            log::warn!("Preferred output {} is no longer connected", port.name);
        }
        self.shared.selection.set(wanted);
        *self.shared.config.lock() = Some(config.clone());
        log::debug!(
            "Configured {:?} (bluetooth {}, hfp {}); Windows applies routing only",
            config.category,
            config.allow_bluetooth,
            config.allow_bluetooth_hfp
        );

        let signature = self.shared.signature(&ports);
        if let Some(reason) = self.shared.observe(signature, Some(RouteChangeReason::CategoryChange)) {
            self.shared.emit_route_change(reason);
        }
        Ok(())
    }

    fn current_route(&self) -> Result<RouteDescription, AudioError> {
        let ports = self.shared.ports()?;
        let preferred = self.shared.selection.get();
        let outputs = effective_output(&ports, preferred.as_deref())
            .cloned()
            .into_iter()
            .collect();
        Ok(RouteDescription::new(outputs))
    }

    fn available_outputs(&self) -> Result<Vec<PortDescription>, AudioError> {
        Ok(self.shared.ports()?)
    }

    fn set_route_change_listener(&self, listener: Option<RouteChangeCallback>) {
        *self.shared.route_listener.lock() = listener;
    }

    fn set_interruption_listener(&self, listener: Option<InterruptionCallback>) {
        *self.shared.interruption_listener.lock() = listener;
    }
}

impl Drop for WindowsAudioSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.watcher.lock().take() {
            let _ = handle.join();
        }
    }
}
