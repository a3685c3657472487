use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::AudioBackend;
use crate::models::audio::{AudioClip, CapturedAudio};
use crate::models::config::AudioManagerConfiguration;
use crate::models::error::AudioError;
use crate::models::policy::{BluetoothMode, SessionActivity, SessionPolicy, VolumeLevel};
use crate::models::route::{AudioRoute, PortDescription, RouteSnapshot};
use crate::models::state::{AudioRole, PermissionStatus, PlaybackState, RecordingState};
use crate::scheduling::delayed::DelayedInvocation;
use crate::session::event_log::EventLog;
use crate::session::playback::PlaybackSession;
use crate::session::recording::{PermissionCompletion, RecordingCompletion, RecordingSession};
use crate::session::route_observer::{ObserverToken, RouteObserver};
use crate::traits::delegate::{AudioLogDelegate, RouteChange, RouteChangeObserver};
use crate::traits::session_hardware::{AudioSessionHardware, Interruption};

/// Internal mutable manager state, protected by `parking_lot::Mutex`.
struct ManagerState {
    role: AudioRole,
    policy: SessionPolicy,
    expected: RouteSnapshot,
}

struct ManagerInner {
    hardware: Arc<dyn AudioSessionHardware>,
    delayed: DelayedInvocation,
    log: Arc<EventLog>,
    routes: Arc<RouteObserver>,
    recording: RecordingSession,
    playback: PlaybackSession,
    state: Mutex<ManagerState>,
    route_token: Mutex<Option<ObserverToken>>,
}

/// Forwards route broadcasts to the manager without owning it.
struct ManagerRouteListener {
    manager: Weak<ManagerInner>,
}

impl RouteChangeObserver for ManagerRouteListener {
    fn audio_route_changed(&self, change: &RouteChange) {
        if let Some(manager) = self.manager.upgrade() {
            manager.route_changed(change);
        }
    }
}

impl ManagerInner {
    fn install_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);

        // Registered first so the manager's view is current before other
        // observers run.
        let token = self.routes.add_observer(Arc::new(ManagerRouteListener {
            manager: weak.clone(),
        }));
        *self.route_token.lock() = Some(token);
        self.routes.start(&self.delayed);

        let delayed = self.delayed.clone();
        let manager = weak.clone();
        self.hardware
            .set_interruption_listener(Some(Arc::new(move |interruption: Interruption| {
                if let Some(manager) = manager.upgrade() {
                    delayed.perform_on_main(&manager, move |manager| {
                        manager.handle_interruption(interruption)
                    });
                }
            })));

        let manager = weak.clone();
        self.recording.set_idle_handler(Arc::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.release_role(AudioRole::Recording);
            }
        }));

        let manager = weak;
        self.playback.set_idle_handler(Arc::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.release_role(AudioRole::Playing);
            }
        }));
    }

    fn uninstall_listeners(&self) {
        self.routes.stop();
        if let Some(token) = self.route_token.lock().take() {
            self.routes.remove_observer(token);
        }
        self.hardware.set_interruption_listener(None);
    }

    fn role(&self) -> AudioRole {
        self.state.lock().role
    }

    fn policy(&self) -> SessionPolicy {
        self.state.lock().policy
    }

    /// The one place the audio role changes. Leaving a role stops its
    /// session; entering or leaving `Recording` reconfigures the hardware.
    fn set_role(&self, next: AudioRole) {
        let previous = std::mem::replace(&mut self.state.lock().role, next);
        if previous == next {
            return;
        }
        self.log
            .event(&format!("Audio role {:?} -> {:?}", previous, next));

        // Checked against the sessions, not `previous`: a completion may
        // have started one behind the cached role.
        if next != AudioRole::Playing {
            self.playback.stop();
        }
        if next != AudioRole::Recording {
            let discarded = self.recording.stop();
            if !discarded.is_empty() {
                self.log.warn(&format!(
                    "Discarded {:.2}s of recording pre-empted by {:?}",
                    discarded.duration().as_secs_f64(),
                    next
                ));
            }
        }

        if previous == AudioRole::Recording || next == AudioRole::Recording {
            self.apply_configuration("recording role changed");
        }
    }

    /// Settle the previous playback before taking the `Playing` role. Its
    /// completion runs here and may stop, play or record on its own.
    fn begin_playback(&self) {
        self.playback.stop();
        self.set_role(AudioRole::Playing);
    }

    /// Back to idle, but only if `role` is still current.
    fn release_role(&self, role: AudioRole) {
        if self.role() == role {
            self.set_role(AudioRole::Idle);
        }
    }

    /// Pick the output the policy wants among what is connected. Falls back
    /// to the confirmed route when the outputs cannot be read.
    fn expected_route(&self, policy: &SessionPolicy, recording: bool) -> (RouteSnapshot, Option<PortDescription>) {
        let outputs = match self.hardware.available_outputs() {
            Ok(outputs) => Some(outputs),
            Err(e) => {
                self.log
                    .warn(&format!("Could not list audio outputs ({}); expecting the current route", e));
                None
            }
        };
        let preferred = outputs
            .as_deref()
            .and_then(|ports| policy.preferred_output(recording, ports))
            .cloned();
        let expected = match &preferred {
            Some(port) => RouteSnapshot::from_port(port),
            None => self.routes.last_confirmed(),
        };
        (expected, preferred)
    }

    /// Recompute the expected route and ask the hardware for it.
    /// Best effort: a refusal is logged and the routes stay diverged.
    fn apply_configuration(&self, reason: &str) {
        let (policy, recording) = {
            let st = self.state.lock();
            (st.policy, st.role == AudioRole::Recording)
        };

        let (expected, preferred) = self.expected_route(&policy, recording);
        self.state.lock().expected = expected.clone();

        let config = policy.session_configuration(recording, preferred);
        match self.hardware.configure(&config) {
            Ok(()) => self.log.event(&format!(
                "Session configured for {:?} ({}); expecting {} \"{}\"",
                config.category, reason, expected.route, expected.name
            )),
            Err(e) => {
                let e = match e {
                    AudioError::SessionConfigurationFailed(_) => e,
                    other => AudioError::SessionConfigurationFailed(other.to_string()),
                };
                self.log.warn(&format!("{} ({})", e, reason));
            }
        }

        self.check_route_convergence();
    }

    /// Log when the confirmed route is not the one the policy wants.
    fn check_route_convergence(&self) -> bool {
        let actual = self.routes.last_confirmed();
        let expected = self.state.lock().expected.clone();
        let converged = actual.route == expected.route && actual.name == expected.name;
        if !converged {
            self.log.warn(&format!(
                "Audio route diverges from policy: expected {} \"{}\", actual {} \"{}\"",
                expected.route, expected.name, actual.route, actual.name
            ));
        }
        converged
    }

    /// Route broadcast, on the dispatcher. Re-evaluates against the policy
    /// with whatever is now connected; never re-requests the route.
    fn route_changed(&self, change: &RouteChange) {
        let (policy, recording) = {
            let st = self.state.lock();
            (st.policy, st.role == AudioRole::Recording)
        };
        let (expected, _) = self.expected_route(&policy, recording);
        self.state.lock().expected = expected;

        if self.check_route_convergence() && change.route_type_changed() {
            self.log
                .event(&format!("Audio route now {} \"{}\"", change.current, change.route_name));
        }
    }

    fn handle_interruption(&self, interruption: Interruption) {
        match interruption {
            Interruption::Began => {
                self.log.warn("Audio session interrupted");
                self.set_role(AudioRole::Idle);
            }
            Interruption::Ended { should_resume } => {
                self.log.event(&format!(
                    "Audio session interruption ended (should resume: {})",
                    should_resume
                ));
                self.apply_configuration("interruption ended");
            }
        }
    }
}

/// The audio subsystem's single entry point.
///
/// Arbitrates between one `RecordingSession` and one `PlaybackSession` so at
/// most one of them is active, and keeps the platform session configured for
/// the current policy (activity, Bluetooth mode, volume).
///
/// ```text
/// host ──→ AudioManager ──set_role──→ RecordingSession ─┐
///              │                   └─→ PlaybackSession ─┼─→ platform traits
///              └──apply_configuration──→ AudioSessionHardware
///                                        │ route / interruption events
///              RouteObserver ←──[Dispatcher]──┘
/// ```
///
/// All methods are expected on the designated context (the dispatcher in
/// `AudioBackend`). Hardware callbacks are redispatched there before they
/// touch state; completions never run under an internal lock.
pub struct AudioManager {
    inner: Arc<ManagerInner>,
}

impl AudioManager {
    /// Validate `config`, read the initial route, configure the session, and
    /// install the route and interruption listeners.
    pub fn new(backend: AudioBackend, config: AudioManagerConfiguration) -> Result<Self, AudioError> {
        config.validate()?;

        let log = Arc::new(EventLog::new());
        let delayed = DelayedInvocation::new(backend.timer, backend.dispatcher);
        let routes = Arc::new(RouteObserver::new(Arc::clone(&backend.session), Arc::clone(&log)));
        let recording = RecordingSession::new(
            backend.capture,
            backend.haptics,
            backend.permissions,
            delayed.clone(),
            Arc::clone(&log),
            &config,
        );
        let playback = PlaybackSession::new(backend.output, backend.speech, delayed.clone(), Arc::clone(&log));
        playback.set_gain(config.initial_volume_level.gain());

        let policy = SessionPolicy {
            activity: SessionActivity::default(),
            bluetooth_mode: config.initial_bluetooth_mode,
            volume_level: config.initial_volume_level,
        };

        let inner = Arc::new(ManagerInner {
            hardware: backend.session,
            delayed,
            log,
            routes,
            recording,
            playback,
            state: Mutex::new(ManagerState {
                role: AudioRole::Idle,
                policy,
                expected: RouteSnapshot::unknown(),
            }),
            route_token: Mutex::new(None),
        });

        inner.install_listeners();
        inner.routes.refresh();
        inner.apply_configuration("initial setup");
        inner.log.event(&format!(
            "AudioManager ready: {} Hz capture, bluetooth {:?}, volume {}",
            config.capture_rate_hz(),
            config.initial_bluetooth_mode,
            config.initial_volume_level.label()
        ));

        Ok(Self { inner })
    }

    // ---- playback ------------------------------------------------------

    /// Play a clip. Stops any recording first; supersedes any playback.
    pub fn play_audio<F>(&self, clip: AudioClip, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.inner.begin_playback();
        self.inner.playback.play_clip(clip, Box::new(completion));
    }

    /// Speak `text` (`language` is a BCP-47 code, `None` for the default voice).
    pub fn play_text<F>(&self, text: &str, language: Option<&str>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.inner.begin_playback();
        self.inner.playback.play_text(text, language, Box::new(completion));
    }

    /// Play a clip followed by spoken `text`, as one playback.
    pub fn play_audio_with_text<F>(&self, clip: AudioClip, text: &str, language: Option<&str>, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.inner.begin_playback();
        self.inner
            .playback
            .play_clip_then_text(clip, text, language, Box::new(completion));
    }

    /// The role is released through the player's idle handler.
    pub fn stop_playback(&self) {
        self.inner.playback.stop();
    }

    // ---- recording -----------------------------------------------------

    pub fn request_record_permission(&self, completion: Option<PermissionCompletion>) {
        let completion = completion.unwrap_or_else(|| Box::new(|_| {}));
        self.inner.recording.request_permission(completion);
    }

    /// Start recording, stopping any playback first. Returns false if
    /// already recording, permission is missing, a previous recording is
    /// still tearing down, or the hardware refuses.
    pub fn record_audio(&self, vibrate_first: bool) -> bool {
        let recording = &self.inner.recording;
        if let Some(blocker) = recording.start_blocker() {
            self.inner
                .log
                .event(&format!("Record request ignored: {}", blocker));
            return false;
        }

        self.inner.set_role(AudioRole::Recording);
        if recording.start(vibrate_first) {
            return true;
        }
        self.inner.release_role(AudioRole::Recording);
        false
    }

    /// Stop recording and take the captured audio. Empty if not recording.
    /// The role is released through the recorder's idle handler.
    pub fn stop_recording(&self) -> CapturedAudio {
        self.inner.recording.stop()
    }

    /// Stop recording; `completion` gets the final audio after hardware
    /// teardown (immediately if teardown is already done). A recording
    /// started from `completion` keeps the role.
    pub fn stop_recording_with_completion(&self, completion: Option<RecordingCompletion>) -> CapturedAudio {
        let completion = completion.unwrap_or_else(|| Box::new(|_| {}));
        self.inner.recording.stop_with_completion(completion)
    }

    // ---- lifecycle -----------------------------------------------------

    /// Re-assert the session for the current policy. Safe to call redundantly.
    pub fn app_resumed(&self) {
        self.inner.routes.refresh();
        self.inner.apply_configuration("app resumed");
    }

    // ---- telemetry -----------------------------------------------------

    pub fn average_level(&self) -> f32 {
        self.inner.recording.average_level()
    }

    pub fn playback_progress(&self) -> f64 {
        self.inner.playback.progress()
    }

    pub fn playing_audio(&self) -> bool {
        self.inner.playback.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.is_recording()
    }

    pub fn role(&self) -> AudioRole {
        self.inner.role()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.inner.recording.state()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.playback.state()
    }

    pub fn permission_status(&self) -> PermissionStatus {
        self.inner.recording.permission_status()
    }

    pub fn audio_route_type(&self) -> AudioRoute {
        self.inner.routes.last_confirmed().route
    }

    pub fn audio_route_name(&self) -> String {
        self.inner.routes.last_confirmed().name
    }

    pub fn expected_audio_route_type(&self) -> AudioRoute {
        self.inner.state.lock().expected.route
    }

    pub fn expected_audio_route_name(&self) -> String {
        self.inner.state.lock().expected.name.clone()
    }

    pub fn expected_output_latency(&self) -> Duration {
        self.inner.state.lock().expected.latency
    }

    pub fn volume_level_string(&self) -> &'static str {
        self.volume_level().label()
    }

    // ---- policy --------------------------------------------------------

    pub fn bluetooth_mode(&self) -> BluetoothMode {
        self.inner.policy().bluetooth_mode
    }

    pub fn set_bluetooth_mode(&self, mode: BluetoothMode) {
        let changed = {
            let mut st = self.inner.state.lock();
            std::mem::replace(&mut st.policy.bluetooth_mode, mode) != mode
        };
        if changed {
            self.inner.apply_configuration("bluetooth mode changed");
        }
    }

    pub fn volume_level(&self) -> VolumeLevel {
        self.inner.policy().volume_level
    }

    /// Applies the new gain to live output. Never reconfigures the session.
    pub fn set_volume_level(&self, level: VolumeLevel) {
        self.inner.state.lock().policy.volume_level = level;
        self.inner.playback.set_gain(level.gain());
        self.inner
            .log
            .event(&format!("Volume level {}", level.label()));
    }

    pub fn is_active(&self) -> bool {
        self.inner.policy().activity.active
    }

    pub fn set_active(&self, active: bool) {
        let changed = {
            let mut st = self.inner.state.lock();
            std::mem::replace(&mut st.policy.activity.active, active) != active
        };
        if changed {
            self.inner.apply_configuration("activity changed");
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.inner.policy().activity.foreground
    }

    pub fn set_foreground(&self, foreground: bool) {
        let changed = {
            let mut st = self.inner.state.lock();
            std::mem::replace(&mut st.policy.activity.foreground, foreground) != foreground
        };
        if changed {
            self.inner.apply_configuration("foreground changed");
        }
    }

    // ---- observers -----------------------------------------------------

    /// Held weakly; the host keeps the delegate alive.
    pub fn set_logging_delegate(&self, delegate: &Arc<dyn AudioLogDelegate>) {
        self.inner.log.set_delegate(delegate);
    }

    pub fn clear_logging_delegate(&self) {
        self.inner.log.clear_delegate();
    }

    /// Subscribe to route-changed broadcasts (`RouteChange::NAME`). Called
    /// on the designated context after the manager has updated its own state.
    pub fn add_route_observer(&self, observer: Arc<dyn RouteChangeObserver>) -> ObserverToken {
        self.inner.routes.add_observer(observer)
    }

    pub fn remove_route_observer(&self, token: ObserverToken) -> bool {
        self.inner.routes.remove_observer(token)
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.inner.uninstall_listeners();
        self.inner.set_role(AudioRole::Idle);
        self.inner.log.event("AudioManager released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedHardware;
    use crate::models::policy::SessionCategory;
    use crate::models::route::{PortType, AUDIO_ROUTE_CHANGED};
    use crate::scheduling::dispatcher::MainQueue;
    use crate::scheduling::timer::ManualTimer;
    use crate::traits::session_hardware::RouteChangeReason;

    struct Fixture {
        hw: Arc<SimulatedHardware>,
        queue: Arc<MainQueue>,
        timer: Arc<ManualTimer>,
        manager: AudioManager,
    }

    impl Fixture {
        fn settle(&self) {
            self.queue.run_pending();
        }
    }

    fn fixture_with(config: AudioManagerConfiguration) -> Fixture {
        let hw = SimulatedHardware::new();
        hw.set_permission_status(PermissionStatus::Granted);
        let queue = Arc::new(MainQueue::new());
        let timer = Arc::new(ManualTimer::new());
        let manager = AudioManager::new(hw.backend(queue.clone(), timer.clone()), config).unwrap();
        queue.run_pending();
        Fixture {
            hw,
            queue,
            timer,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(AudioManagerConfiguration::default())
    }

    fn clip(secs: u64) -> AudioClip {
        AudioClip::silence(Duration::from_secs(secs), 16000)
    }

    fn results() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        (results, move |ok: bool| sink.lock().push(ok))
    }

    fn headset() -> PortDescription {
        PortDescription::new("bt-a2dp", "Headset", PortType::BluetoothA2dp)
    }

    fn assert_exclusive(manager: &AudioManager) {
        assert!(
            !(manager.is_recording() && manager.playing_audio()),
            "recording and playing at once"
        );
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<String>>,
    }

    impl AudioLogDelegate for Collector {
        fn audio_log_event(&self, event: &str) {
            self.events.lock().push(event.to_string());
        }
    }

    #[derive(Default)]
    struct RouteRecorder {
        changes: Mutex<Vec<RouteChange>>,
    }

    impl RouteChangeObserver for RouteRecorder {
        fn audio_route_changed(&self, change: &RouteChange) {
            self.changes.lock().push(change.clone());
        }
    }

    #[test]
    fn initial_state() {
        let f = fixture();
        let m = &f.manager;

        assert_eq!(m.role(), AudioRole::Idle);
        assert_eq!(m.audio_route_type(), AudioRoute::Speaker);
        assert_eq!(m.audio_route_name(), "Speaker");
        assert_eq!(m.expected_audio_route_type(), AudioRoute::Speaker);
        assert_eq!(m.expected_output_latency(), Duration::from_millis(10));
        assert_eq!(m.volume_level(), VolumeLevel::Medium);
        assert_eq!(m.bluetooth_mode(), BluetoothMode::Auto);
        assert!(!m.is_active());
        assert!(!m.is_foreground());
        assert_eq!(m.average_level(), 0.0);
        assert_eq!(m.playback_progress(), 0.0);

        let config = f.hw.last_configuration().unwrap();
        assert_eq!(config.category, SessionCategory::Inactive);
        assert!(f.hw.has_route_listener());
        assert!(f.hw.has_interruption_listener());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let hw = SimulatedHardware::new();
        let queue = Arc::new(MainQueue::new());
        let result = AudioManager::new(
            hw.backend(queue, Arc::new(ManualTimer::new())),
            AudioManagerConfiguration {
                capture_sample_rate: 0.0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(AudioError::ConfigurationInvalid(_))));
    }

    #[test]
    fn unreadable_route_still_constructs() {
        let hw = SimulatedHardware::new();
        hw.set_route_readable(false);
        let queue = Arc::new(MainQueue::new());
        let manager = AudioManager::new(
            hw.backend(queue, Arc::new(ManualTimer::new())),
            AudioManagerConfiguration::default(),
        )
        .unwrap();

        assert_eq!(manager.audio_route_type(), AudioRoute::Other);
        assert_eq!(manager.expected_audio_route_type(), AudioRoute::Other);
    }

    #[test]
    fn record_then_stop_returns_captured_audio() {
        let f = fixture();
        assert!(f.manager.record_audio(false));
        assert!(f.manager.is_recording());
        assert_eq!(f.manager.role(), AudioRole::Recording);
        assert_eq!(
            f.hw.last_configuration().unwrap().category,
            SessionCategory::PlayAndRecord
        );

        f.hw.feed_capture(&[0.2; 1600], 16000.0, 1);
        f.settle();
        assert!(f.manager.average_level() > 0.0);

        let audio = f.manager.stop_recording();
        assert_eq!(audio.len(), 1600);
        assert_eq!(audio.to_pcm16().len(), 3200);
        assert!(!f.manager.is_recording());
        assert_eq!(f.manager.role(), AudioRole::Idle);
        assert_eq!(f.hw.last_configuration().unwrap().category, SessionCategory::Inactive);
    }

    #[test]
    fn second_stop_recording_is_empty() {
        let f = fixture();
        f.manager.record_audio(false);
        f.hw.feed_capture(&[0.2; 160], 16000.0, 1);
        assert_eq!(f.manager.stop_recording().len(), 160);
        assert!(f.manager.stop_recording().is_empty());
    }

    #[test]
    fn record_without_permission_changes_nothing() {
        let f = fixture();
        f.hw.set_permission_status(PermissionStatus::Denied);
        let (done, completion) = results();
        f.manager.play_audio(clip(1), completion);

        assert!(!f.manager.record_audio(false));
        assert!(f.manager.playing_audio());
        assert!(done.lock().is_empty());
        assert_eq!(f.manager.role(), AudioRole::Playing);
    }

    #[test]
    fn record_twice_is_rejected() {
        let f = fixture();
        assert!(f.manager.record_audio(false));
        assert!(!f.manager.record_audio(false));
        assert_eq!(f.hw.capture_starts(), 1);
    }

    #[test]
    fn capture_start_failure_returns_to_idle() {
        let f = fixture();
        f.hw.set_fail_capture_start(true);
        assert!(!f.manager.record_audio(false));
        assert_eq!(f.manager.role(), AudioRole::Idle);
        assert!(!f.manager.is_recording());
        assert_eq!(f.hw.last_configuration().unwrap().category, SessionCategory::Inactive);
    }

    #[test]
    fn play_while_recording_stops_recording_first() {
        let f = fixture();
        f.manager.record_audio(false);
        f.hw.feed_capture(&[0.2; 1600], 16000.0, 1);

        let (done, completion) = results();
        f.manager.play_audio(clip(1), completion);

        assert!(!f.manager.is_recording());
        assert!(!f.hw.is_capturing());
        assert!(f.manager.playing_audio());
        assert_eq!(f.manager.role(), AudioRole::Playing);
        assert_ne!(
            f.hw.last_configuration().unwrap().category,
            SessionCategory::PlayAndRecord
        );

        f.hw.finish_output(true);
        f.settle();
        assert_eq!(*done.lock(), vec![true]);
        assert_eq!(f.manager.role(), AudioRole::Idle);

        // The pre-empted buffer went to no one.
        assert!(f.manager.stop_recording().is_empty());
    }

    #[test]
    fn record_while_playing_stops_playback() {
        let f = fixture();
        let (done, completion) = results();
        f.manager.play_audio(clip(1), completion);

        assert!(f.manager.record_audio(false));
        assert_eq!(*done.lock(), vec![false]);
        assert!(!f.manager.playing_audio());
        assert!(f.manager.is_recording());

        f.settle();
        assert_eq!(*done.lock(), vec![false]);
        assert_eq!(f.manager.role(), AudioRole::Recording);
    }

    #[test]
    fn roles_stay_exclusive_across_sequences() {
        let f = fixture();
        let m = &f.manager;

        for step in 0..12 {
            match step % 4 {
                0 => {
                    m.record_audio(step % 8 == 0);
                }
                1 => m.play_audio(clip(1), |_| {}),
                2 => m.play_text("route ahead", Some("en-GB"), |_| {}),
                _ => {
                    m.record_audio(false);
                    f.hw.feed_capture(&[0.1; 64], 16000.0, 1);
                }
            }
            assert_exclusive(m);
            f.timer.advance(Duration::from_millis(150));
            f.settle();
            assert_exclusive(m);
        }
    }

    #[test]
    fn superseded_play_gets_false_then_second_finishes() {
        let f = fixture();
        let (first, cb1) = results();
        let (second, cb2) = results();

        f.manager.play_audio(clip(1), cb1);
        f.manager.play_audio(clip(2), cb2);
        f.settle();

        assert_eq!(*first.lock(), vec![false]);
        assert!(second.lock().is_empty());

        f.hw.finish_output(true);
        f.settle();
        assert_eq!(*first.lock(), vec![false]);
        assert_eq!(*second.lock(), vec![true]);
    }

    #[test]
    fn stop_playback_reports_false() {
        let f = fixture();
        let (done, completion) = results();
        f.manager.play_text("turn left", None, completion);
        assert!(f.manager.playing_audio());

        f.manager.stop_playback();
        f.manager.stop_playback();
        f.settle();
        assert_eq!(*done.lock(), vec![false]);
        assert_eq!(f.manager.role(), AudioRole::Idle);
    }

    #[test]
    fn clip_with_text_progresses_across_segments() {
        let f = fixture();
        let (done, completion) = results();
        f.manager
            .play_audio_with_text(clip(1), "hello", None, completion);
        f.settle();

        f.hw.set_output_position(Duration::from_millis(500));
        assert!((f.manager.playback_progress() - 0.4).abs() < 1e-9);

        f.hw.finish_output(true);
        f.settle();
        f.hw.finish_output(true);
        f.settle();
        assert_eq!(*done.lock(), vec![true]);
        assert_eq!(f.manager.playback_progress(), 0.0);
    }

    #[test]
    fn completion_can_start_new_playback() {
        let f = fixture();
        let manager = Arc::new(f.manager);
        let weak = Arc::downgrade(&manager);

        manager.play_audio(clip(1), move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.play_audio(AudioClip::silence(Duration::from_secs(1), 16000), |_| {});
            }
        });
        f.hw.finish_output(true);
        f.queue.run_pending();

        assert!(manager.playing_audio());
        assert_eq!(manager.role(), AudioRole::Playing);
        assert_eq!(f.hw.output_starts(), 2);
    }

    #[test]
    fn superseded_completion_that_stops_playback_keeps_roles_exclusive() {
        let f = fixture();
        let manager = Arc::new(f.manager);
        let weak = Arc::downgrade(&manager);

        manager.play_audio(clip(1), move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.stop_playback();
            }
        });
        let (second, completion) = results();
        manager.play_audio(clip(2), completion);
        f.queue.run_pending();
        assert!(manager.playing_audio());
        assert_eq!(manager.role(), AudioRole::Playing);

        assert!(manager.record_audio(false));
        assert_exclusive(&manager);
        assert!(!f.hw.is_outputting());
        assert!(f.hw.is_capturing());
        assert_eq!(*second.lock(), vec![false]);
        assert_eq!(manager.role(), AudioRole::Recording);
    }

    #[test]
    fn speech_arriving_after_recording_starts_is_ignored() {
        let f = fixture();
        f.hw.set_defer_speech(true);
        let (done, completion) = results();

        f.manager.play_text("turn left", None, completion);
        assert!(f.manager.playing_audio());
        assert_eq!(f.hw.output_starts(), 0);

        assert!(f.manager.record_audio(false));
        assert_eq!(*done.lock(), vec![false]);

        assert!(f.hw.resolve_speech());
        f.settle();
        assert_eq!(f.hw.output_starts(), 0);
        assert!(f.manager.is_recording());
        assert_exclusive(&f.manager);
        assert_eq!(*done.lock(), vec![false]);
    }

    #[test]
    fn volume_level_string_is_pure() {
        let f = fixture();
        let m = &f.manager;
        assert_eq!(m.volume_level_string(), "Medium");

        m.record_audio(false);
        assert_eq!(m.volume_level_string(), "Medium");
        m.set_bluetooth_mode(BluetoothMode::Off);
        assert_eq!(m.volume_level_string(), "Medium");

        for level in [VolumeLevel::High, VolumeLevel::Low, VolumeLevel::Mute] {
            m.set_volume_level(level);
            assert_eq!(m.volume_level_string(), level.label());
            assert_eq!(m.volume_level_string(), level.label());
        }
    }

    #[test]
    fn volume_change_reaches_live_output_without_reconfiguring() {
        let f = fixture();
        let configured = f.hw.configurations().len();
        f.manager.play_audio(clip(1), |_| {});
        assert_eq!(f.hw.output_gain(), Some(0.75));

        f.manager.set_volume_level(VolumeLevel::Low);
        assert_eq!(f.hw.output_gain(), Some(0.5));
        assert_eq!(f.hw.configurations().len(), configured);
    }

    #[test]
    fn bluetooth_off_moves_expected_then_actual_route() {
        let f = fixture();
        f.hw.connect_output(headset());
        f.settle();
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Bluetooth);
        assert_eq!(f.manager.expected_audio_route_type(), AudioRoute::Bluetooth);

        f.manager.set_bluetooth_mode(BluetoothMode::Off);
        assert_ne!(f.manager.expected_audio_route_type(), AudioRoute::Bluetooth);
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Bluetooth);
        assert!(!f.hw.last_configuration().unwrap().allow_bluetooth);

        f.settle();
        assert_eq!(f.manager.audio_route_type(), f.manager.expected_audio_route_type());
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Speaker);
    }

    #[test]
    fn refused_configuration_stays_diverged_until_route_event() {
        let f = fixture();
        f.hw.connect_output(headset());
        f.settle();

        f.hw.set_refuse_configuration(true);
        f.manager.set_bluetooth_mode(BluetoothMode::Off);
        f.settle();
        assert_eq!(f.manager.expected_audio_route_type(), AudioRoute::Speaker);
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Bluetooth);

        f.hw.disconnect_output("bt-a2dp");
        f.settle();
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Speaker);
        assert_eq!(f.manager.expected_audio_route_type(), AudioRoute::Speaker);
    }

    #[test]
    fn unchanged_policy_does_not_reconfigure() {
        let f = fixture();
        let configured = f.hw.configurations().len();
        f.manager.set_bluetooth_mode(BluetoothMode::Auto);
        f.manager.set_active(false);
        f.manager.set_foreground(false);
        assert_eq!(f.hw.configurations().len(), configured);
    }

    #[test]
    fn activity_selects_session_category() {
        let f = fixture();
        f.manager.set_foreground(true);
        assert_eq!(f.hw.last_configuration().unwrap().category, SessionCategory::Ambient);

        f.manager.set_active(true);
        let config = f.hw.last_configuration().unwrap();
        assert_eq!(config.category, SessionCategory::ExclusivePlayback);
        assert!(config.volume_buttons_control_app);

        f.manager.set_foreground(false);
        let config = f.hw.last_configuration().unwrap();
        assert_eq!(config.category, SessionCategory::DuckingPlayback);
        assert!(!config.volume_buttons_control_app);
    }

    #[test]
    fn app_resumed_without_activity_changes_nothing() {
        let f = fixture();
        let m = &f.manager;
        let before = (
            m.role(),
            m.audio_route_type(),
            m.audio_route_name(),
            m.expected_audio_route_type(),
            m.expected_audio_route_name(),
            m.expected_output_latency(),
            m.is_recording(),
            m.playing_audio(),
        );

        m.app_resumed();
        m.app_resumed();
        f.settle();

        let after = (
            m.role(),
            m.audio_route_type(),
            m.audio_route_name(),
            m.expected_audio_route_type(),
            m.expected_audio_route_name(),
            m.expected_output_latency(),
            m.is_recording(),
            m.playing_audio(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn app_resumed_picks_up_silent_route_changes() {
        let f = fixture();
        f.hw.connect_output(PortDescription::new("wired", "Headphones", PortType::Headphones));
        f.settle();
        f.hw.route_silently("built-in-speaker");
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Auxiliary);

        f.manager.app_resumed();
        f.settle();
        assert_eq!(f.manager.expected_audio_route_type(), AudioRoute::Auxiliary);
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Auxiliary);
    }

    #[test]
    fn vibrate_first_recording_through_manager() {
        let f = fixture();
        assert!(f.manager.record_audio(true));
        assert!(f.manager.is_recording());
        assert_eq!(f.manager.recording_state(), RecordingState::Preparing);
        assert_eq!(f.hw.vibrations(), 1);

        f.timer.advance(Duration::from_millis(300));
        f.settle();
        assert_eq!(f.manager.recording_state(), RecordingState::Recording);
        assert!(f.hw.is_capturing());
    }

    #[test]
    fn play_during_vibrate_delay_cancels_recording() {
        let f = fixture();
        f.manager.record_audio(true);
        f.manager.play_audio(clip(1), |_| {});

        f.timer.advance(Duration::from_secs(1));
        f.settle();
        assert!(!f.manager.is_recording());
        assert_eq!(f.hw.capture_starts(), 0);
        assert!(f.manager.playing_audio());
    }

    #[test]
    fn delayed_start_failure_releases_role() {
        let f = fixture();
        f.hw.set_fail_capture_start(true);
        assert!(f.manager.record_audio(true));

        f.timer.advance(Duration::from_millis(300));
        f.settle();
        assert_eq!(f.manager.role(), AudioRole::Idle);
        assert!(!f.manager.is_recording());
    }

    #[test]
    fn stop_with_completion_async_teardown() {
        let f = fixture();
        f.hw.set_async_teardown(true);
        f.manager.record_audio(false);
        f.hw.feed_capture(&[0.2; 320], 16000.0, 1);

        let delivered = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&delivered);
        let returned = f
            .manager
            .stop_recording_with_completion(Some(Box::new(move |audio: CapturedAudio| {
                *slot.lock() = Some(audio)
            })));

        assert_eq!(returned.len(), 320);
        assert_eq!(f.manager.role(), AudioRole::Idle);
        assert!(!f.manager.is_recording());
        assert_eq!(
            f.manager.recording_state(),
            RecordingState::StoppedWithPendingCompletion
        );
        assert!(delivered.lock().is_none());

        f.hw.complete_teardown();
        f.settle();
        assert_eq!(delivered.lock().as_ref().map(CapturedAudio::len), Some(320));
        assert_eq!(f.manager.recording_state(), RecordingState::Idle);
    }

    #[test]
    fn stop_with_completion_sync_teardown_fires_before_return() {
        let f = fixture();
        f.manager.record_audio(false);
        f.hw.feed_capture(&[0.2; 320], 16000.0, 1);

        let delivered = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&delivered);
        f.manager
            .stop_recording_with_completion(Some(Box::new(move |audio: CapturedAudio| {
                *slot.lock() = Some(audio.len())
            })));
        assert_eq!(*delivered.lock(), Some(320));

        assert!(f.manager.stop_recording_with_completion(None).is_empty());
    }

    #[test]
    fn completion_can_start_next_recording() {
        let f = fixture();
        let manager = Arc::new(f.manager);
        let weak = Arc::downgrade(&manager);
        assert!(manager.record_audio(false));
        f.hw.feed_capture(&[0.2; 320], 16000.0, 1);

        let restarted = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&restarted);
        let returned = manager.stop_recording_with_completion(Some(Box::new(move |_: CapturedAudio| {
            *slot.lock() = weak.upgrade().map(|manager| manager.record_audio(false));
        })));

        assert_eq!(returned.len(), 320);
        assert_eq!(*restarted.lock(), Some(true));
        assert!(manager.is_recording());
        assert!(f.hw.is_capturing());
        assert_eq!(f.hw.capture_starts(), 2);
        assert_eq!(manager.role(), AudioRole::Recording);
        assert_eq!(
            f.hw.last_configuration().unwrap().category,
            SessionCategory::PlayAndRecord
        );
    }

    #[test]
    fn completion_during_vibrate_delay_can_record_again() {
        let f = fixture();
        let manager = Arc::new(f.manager);
        let weak = Arc::downgrade(&manager);
        assert!(manager.record_audio(true));

        let restarted = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&restarted);
        let returned = manager.stop_recording_with_completion(Some(Box::new(move |_: CapturedAudio| {
            *slot.lock() = weak.upgrade().map(|manager| manager.record_audio(false));
        })));

        assert!(returned.is_empty());
        assert_eq!(*restarted.lock(), Some(true));
        assert_eq!(manager.role(), AudioRole::Recording);

        // The cancelled delayed start must not touch the new recording.
        f.timer.advance(Duration::from_secs(1));
        f.queue.run_pending();
        assert_eq!(manager.recording_state(), RecordingState::Recording);
        assert_eq!(f.hw.capture_starts(), 1);
        assert_eq!(manager.role(), AudioRole::Recording);
    }

    #[test]
    fn record_during_pending_teardown_logs_reason() {
        let f = fixture();
        let collector = Arc::new(Collector::default());
        let delegate: Arc<dyn AudioLogDelegate> = collector.clone();
        f.manager.set_logging_delegate(&delegate);
        f.hw.set_async_teardown(true);

        assert!(f.manager.record_audio(false));
        f.manager.stop_recording_with_completion(None);
        assert!(!f.manager.record_audio(false));
        assert!(collector
            .events
            .lock()
            .iter()
            .any(|e| e == "Record request ignored: previous recording is still tearing down"));
        assert_eq!(f.manager.role(), AudioRole::Idle);
        assert_eq!(f.hw.capture_starts(), 1);

        f.hw.complete_teardown();
        f.settle();
        assert!(f.manager.record_audio(false));
        assert_eq!(f.hw.capture_starts(), 2);
    }

    #[test]
    fn permission_request_without_completion() {
        let f = fixture();
        f.hw.set_permission_status(PermissionStatus::Undetermined);
        f.hw.set_permission_answer(true);

        f.manager.request_record_permission(None);
        f.settle();
        assert_eq!(f.manager.permission_status(), PermissionStatus::Granted);
        assert!(f.manager.record_audio(false));
    }

    #[test]
    fn interruption_stops_audio_and_end_reconfigures() {
        let f = fixture();
        let (done, completion) = results();
        f.manager.play_audio(clip(1), completion);

        f.hw.emit_interruption(Interruption::Began);
        assert!(f.manager.playing_audio(), "handled on the dispatcher");
        f.settle();
        assert_eq!(*done.lock(), vec![false]);
        assert_eq!(f.manager.role(), AudioRole::Idle);

        f.manager.record_audio(false);
        f.hw.emit_interruption(Interruption::Began);
        f.settle();
        assert!(!f.manager.is_recording());
        assert!(!f.hw.is_capturing());

        let configured = f.hw.configurations().len();
        f.hw.emit_interruption(Interruption::Ended { should_resume: true });
        f.settle();
        assert_eq!(f.hw.configurations().len(), configured + 1);
    }

    #[test]
    fn route_observers_receive_broadcast_after_manager_updates() {
        let f = fixture();
        let recorder = Arc::new(RouteRecorder::default());
        let token = f.manager.add_route_observer(recorder.clone());
        assert_eq!(RouteChange::NAME, AUDIO_ROUTE_CHANGED);

        f.hw.connect_output(headset());
        f.settle();
        {
            let changes = recorder.changes.lock();
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].current, AudioRoute::Bluetooth);
            assert_eq!(changes[0].route_name, "Headset");
        }
        assert_eq!(f.manager.audio_route_name(), "Headset");

        assert!(f.manager.remove_route_observer(token));
        f.hw.route_to("built-in-speaker", RouteChangeReason::Override);
        f.settle();
        assert_eq!(recorder.changes.lock().len(), 1);
        assert_eq!(f.manager.audio_route_type(), AudioRoute::Speaker);
    }

    #[test]
    fn logging_delegate_receives_events_and_is_weak() {
        let f = fixture();
        let collector = Arc::new(Collector::default());
        let delegate: Arc<dyn AudioLogDelegate> = collector.clone();
        f.manager.set_logging_delegate(&delegate);

        f.manager.set_active(true);
        assert!(!collector.events.lock().is_empty());

        f.manager.clear_logging_delegate();
        let count = collector.events.lock().len();
        f.manager.set_active(false);
        assert_eq!(collector.events.lock().len(), count);

        f.manager.set_logging_delegate(&delegate);
        drop(delegate);
        drop(collector);
        f.manager.set_active(true);
    }

    #[test]
    fn dropping_manager_releases_hardware() {
        let f = fixture();
        let (done, completion) = results();
        f.manager.play_audio(clip(1), completion);

        drop(f.manager);
        assert_eq!(*done.lock(), vec![false]);
        assert!(!f.hw.has_route_listener());
        assert!(!f.hw.has_interruption_listener());
        assert!(!f.hw.is_outputting());

        // Late hardware events find nothing alive.
        f.hw.emit_route_change(RouteChangeReason::Unknown);
        f.queue.run_pending();
    }
}
