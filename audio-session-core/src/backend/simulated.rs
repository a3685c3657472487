//! Deterministic in-process hardware.
//!
//! Implements every platform trait against plain state so a host without
//! audio hardware (and the test suite) can drive the manager end to end.
//! Nothing happens on its own: the caller connects ports, feeds capture
//! buffers, finishes outputs and answers permission prompts explicitly.
//! Callbacks fire synchronously on the calling thread, never under the
//! internal lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::AudioBackend;
use crate::models::audio::AudioClip;
use crate::models::error::AudioError;
use crate::models::policy::SessionConfiguration;
use crate::models::route::{AudioRoute, PortDescription, RouteDescription};
use crate::models::state::PermissionStatus;
use crate::scheduling::dispatcher::Dispatcher;
use crate::scheduling::timer::Timer;
use crate::traits::capture_device::{AudioBufferCallback, CaptureDevice, TeardownCallback};
use crate::traits::output_device::{OutputDevice, OutputFinishedCallback};
use crate::traits::platform::{Haptics, PermissionCallback, PermissionPrompt};
use crate::traits::session_hardware::{
    AudioSessionHardware, Interruption, InterruptionCallback, RouteChangeCallback, RouteChangeReason,
};
use crate::traits::speech::{SpeechCallback, SpeechSynthesizer};

/// Sample rate of synthesized speech.
pub const SPEECH_SAMPLE_RATE: u32 = 16000;

/// Length of synthesized speech per character of text.
pub const SPEECH_TIME_PER_CHAR: Duration = Duration::from_millis(50);

struct ActiveOutput {
    duration: Duration,
    gain: f32,
    on_finished: OutputFinishedCallback,
}

struct SimulatedState {
    // Session
    available: Vec<PortDescription>,
    active: Vec<PortDescription>,
    route_readable: bool,
    refuse_configuration: bool,
    configurations: Vec<SessionConfiguration>,

    // Capture
    mic_available: bool,
    fail_capture_start: bool,
    capture: Option<AudioBufferCallback>,
    capture_starts: usize,
    async_teardown: bool,
    pending_teardown: Option<TeardownCallback>,

    // Output
    fail_output_start: bool,
    output: Option<ActiveOutput>,
    output_position: Duration,
    output_starts: usize,
    last_gain: Option<f32>,

    // Speech, haptics, permissions
    fail_speech: bool,
    defer_speech: bool,
    pending_speech: VecDeque<(String, SpeechCallback)>,
    spoken: Vec<String>,
    vibrations: usize,
    permission: PermissionStatus,
    permission_answer: bool,
    defer_permission: bool,
    pending_permission: Option<PermissionCallback>,
}

impl SimulatedState {
    fn new() -> Self {
        let speaker = PortDescription::built_in_speaker();
        Self {
            available: vec![speaker.clone()],
            active: vec![speaker],
            route_readable: true,
            refuse_configuration: false,
            configurations: Vec::new(),
            mic_available: true,
            fail_capture_start: false,
            capture: None,
            capture_starts: 0,
            async_teardown: false,
            pending_teardown: None,
            fail_output_start: false,
            output: None,
            output_position: Duration::ZERO,
            output_starts: 0,
            last_gain: None,
            fail_speech: false,
            defer_speech: false,
            pending_speech: VecDeque::new(),
            spoken: Vec::new(),
            vibrations: 0,
            permission: PermissionStatus::Undetermined,
            permission_answer: true,
            defer_permission: false,
            pending_permission: None,
        }
    }

    fn render_speech(&mut self, text: &str) -> Result<AudioClip, AudioError> {
        if self.fail_speech {
            return Err(AudioError::SpeechSynthesisFailed(format!(
                "simulated synthesizer rejected {:?}",
                text
            )));
        }
        self.spoken.push(text.to_string());
        let duration = SPEECH_TIME_PER_CHAR * text.chars().count() as u32;
        Ok(AudioClip::silence(duration, SPEECH_SAMPLE_RATE))
    }

    fn route_to(&mut self, uid: &str) -> bool {
        let Some(port) = self.available.iter().find(|p| p.uid == uid).cloned() else {
            return false;
        };
        if self.active.first().map(|p| p.uid.as_str()) == Some(uid) {
            return false;
        }
        self.active = vec![port];
        true
    }
}

/// Simulated phone audio hardware. Starts with only the built-in speaker
/// connected and record permission undetermined.
pub struct SimulatedHardware {
    state: Mutex<SimulatedState>,
    route_listener: Mutex<Option<RouteChangeCallback>>,
    interruption_listener: Mutex<Option<InterruptionCallback>>,
}

impl SimulatedHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimulatedState::new()),
            route_listener: Mutex::new(None),
            interruption_listener: Mutex::new(None),
        })
    }

    /// Bundle this hardware with a dispatcher and timer.
    pub fn backend(self: &Arc<Self>, dispatcher: Arc<dyn Dispatcher>, timer: Arc<dyn Timer>) -> AudioBackend {
        AudioBackend {
            session: self.clone(),
            capture: self.clone(),
            output: self.clone(),
            speech: self.clone(),
            haptics: self.clone(),
            permissions: self.clone(),
            dispatcher,
            timer,
        }
    }

    // ---- session -------------------------------------------------------

    /// Plug in an output. Like a phone, the newest device takes the route.
    pub fn connect_output(&self, port: PortDescription) {
        {
            let mut state = self.state.lock();
            state.available.retain(|p| p.uid != port.uid);
            state.available.push(port.clone());
            state.active = vec![port];
        }
        self.emit_route_change(RouteChangeReason::NewDeviceAvailable);
    }

    /// Unplug an output. If it carried the route, audio falls back to the
    /// built-in speaker (or the first remaining output).
    pub fn disconnect_output(&self, uid: &str) {
        let rerouted = {
            let mut state = self.state.lock();
            state.available.retain(|p| p.uid != uid);
            let was_active = state.active.iter().any(|p| p.uid == uid);
            if was_active {
                let fallback = state
                    .available
                    .iter()
                    .find(|p| p.route() == AudioRoute::Speaker)
                    .or_else(|| state.available.first())
                    .cloned();
                state.active = fallback.into_iter().collect();
            }
            was_active
        };
        if rerouted {
            self.emit_route_change(RouteChangeReason::OldDeviceUnavailable);
        }
    }

    /// Move the route to a connected output without being asked to.
    pub fn route_to(&self, uid: &str, reason: RouteChangeReason) -> bool {
        let moved = self.state.lock().route_to(uid);
        if moved {
            self.emit_route_change(reason);
        }
        moved
    }

    /// Switch the route without raising a notification.
    pub fn route_silently(&self, uid: &str) -> bool {
        self.state.lock().route_to(uid)
    }

    /// Make route queries fail (or succeed again).
    pub fn set_route_readable(&self, readable: bool) {
        self.state.lock().route_readable = readable;
    }

    pub fn set_refuse_configuration(&self, refuse: bool) {
        self.state.lock().refuse_configuration = refuse;
    }

    /// Configurations accepted so far, oldest first.
    pub fn configurations(&self) -> Vec<SessionConfiguration> {
        self.state.lock().configurations.clone()
    }

    pub fn last_configuration(&self) -> Option<SessionConfiguration> {
        self.state.lock().configurations.last().cloned()
    }

    pub fn emit_route_change(&self, reason: RouteChangeReason) {
        let listener = self.route_listener.lock().clone();
        if let Some(listener) = listener {
            listener(reason);
        }
    }

    pub fn emit_interruption(&self, interruption: Interruption) {
        let listener = self.interruption_listener.lock().clone();
        if let Some(listener) = listener {
            listener(interruption);
        }
    }

    pub fn has_route_listener(&self) -> bool {
        self.route_listener.lock().is_some()
    }

    pub fn has_interruption_listener(&self) -> bool {
        self.interruption_listener.lock().is_some()
    }

    // ---- capture -------------------------------------------------------

    pub fn set_mic_available(&self, available: bool) {
        self.state.lock().mic_available = available;
    }

    pub fn set_fail_capture_start(&self, fail: bool) {
        self.state.lock().fail_capture_start = fail;
    }

    /// Hold teardown confirmations until `complete_teardown`.
    pub fn set_async_teardown(&self, deferred: bool) {
        self.state.lock().async_teardown = deferred;
    }

    /// Deliver a buffer to the capture callback. Returns false if capture
    /// is not running.
    pub fn feed_capture(&self, samples: &[f32], sample_rate: f64, channels: u16) -> bool {
        let callback = self.state.lock().capture.clone();
        match callback {
            Some(callback) => {
                callback(samples, sample_rate, channels);
                true
            }
            None => false,
        }
    }

    /// Confirm a deferred teardown. Returns false if none was pending.
    pub fn complete_teardown(&self) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let pending = state.pending_teardown.take();
            if pending.is_some() {
                state.capture = None;
            }
            pending
        };
        match pending {
            Some(on_stopped) => {
                on_stopped();
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capture.is_some()
    }

    pub fn capture_starts(&self) -> usize {
        self.state.lock().capture_starts
    }

    // ---- output --------------------------------------------------------

    pub fn set_fail_output_start(&self, fail: bool) {
        self.state.lock().fail_output_start = fail;
    }

    /// End the current clip. Returns false if nothing was playing.
    pub fn finish_output(&self, played_to_end: bool) -> bool {
        let active = {
            let mut state = self.state.lock();
            state.output_position = Duration::ZERO;
            state.output.take()
        };
        match active {
            Some(active) => {
                (active.on_finished)(played_to_end);
                true
            }
            None => false,
        }
    }

    pub fn set_output_position(&self, position: Duration) {
        self.state.lock().output_position = position;
    }

    pub fn is_outputting(&self) -> bool {
        self.state.lock().output.is_some()
    }

    /// Duration of the clip currently playing.
    pub fn current_output_duration(&self) -> Option<Duration> {
        self.state.lock().output.as_ref().map(|o| o.duration)
    }

    pub fn output_starts(&self) -> usize {
        self.state.lock().output_starts
    }

    /// Gain of the clip in flight, or the last one applied.
    pub fn output_gain(&self) -> Option<f32> {
        let state = self.state.lock();
        state.output.as_ref().map(|o| o.gain).or(state.last_gain)
    }

    // ---- speech, haptics, permissions ----------------------------------

    pub fn set_fail_speech(&self, fail: bool) {
        self.state.lock().fail_speech = fail;
    }

    /// Hold synthesis requests until `resolve_speech`.
    pub fn set_defer_speech(&self, defer: bool) {
        self.state.lock().defer_speech = defer;
    }

    /// Finish the oldest held synthesis request. Returns false if none.
    pub fn resolve_speech(&self) -> bool {
        let pending = {
            let mut state = self.state.lock();
            state
                .pending_speech
                .pop_front()
                .map(|(text, on_done)| (state.render_speech(&text), on_done))
        };
        match pending {
            Some((result, on_done)) => {
                on_done(result);
                true
            }
            None => false,
        }
    }

    pub fn pending_speech(&self) -> usize {
        self.state.lock().pending_speech.len()
    }

    /// Texts synthesized so far.
    pub fn spoken(&self) -> Vec<String> {
        self.state.lock().spoken.clone()
    }

    pub fn vibrations(&self) -> usize {
        self.state.lock().vibrations
    }

    pub fn set_permission_status(&self, status: PermissionStatus) {
        self.state.lock().permission = status;
    }

    /// Answer the next prompt gives.
    pub fn set_permission_answer(&self, granted: bool) {
        self.state.lock().permission_answer = granted;
    }

    /// Hold prompts until `resolve_permission`.
    pub fn set_defer_permission(&self, deferred: bool) {
        self.state.lock().defer_permission = deferred;
    }

    /// Answer a held prompt. Returns false if none was pending.
    pub fn resolve_permission(&self, granted: bool) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let pending = state.pending_permission.take();
            if pending.is_some() {
                state.permission = PermissionStatus::from_granted(granted);
            }
            pending
        };
        match pending {
            Some(completion) => {
                completion(granted);
                true
            }
            None => false,
        }
    }
}

impl AudioSessionHardware for SimulatedHardware {
    fn configure(&self, config: &SessionConfiguration) -> Result<(), AudioError> {
        let rerouted = {
            let mut state = self.state.lock();
            if state.refuse_configuration {
                return Err(AudioError::SessionConfigurationFailed(
                    "simulated hardware refused the configuration".into(),
                ));
            }
            state.configurations.push(config.clone());
            match &config.preferred_output {
                Some(port) => state.route_to(&port.uid),
                None => false,
            }
        };
        if rerouted {
            self.emit_route_change(RouteChangeReason::CategoryChange);
        }
        Ok(())
    }

    fn current_route(&self) -> Result<RouteDescription, AudioError> {
        let state = self.state.lock();
        if !state.route_readable {
            return Err(AudioError::DeviceNotAvailable);
        }
        Ok(RouteDescription::new(state.active.clone()))
    }

    fn available_outputs(&self) -> Result<Vec<PortDescription>, AudioError> {
        let state = self.state.lock();
        if !state.route_readable {
            return Err(AudioError::DeviceNotAvailable);
        }
        Ok(state.available.clone())
    }

    fn set_route_change_listener(&self, listener: Option<RouteChangeCallback>) {
        *self.route_listener.lock() = listener;
    }

    fn set_interruption_listener(&self, listener: Option<InterruptionCallback>) {
        *self.interruption_listener.lock() = listener;
    }
}

impl CaptureDevice for SimulatedHardware {
    fn is_available(&self) -> bool {
        self.state.lock().mic_available
    }

    fn start(&self, callback: AudioBufferCallback) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if !state.mic_available {
            return Err(AudioError::DeviceNotAvailable);
        }
        if state.fail_capture_start {
            return Err(AudioError::CaptureStartFailed(
                "simulated session conflict".into(),
            ));
        }
        if state.capture.is_some() {
            return Err(AudioError::CaptureStartFailed("capture already running".into()));
        }
        state.capture = Some(callback);
        state.capture_starts += 1;
        Ok(())
    }

    fn stop(&self, on_stopped: TeardownCallback) {
        let immediate = {
            let mut state = self.state.lock();
            if state.async_teardown && state.capture.is_some() {
                // Buffers keep flowing until the teardown is confirmed.
                state.pending_teardown = Some(on_stopped);
                None
            } else {
                state.capture = None;
                Some(on_stopped)
            }
        };
        if let Some(on_stopped) = immediate {
            on_stopped();
        }
    }
}

impl OutputDevice for SimulatedHardware {
    fn start(&self, clip: &AudioClip, gain: f32, on_finished: OutputFinishedCallback) -> Result<(), AudioError> {
        let previous = {
            let mut state = self.state.lock();
            if state.fail_output_start {
                return Err(AudioError::PlaybackFailed("simulated output failure".into()));
            }
            state.output_starts += 1;
            state.output_position = Duration::ZERO;
            state.last_gain = Some(gain);
            state.output.replace(ActiveOutput {
                duration: clip.duration(),
                gain,
                on_finished,
            })
        };
        if let Some(previous) = previous {
            (previous.on_finished)(false);
        }
        Ok(())
    }

    fn stop(&self) {
        let active = {
            let mut state = self.state.lock();
            state.output_position = Duration::ZERO;
            state.output.take()
        };
        if let Some(active) = active {
            (active.on_finished)(false);
        }
    }

    fn set_gain(&self, gain: f32) {
        let mut state = self.state.lock();
        state.last_gain = Some(gain);
        if let Some(output) = state.output.as_mut() {
            output.gain = gain;
        }
    }

    fn position(&self) -> Duration {
        self.state.lock().output_position
    }
}

impl SpeechSynthesizer for SimulatedHardware {
    fn synthesize(&self, text: &str, _language: Option<&str>, on_done: SpeechCallback) {
        let result = {
            let mut state = self.state.lock();
            if state.defer_speech {
                state.pending_speech.push_back((text.to_string(), on_done));
                return;
            }
            state.render_speech(text)
        };
        on_done(result);
    }
}

impl Haptics for SimulatedHardware {
    fn vibrate(&self) {
        self.state.lock().vibrations += 1;
    }
}

impl PermissionPrompt for SimulatedHardware {
    fn status(&self) -> PermissionStatus {
        self.state.lock().permission
    }

    fn request(&self, completion: PermissionCallback) {
        let answer = {
            let mut state = self.state.lock();
            if state.defer_permission {
                state.pending_permission = Some(completion);
                return;
            }
            let granted = state.permission_answer;
            state.permission = PermissionStatus::from_granted(granted);
            (granted, completion)
        };
        let (granted, completion) = answer;
        completion(granted);
    }
}
