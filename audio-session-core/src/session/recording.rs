use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio::CapturedAudio;
use crate::models::config::AudioManagerConfiguration;
use crate::models::error::AudioError;
use crate::models::state::{PermissionStatus, RecordingState};
use crate::processing::capture_queue::CaptureQueue;
use crate::processing::sample_convert::{self, Resampler};
use crate::processing::wav_format;
use crate::scheduling::delayed::DelayedInvocation;
use crate::scheduling::timer::TimerHandle;
use crate::session::event_log::EventLog;
use crate::session::IdleHandler;
use crate::traits::capture_device::CaptureDevice;
use crate::traits::platform::{Haptics, PermissionPrompt};

/// Receives the user's answer to the record-permission prompt.
pub type PermissionCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Receives the final captured audio once hardware teardown completes.
pub type RecordingCompletion = Box<dyn FnOnce(CapturedAudio) + Send + 'static>;

const TEARDOWN_PENDING: u8 = 0;
const TEARDOWN_SYNC: u8 = 1;
const TEARDOWN_ASYNC: u8 = 2;

/// Internal mutable recorder state, protected by `parking_lot::Mutex`.
struct RecorderState {
    state: RecordingState,
    permission: PermissionStatus,
    samples: Vec<f32>,
    id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    pending_start: Option<TimerHandle>,
    pending_completion: Option<RecordingCompletion>,
    cap_reached: bool,
    reported_dropped: u64,
}

impl RecorderState {
    fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            permission: PermissionStatus::Undetermined,
            samples: Vec::new(),
            id: None,
            started_at: None,
            pending_start: None,
            pending_completion: None,
            cap_reached: false,
            reported_dropped: 0,
        }
    }

    fn take_audio(&mut self, sample_rate: u32) -> CapturedAudio {
        let samples = std::mem::take(&mut self.samples);
        match (self.id.take(), self.started_at.take()) {
            (Some(id), Some(started_at)) => CapturedAudio::new(id, started_at, samples, sample_rate),
            _ => CapturedAudio::empty(sample_rate),
        }
    }

    fn snapshot_audio(&self, sample_rate: u32) -> CapturedAudio {
        match (self.id, self.started_at) {
            (Some(id), Some(started_at)) => {
                CapturedAudio::new(id, started_at, self.samples.clone(), sample_rate)
            }
            _ => CapturedAudio::empty(sample_rate),
        }
    }

    fn abandon(&mut self) {
        if let Some(handle) = self.pending_start.take() {
            handle.cancel();
        }
        self.samples.clear();
        self.id = None;
        self.started_at = None;
        self.state = RecordingState::Idle;
    }
}

struct RecordingInner {
    capture: Arc<dyn CaptureDevice>,
    haptics: Arc<dyn Haptics>,
    permissions: Arc<dyn PermissionPrompt>,
    delayed: DelayedInvocation,
    log: Arc<EventLog>,

    sample_rate: u32,
    resampler: Resampler,
    vibrate_delay: Duration,
    max_samples: Option<usize>,

    state: Mutex<RecorderState>,

    // Written by the capture callback, drained on the dispatcher
    queue: Mutex<CaptureQueue>,
    level: AtomicU32,
    drain_scheduled: AtomicBool,

    // Bumped on every start; buffers tagged with an older value are stale
    generation: AtomicU64,

    idle_handler: Mutex<Option<IdleHandler>>,
    weak_self: Weak<RecordingInner>,
}

impl RecordingInner {
    fn notify_idle(&self) {
        let handler = self.idle_handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn refresh_permission(&self) -> PermissionStatus {
        let platform = self.permissions.status();
        let mut st = self.state.lock();
        if platform != PermissionStatus::Undetermined {
            st.permission = platform;
        }
        st.permission
    }

    fn permission_answered(&self, granted: bool, completion: PermissionCompletion) {
        {
            let mut st = self.state.lock();
            st.permission = PermissionStatus::from_granted(granted);
            if st.state == RecordingState::AwaitingPermission {
                st.state = RecordingState::Idle;
            }
        }
        if granted {
            self.log.event("Record permission granted");
        } else {
            self.log.warn(&AudioError::PermissionDenied.to_string());
        }
        completion(granted);
    }

    fn begin_capture(&self, generation: u64) -> Result<(), AudioError> {
        if !self.capture.is_available() {
            return Err(AudioError::DeviceNotAvailable);
        }
        let weak = self.weak_self.clone();
        self.capture
            .start(Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_buffer(generation, samples, sample_rate, channels);
                }
            }))
    }

    /// Capture callback, on the hardware thread. Keep it short: convert,
    /// meter, enqueue, and make sure one drain is pending on the dispatcher.
    fn on_buffer(self: &Arc<Self>, generation: u64, samples: &[f32], sample_rate: f64, channels: u16) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let mono = wav_format::downmix_to_mono(samples, channels.max(1) as usize);
        let converted = self.resampler.resample(&mono, sample_rate);
        self.level
            .store(sample_convert::rms_level(&converted).to_bits(), Ordering::Relaxed);
        self.queue.lock().push(&converted);

        if !self.drain_scheduled.swap(true, Ordering::SeqCst) {
            self.delayed.perform_on_main(self, |inner| inner.drain());
        }
    }

    fn take_queued(&self) -> (Vec<f32>, u64) {
        let mut queue = self.queue.lock();
        let mut samples = Vec::with_capacity(queue.len());
        queue.drain_into(&mut samples);
        (samples, queue.dropped())
    }

    /// Append respecting the duration cap. Returns true the first time the
    /// cap cuts samples off.
    fn append_locked(&self, st: &mut RecorderState, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let room = match self.max_samples {
            Some(max) => max.saturating_sub(st.samples.len()),
            None => usize::MAX,
        };
        let keep = samples.len().min(room);
        st.samples.extend_from_slice(&samples[..keep]);

        if keep < samples.len() && !st.cap_reached {
            st.cap_reached = true;
            return true;
        }
        false
    }

    fn drain(&self) {
        self.drain_scheduled.store(false, Ordering::SeqCst);
        let (queued, dropped) = self.take_queued();

        let (capped, lost) = {
            let mut st = self.state.lock();
            if !matches!(
                st.state,
                RecordingState::Recording | RecordingState::StoppedWithPendingCompletion
            ) {
                return;
            }
            let capped = self.append_locked(&mut st, &queued);
            let lost = dropped.saturating_sub(st.reported_dropped);
            st.reported_dropped = dropped;
            (capped, lost)
        };

        if capped {
            self.log_cap_reached();
        }
        if lost > 0 {
            self.log
                .warn(&format!("Capture queue overflowed; {} samples lost", lost));
        }
    }

    fn log_cap_reached(&self) {
        let limit = self
            .max_samples
            .map(|max| max as f64 / self.sample_rate as f64)
            .unwrap_or_default();
        self.log.event(&format!(
            "Recording reached its {:.1}s limit; further audio is discarded",
            limit
        ));
    }

    fn finish_delayed_start(&self, generation: u64) {
        {
            let mut st = self.state.lock();
            if st.state != RecordingState::Preparing || self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            st.pending_start = None;
        }

        match self.begin_capture(generation) {
            Ok(()) => {
                self.state.lock().state = RecordingState::Recording;
                self.log.event(&format!("Recording started at {} Hz", self.sample_rate));
            }
            Err(e) => {
                self.state.lock().abandon();
                self.log.warn(&format!("Recording failed to start after haptic: {}", e));
                self.notify_idle();
            }
        }
    }

    /// Ask the hardware to stop and hand the pending completion its final
    /// audio once it confirms. Finishes inline if the confirmation arrives
    /// before `stop` returns.
    fn teardown_with_completion(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let token = Arc::new(AtomicU8::new(TEARDOWN_PENDING));
        let callback_token = Arc::clone(&token);
        let weak = self.weak_self.clone();
        let delayed = self.delayed.clone();

        self.capture.stop(Box::new(move || {
            if callback_token
                .compare_exchange(TEARDOWN_PENDING, TEARDOWN_SYNC, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                delayed.perform_on_main(&inner, move |inner| inner.finish_teardown(generation));
            }
        }));

        if token
            .compare_exchange(TEARDOWN_PENDING, TEARDOWN_ASYNC, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.finish_teardown(generation);
        }
    }

    fn finish_teardown(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let (queued, _) = self.take_queued();

        let (audio, completion, capped) = {
            let mut st = self.state.lock();
            if st.state != RecordingState::StoppedWithPendingCompletion {
                return;
            }
            let capped = self.append_locked(&mut st, &queued);
            let audio = st.take_audio(self.sample_rate);
            st.state = RecordingState::Idle;
            (audio, st.pending_completion.take(), capped)
        };

        if capped {
            self.log_cap_reached();
        }
        self.log.event(&format!(
            "Capture teardown complete; {:.2}s delivered",
            audio.duration().as_secs_f64()
        ));
        if let Some(completion) = completion {
            completion(audio);
        }
    }
}

/// Owns the microphone lifecycle: permission, start (optionally after a
/// haptic cue), live metering, and stop with copy-out of the captured audio.
///
/// State transitions:
/// ```text
/// idle → awaiting_permission → idle
/// idle → preparing ──(vibrate delay)──→ recording
/// idle → recording → idle                                  (stop)
///                  → stopped_with_pending_completion → idle (stop_with_completion)
/// ```
///
/// Capture data flow:
/// ```text
/// [CaptureDevice thread] → downmix → resample → [CaptureQueue] ──drain on dispatcher──→ captured buffer
/// ```
pub struct RecordingSession {
    inner: Arc<RecordingInner>,
}

impl RecordingSession {
    pub fn new(
        capture: Arc<dyn CaptureDevice>,
        haptics: Arc<dyn Haptics>,
        permissions: Arc<dyn PermissionPrompt>,
        delayed: DelayedInvocation,
        log: Arc<EventLog>,
        config: &AudioManagerConfiguration,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| RecordingInner {
            capture,
            haptics,
            permissions,
            delayed,
            log,
            sample_rate: config.capture_rate_hz(),
            resampler: Resampler::new(config.capture_sample_rate),
            vibrate_delay: config.vibrate_delay(),
            max_samples: config.max_recording_samples(),
            state: Mutex::new(RecorderState::new()),
            queue: Mutex::new(CaptureQueue::new(config.capture_queue_capacity())),
            level: AtomicU32::new(0),
            drain_scheduled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            idle_handler: Mutex::new(None),
            weak_self: weak.clone(),
        });
        Self { inner }
    }

    /// Called whenever the session leaves `preparing`/`recording`, before
    /// any user completion runs.
    pub fn set_idle_handler(&self, handler: IdleHandler) {
        *self.inner.idle_handler.lock() = Some(handler);
    }

    pub fn state(&self) -> RecordingState {
        self.inner.state.lock().state
    }

    /// True from an accepted `start` until the matching stop, including the
    /// vibrate-first delay.
    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    pub fn permission_status(&self) -> PermissionStatus {
        self.inner.refresh_permission()
    }

    /// Prompt for microphone access. `completion` runs once on the
    /// dispatcher with the answer. Never starts capture.
    pub fn request_permission(&self, completion: PermissionCompletion) {
        {
            let mut st = self.inner.state.lock();
            if st.state.is_idle() {
                st.state = RecordingState::AwaitingPermission;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let delayed = self.inner.delayed.clone();
        self.inner.permissions.request(Box::new(move |granted: bool| match weak.upgrade() {
            Some(inner) => {
                delayed.perform_on_main(&inner, move |inner| inner.permission_answered(granted, completion));
            }
            None => delayed.dispatcher().dispatch(Box::new(move || completion(granted))),
        }));
    }

    pub fn can_start(&self) -> bool {
        self.start_blocker().is_none()
    }

    /// Why `start` would refuse right now, or `None` if it would not.
    pub fn start_blocker(&self) -> Option<&'static str> {
        if !self.inner.refresh_permission().is_granted() {
            return Some("no record permission");
        }
        match self.state() {
            RecordingState::Idle => None,
            RecordingState::AwaitingPermission => Some("permission prompt still open"),
            RecordingState::Preparing | RecordingState::Recording => Some("already recording"),
            RecordingState::StoppedWithPendingCompletion => {
                Some("previous recording is still tearing down")
            }
        }
    }

    /// Start a new recording. Returns false, changing nothing, if
    /// permission is missing, a recording is in progress, or the hardware
    /// refuses to start.
    ///
    /// With `vibrate_first`, the haptic plays now and capture begins after
    /// the configured delay; a failure at that point is logged and reported
    /// through the idle handler.
    pub fn start(&self, vibrate_first: bool) -> bool {
        if let Some(blocker) = self.start_blocker() {
            self.inner
                .log
                .event(&format!("Recording not started: {}", blocker));
            return false;
        }

        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.queue.lock().reset();
        inner.level.store(0f32.to_bits(), Ordering::Relaxed);
        inner.drain_scheduled.store(false, Ordering::SeqCst);
        {
            let mut st = inner.state.lock();
            st.samples.clear();
            st.id = Some(Uuid::new_v4());
            st.started_at = Some(Utc::now());
            st.cap_reached = false;
            st.reported_dropped = 0;
        }

        if vibrate_first {
            inner.haptics.vibrate();
            inner.state.lock().state = RecordingState::Preparing;
            let handle = inner
                .delayed
                .perform_after(inner, inner.vibrate_delay, move |inner| {
                    inner.finish_delayed_start(generation)
                });
            inner.state.lock().pending_start = Some(handle);
            inner.log.event(&format!(
                "Recording will start in {} ms",
                inner.vibrate_delay.as_millis()
            ));
            return true;
        }

        match inner.begin_capture(generation) {
            Ok(()) => {
                inner.state.lock().state = RecordingState::Recording;
                inner
                    .log
                    .event(&format!("Recording started at {} Hz", inner.sample_rate));
                true
            }
            Err(e) => {
                inner.state.lock().abandon();
                inner.log.warn(&format!("Recording failed to start: {}", e));
                false
            }
        }
    }

    /// Stop and return everything captured so far. Returns immediately;
    /// hardware teardown finishes in the background. Not recording → empty.
    pub fn stop(&self) -> CapturedAudio {
        let inner = &self.inner;
        let (queued, _) = inner.take_queued();

        let mut st = inner.state.lock();
        match st.state {
            RecordingState::Recording => {
                let capped = inner.append_locked(&mut st, &queued);
                let audio = st.take_audio(inner.sample_rate);
                st.state = RecordingState::Idle;
                drop(st);

                inner.level.store(0f32.to_bits(), Ordering::Relaxed);
                inner
                    .capture
                    .stop(Box::new(|| log::debug!("Capture teardown complete")));
                if capped {
                    inner.log_cap_reached();
                }
                inner.log.event(&format!(
                    "Recording stopped; {:.2}s captured",
                    audio.duration().as_secs_f64()
                ));
                inner.notify_idle();
                audio
            }
            RecordingState::Preparing => {
                st.abandon();
                drop(st);
                inner.log.event("Recording cancelled before capture started");
                inner.notify_idle();
                CapturedAudio::empty(inner.sample_rate)
            }
            RecordingState::Idle
            | RecordingState::AwaitingPermission
            | RecordingState::StoppedWithPendingCompletion => CapturedAudio::empty(inner.sample_rate),
        }
    }

    /// Like `stop`, and additionally hand `completion` the final audio (what
    /// this returns plus any trailing buffers) once the hardware confirms
    /// teardown. If that confirmation is immediate, `completion` runs before
    /// this returns.
    pub fn stop_with_completion(&self, completion: RecordingCompletion) -> CapturedAudio {
        let inner = &self.inner;
        let (queued, _) = inner.take_queued();

        let mut st = inner.state.lock();
        match st.state {
            RecordingState::Recording => {
                let capped = inner.append_locked(&mut st, &queued);
                let audio = st.snapshot_audio(inner.sample_rate);
                st.state = RecordingState::StoppedWithPendingCompletion;
                st.pending_completion = Some(completion);
                drop(st);

                inner.level.store(0f32.to_bits(), Ordering::Relaxed);
                if capped {
                    inner.log_cap_reached();
                }
                inner.log.event(&format!(
                    "Recording stopped; {:.2}s captured, awaiting teardown",
                    audio.duration().as_secs_f64()
                ));
                inner.notify_idle();
                inner.teardown_with_completion();
                audio
            }
            RecordingState::Preparing => {
                st.abandon();
                drop(st);
                inner.log.event("Recording cancelled before capture started");
                inner.notify_idle();
                completion(CapturedAudio::empty(inner.sample_rate));
                CapturedAudio::empty(inner.sample_rate)
            }
            RecordingState::Idle
            | RecordingState::AwaitingPermission
            | RecordingState::StoppedWithPendingCompletion => {
                drop(st);
                completion(CapturedAudio::empty(inner.sample_rate));
                CapturedAudio::empty(inner.sample_rate)
            }
        }
    }

    /// RMS of the most recent buffer while recording; 0 otherwise.
    pub fn average_level(&self) -> f32 {
        if self.state() != RecordingState::Recording {
            return 0.0;
        }
        f32::from_bits(self.inner.level.load(Ordering::Relaxed))
    }

    /// Sample rate of the audio this session returns.
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedHardware;
    use crate::scheduling::dispatcher::MainQueue;
    use crate::scheduling::timer::ManualTimer;
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        hw: Arc<SimulatedHardware>,
        queue: Arc<MainQueue>,
        timer: Arc<ManualTimer>,
        session: RecordingSession,
    }

    fn fixture_with(config: AudioManagerConfiguration) -> Fixture {
        let hw = SimulatedHardware::new();
        hw.set_permission_status(PermissionStatus::Granted);
        let queue = Arc::new(MainQueue::new());
        let timer = Arc::new(ManualTimer::new());
        let delayed = DelayedInvocation::new(timer.clone(), queue.clone());
        let session = RecordingSession::new(
            hw.clone(),
            hw.clone(),
            hw.clone(),
            delayed,
            Arc::new(EventLog::new()),
            &config,
        );
        Fixture {
            hw,
            queue,
            timer,
            session,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(AudioManagerConfiguration::default())
    }

    fn idle_counter(session: &RecordingSession) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        session.set_idle_handler(Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    fn capture_slot() -> (Arc<Mutex<Option<CapturedAudio>>>, RecordingCompletion) {
        let slot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, Box::new(move |audio: CapturedAudio| *writer.lock() = Some(audio)))
    }

    #[test]
    fn start_requires_permission() {
        let f = fixture();
        f.hw.set_permission_status(PermissionStatus::Undetermined);

        assert!(!f.session.can_start());
        assert!(!f.session.start(false));
        assert_eq!(f.session.state(), RecordingState::Idle);
        assert_eq!(f.hw.capture_starts(), 0);
    }

    #[test]
    fn permission_answer_is_redispatched_once() {
        let f = fixture();
        f.hw.set_permission_status(PermissionStatus::Undetermined);
        f.hw.set_defer_permission(true);

        let answers = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&answers);
        f.session
            .request_permission(Box::new(move |granted: bool| sink.lock().push(granted)));
        assert_eq!(f.session.state(), RecordingState::AwaitingPermission);

        assert!(f.hw.resolve_permission(true));
        assert!(answers.lock().is_empty());

        f.queue.run_pending();
        assert_eq!(*answers.lock(), vec![true]);
        assert_eq!(f.session.state(), RecordingState::Idle);
        assert_eq!(f.session.permission_status(), PermissionStatus::Granted);
        assert!(f.session.can_start());
    }

    #[test]
    fn permission_denial_blocks_recording() {
        let f = fixture();
        f.hw.set_permission_status(PermissionStatus::Undetermined);
        f.hw.set_permission_answer(false);

        let answer = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&answer);
        f.session
            .request_permission(Box::new(move |granted: bool| *sink.lock() = Some(granted)));
        f.queue.run_pending();

        assert_eq!(*answer.lock(), Some(false));
        assert!(!f.session.start(false));
    }

    #[test]
    fn record_then_stop_returns_samples() {
        let f = fixture();
        assert!(f.session.start(false));
        assert!(f.session.is_recording());
        assert!(f.hw.is_capturing());

        f.hw.feed_capture(&[0.5; 1600], 16000.0, 1);
        f.queue.run_pending();
        f.hw.feed_capture(&[0.5; 1600], 16000.0, 1);

        // The second buffer is still queued; stop drains it synchronously.
        let audio = f.session.stop();
        assert_eq!(audio.len(), 3200);
        assert!(audio.id().is_some());
        assert_relative_eq!(audio.duration().as_secs_f64(), 0.2);
        assert!(!f.session.is_recording());
        assert!(!f.hw.is_capturing());

        let again = f.session.stop();
        assert!(again.is_empty());
        assert!(again.id().is_none());
    }

    #[test]
    fn level_meters_while_recording_only() {
        let f = fixture();
        assert_eq!(f.session.average_level(), 0.0);

        f.session.start(false);
        f.hw.feed_capture(&[0.5; 160], 16000.0, 1);
        assert_relative_eq!(f.session.average_level(), 0.5, epsilon = 1e-6);

        f.session.stop();
        assert_eq!(f.session.average_level(), 0.0);
    }

    #[test]
    fn converts_to_mono_capture_rate() {
        let f = fixture();
        f.session.start(false);

        // 320 stereo frames at 32 kHz → 160 mono samples at 16 kHz
        f.hw.feed_capture(&[0.25; 640], 32000.0, 2);
        let audio = f.session.stop();
        assert_eq!(audio.len(), 160);
        assert_eq!(audio.sample_rate(), 16000);
    }

    #[test]
    fn buffers_are_drained_in_one_coalesced_task() {
        let f = fixture();
        f.session.start(false);
        for _ in 0..5 {
            f.hw.feed_capture(&[0.1; 100], 16000.0, 1);
        }
        assert_eq!(f.queue.pending(), 1);
        assert_eq!(f.queue.run_pending(), 1);
        assert_eq!(f.session.stop().len(), 500);
    }

    #[test]
    fn vibrate_first_delays_capture() {
        let f = fixture();
        assert!(f.session.start(true));
        assert_eq!(f.hw.vibrations(), 1);
        assert_eq!(f.session.state(), RecordingState::Preparing);
        assert!(f.session.is_recording());
        assert!(!f.hw.is_capturing());

        f.timer.advance(Duration::from_millis(299));
        f.queue.run_pending();
        assert!(!f.hw.is_capturing());

        f.timer.advance(Duration::from_millis(1));
        f.queue.run_pending();
        assert!(f.hw.is_capturing());
        assert_eq!(f.session.state(), RecordingState::Recording);
    }

    #[test]
    fn stop_during_vibrate_delay_cancels_start() {
        let f = fixture();
        let idle = idle_counter(&f.session);
        f.session.start(true);

        let audio = f.session.stop();
        assert!(audio.is_empty());
        assert_eq!(idle.load(Ordering::SeqCst), 1);

        f.timer.advance(Duration::from_secs(1));
        f.queue.run_pending();
        assert_eq!(f.hw.capture_starts(), 0);
        assert_eq!(f.session.state(), RecordingState::Idle);
    }

    #[test]
    fn delayed_start_failure_returns_to_idle() {
        let f = fixture();
        let idle = idle_counter(&f.session);
        f.hw.set_fail_capture_start(true);

        assert!(f.session.start(true));
        f.timer.advance(Duration::from_millis(300));
        f.queue.run_pending();

        assert_eq!(f.session.state(), RecordingState::Idle);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_start_failure_changes_nothing() {
        let f = fixture();
        f.hw.set_fail_capture_start(true);
        assert!(!f.session.start(false));
        assert_eq!(f.session.state(), RecordingState::Idle);
        assert!(f.session.can_start());
    }

    #[test]
    fn stop_with_completion_fires_inline_on_sync_teardown() {
        let f = fixture();
        let idle = idle_counter(&f.session);
        f.session.start(false);
        f.hw.feed_capture(&[0.3; 800], 16000.0, 1);

        let (slot, completion) = capture_slot();
        let returned = f.session.stop_with_completion(completion);

        let delivered = slot.lock().take().expect("completion before return");
        assert_eq!(returned.len(), 800);
        assert_eq!(delivered, returned);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert_eq!(f.session.state(), RecordingState::Idle);
    }

    #[test]
    fn stop_with_completion_waits_for_async_teardown() {
        let f = fixture();
        f.hw.set_async_teardown(true);
        f.session.start(false);
        f.hw.feed_capture(&[0.3; 800], 16000.0, 1);

        let (slot, completion) = capture_slot();
        let returned = f.session.stop_with_completion(completion);
        assert_eq!(returned.len(), 800);
        assert!(slot.lock().is_none());
        assert_eq!(f.session.state(), RecordingState::StoppedWithPendingCompletion);
        assert!(!f.session.is_recording());
        assert!(!f.session.can_start());

        // Trailing audio before teardown completes belongs to the final buffer.
        f.hw.feed_capture(&[0.3; 200], 16000.0, 1);
        f.queue.run_pending();
        assert!(f.hw.complete_teardown());
        assert!(slot.lock().is_none(), "teardown is redispatched");

        f.queue.run_pending();
        let delivered = slot.lock().take().unwrap();
        assert_eq!(delivered.len(), 1000);
        assert_eq!(delivered.id(), returned.id());
        assert_eq!(f.session.state(), RecordingState::Idle);
    }

    #[test]
    fn start_blocker_names_the_reason() {
        let f = fixture();
        f.hw.set_async_teardown(true);
        assert_eq!(f.session.start_blocker(), None);

        f.session.start(false);
        assert_eq!(f.session.start_blocker(), Some("already recording"));

        let (_, completion) = capture_slot();
        f.session.stop_with_completion(completion);
        assert_eq!(
            f.session.start_blocker(),
            Some("previous recording is still tearing down")
        );
        assert!(!f.session.start(false));
        assert_eq!(f.hw.capture_starts(), 1);

        f.hw.complete_teardown();
        f.queue.run_pending();
        assert!(f.session.start(false));

        f.session.stop();
        f.hw.set_permission_status(PermissionStatus::Denied);
        assert_eq!(f.session.start_blocker(), Some("no record permission"));
    }

    #[test]
    fn stop_with_completion_when_idle_fires_empty() {
        let f = fixture();
        let (slot, completion) = capture_slot();
        let returned = f.session.stop_with_completion(completion);
        assert!(returned.is_empty());
        assert!(slot.lock().take().unwrap().is_empty());
    }

    #[test]
    fn max_duration_caps_buffer() {
        let f = fixture_with(AudioManagerConfiguration {
            max_recording_secs: Some(0.5),
            ..Default::default()
        });
        f.session.start(false);
        f.hw.feed_capture(&[0.1; 5000], 16000.0, 1);
        f.queue.run_pending();
        f.hw.feed_capture(&[0.1; 5000], 16000.0, 1);
        f.queue.run_pending();

        assert_eq!(f.session.stop().len(), 8000);
    }

    #[test]
    fn trailing_buffers_after_stop_are_discarded() {
        let f = fixture();
        f.hw.set_async_teardown(true);
        f.session.start(false);
        f.session.stop();

        f.hw.feed_capture(&[0.1; 100], 16000.0, 1);
        f.queue.run_pending();
        assert!(f.hw.complete_teardown());

        f.session.start(false);
        let audio = f.session.stop();
        assert!(audio.is_empty());
        assert_ne!(audio.id(), None);
    }

    #[test]
    fn dropped_session_skips_pending_start() {
        let f = fixture();
        f.session.start(true);
        drop(f.session);

        f.timer.advance(Duration::from_secs(1));
        f.queue.run_pending();
        assert_eq!(f.hw.capture_starts(), 0);
    }
}
