use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio::AudioClip;
use crate::models::error::AudioError;
use crate::models::policy::VolumeLevel;
use crate::models::state::PlaybackState;
use crate::scheduling::delayed::DelayedInvocation;
use crate::session::event_log::EventLog;
use crate::session::IdleHandler;
use crate::traits::output_device::OutputDevice;
use crate::traits::speech::SpeechSynthesizer;

/// Receives `true` if the playback ran to its natural end.
pub type PlaybackCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// One part of a logical playback, before synthesis.
enum PlaybackSource {
    Clip(AudioClip),
    Speech { text: String, language: Option<String> },
}

enum Segment {
    /// Speech still being synthesized.
    Pending,
    Ready(Arc<AudioClip>),
}

struct ActivePlayback {
    generation: u64,
    segments: Vec<Segment>,
    index: usize,
    /// Whether `segments[index]` is on the output right now.
    output_live: bool,
    /// Total duration of the segments already finished.
    elapsed: Duration,
    /// Duration of every segment rendered so far.
    total: Duration,
    completion: PlaybackCompletion,
}

struct PlayerState {
    state: PlaybackState,
    active: Option<ActivePlayback>,
    gain: f32,
}

enum Step {
    Start(usize, Arc<AudioClip>, f32),
    Wait,
    Finish(bool),
}

struct PlaybackInner {
    output: Arc<dyn OutputDevice>,
    speech: Arc<dyn SpeechSynthesizer>,
    delayed: DelayedInvocation,
    log: Arc<EventLog>,
    state: Mutex<PlayerState>,
    generation: AtomicU64,
    idle_handler: Mutex<Option<IdleHandler>>,
    weak_self: Weak<PlaybackInner>,
}

impl PlaybackInner {
    fn notify_idle(&self) {
        let handler = self.idle_handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Stop whatever is playing and hand back its completion. `None` if idle.
    fn interrupt(&self) -> Option<PlaybackCompletion> {
        let active = {
            let mut st = self.state.lock();
            st.state = PlaybackState::Idle;
            st.active.take()
        }?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.output.stop();
        Some(active.completion)
    }

    /// Ask the synthesizer for segment `index`. The result comes back
    /// through the dispatcher tagged with `generation`.
    fn request_speech(&self, generation: u64, index: usize, text: &str, language: Option<&str>) {
        let weak = self.weak_self.clone();
        let delayed = self.delayed.clone();
        self.speech.synthesize(
            text,
            language,
            Box::new(move |result: Result<AudioClip, AudioError>| {
                if let Some(inner) = weak.upgrade() {
                    delayed.perform_on_main(&inner, move |inner| {
                        inner.speech_ready(generation, index, result)
                    });
                }
            }),
        );
    }

    /// Synthesizer callback, already on the dispatcher.
    fn speech_ready(&self, generation: u64, index: usize, result: Result<AudioClip, AudioError>) {
        let clip = match result {
            Ok(clip) => clip,
            Err(e) => {
                if self.is_current(generation) {
                    self.log.warn(&format!("Playback stopped: {}", e));
                    self.finish(generation, false);
                }
                return;
            }
        };

        {
            let mut st = self.state.lock();
            let Some(active) = st.active.as_mut() else {
                return;
            };
            if active.generation != generation {
                return;
            }
            let Some(segment) = active.segments.get_mut(index) else {
                return;
            };
            active.total += clip.duration();
            *segment = Segment::Ready(Arc::new(clip));
        }
        self.advance(generation);
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(&self.state.lock().active, Some(active) if active.generation == generation)
    }

    /// Start the current segment if it is ready and nothing is on the
    /// output. Empty segments are skipped; past the last one the playback
    /// completes.
    fn advance(&self, generation: u64) {
        let step = {
            let mut st = self.state.lock();
            let gain = st.gain;
            let Some(active) = st.active.as_mut() else {
                return;
            };
            if active.generation != generation || active.output_live {
                return;
            }
            loop {
                match active.segments.get(active.index) {
                    None => break Step::Finish(true),
                    Some(Segment::Pending) => break Step::Wait,
                    Some(Segment::Ready(clip)) if clip.is_empty() => active.index += 1,
                    Some(Segment::Ready(clip)) => {
                        active.output_live = true;
                        break Step::Start(active.index, Arc::clone(clip), gain);
                    }
                }
            }
        };

        match step {
            Step::Start(index, clip, gain) => self.start_segment(generation, index, &clip, gain),
            Step::Wait => log::debug!("Playback waiting for speech"),
            Step::Finish(success) => self.finish(generation, success),
        }
    }

    fn start_segment(&self, generation: u64, index: usize, clip: &AudioClip, gain: f32) {
        let weak = self.weak_self.clone();
        let delayed = self.delayed.clone();
        let started = self.output.start(
            clip,
            gain,
            Box::new(move |played_to_end: bool| {
                if let Some(inner) = weak.upgrade() {
                    delayed.perform_on_main(&inner, move |inner| {
                        inner.segment_finished(generation, index, played_to_end)
                    });
                }
            }),
        );

        if let Err(e) = started {
            self.log.warn(&format!("Playback failed to start: {}", e));
            self.finish(generation, false);
        }
    }

    /// Output callback, already on the dispatcher.
    fn segment_finished(&self, generation: u64, index: usize, played_to_end: bool) {
        {
            let mut st = self.state.lock();
            let Some(active) = st.active.as_mut() else {
                return;
            };
            if active.generation != generation || active.index != index || !active.output_live {
                return;
            }
            active.output_live = false;
            if played_to_end {
                if let Some(Segment::Ready(clip)) = active.segments.get(index) {
                    active.elapsed += clip.duration();
                }
                active.index += 1;
            }
        }

        if played_to_end {
            self.advance(generation);
        } else {
            self.finish(generation, false);
        }
    }

    fn finish(&self, generation: u64, success: bool) {
        let active = {
            let mut st = self.state.lock();
            match &st.active {
                Some(active) if active.generation == generation => {}
                _ => return,
            }
            st.state = PlaybackState::Idle;
            st.active.take()
        };
        let Some(active) = active else {
            return;
        };
        if active.output_live {
            self.output.stop();
        }

        if success {
            self.log.event("Playback finished");
        } else {
            self.log.warn("Playback ended before completion");
        }
        self.notify_idle();
        (active.completion)(success);
    }
}

/// Owns the output lifecycle: clips, synthesized speech, or a clip followed
/// by speech as one logical playback.
///
/// ```text
/// play ──supersede previous (completion false)──→ request speech ──→ segment 0 → segment 1 → … → completion(true)
///                                                       └─ a segment starts once its speech arrives
/// ```
///
/// Output and synthesizer callbacks are tagged with (generation, segment
/// index) and redispatched; anything from a superseded playback is ignored.
/// The total duration grows as speech arrives.
pub struct PlaybackSession {
    inner: Arc<PlaybackInner>,
}

impl PlaybackSession {
    pub fn new(
        output: Arc<dyn OutputDevice>,
        speech: Arc<dyn SpeechSynthesizer>,
        delayed: DelayedInvocation,
        log: Arc<EventLog>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| PlaybackInner {
            output,
            speech,
            delayed,
            log,
            state: Mutex::new(PlayerState {
                state: PlaybackState::Idle,
                active: None,
                gain: VolumeLevel::default().gain(),
            }),
            generation: AtomicU64::new(0),
            idle_handler: Mutex::new(None),
            weak_self: weak.clone(),
        });
        Self { inner }
    }

    /// Called when playback ends by itself, fails, or is stopped (not when
    /// superseded), before the user completion runs.
    pub fn set_idle_handler(&self, handler: IdleHandler) {
        *self.inner.idle_handler.lock() = Some(handler);
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.state.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    pub fn play_clip(&self, clip: AudioClip, completion: PlaybackCompletion) {
        self.play(vec![PlaybackSource::Clip(clip)], completion);
    }

    /// Synthesize and play `text`. `language` is a BCP-47 code.
    pub fn play_text(&self, text: &str, language: Option<&str>, completion: PlaybackCompletion) {
        self.play(
            vec![PlaybackSource::Speech {
                text: text.to_string(),
                language: language.map(str::to_string),
            }],
            completion,
        );
    }

    /// Play `clip`, then the synthesized `text`, as one playback with one completion.
    pub fn play_clip_then_text(
        &self,
        clip: AudioClip,
        text: &str,
        language: Option<&str>,
        completion: PlaybackCompletion,
    ) {
        self.play(
            vec![
                PlaybackSource::Clip(clip),
                PlaybackSource::Speech {
                    text: text.to_string(),
                    language: language.map(str::to_string),
                },
            ],
            completion,
        );
    }

    fn play(&self, sources: Vec<PlaybackSource>, completion: PlaybackCompletion) {
        let inner = &self.inner;

        if let Some(superseded) = inner.interrupt() {
            inner.log.event("Playback superseded by a new request");
            superseded(false);
        }

        let sources: Vec<PlaybackSource> = sources
            .into_iter()
            .filter(|source| !matches!(source, PlaybackSource::Clip(clip) if clip.is_empty()))
            .collect();
        if sources.is_empty() {
            inner.log.event("Playback requested with no audio; completing");
            inner.notify_idle();
            completion(true);
            return;
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut segments = Vec::with_capacity(sources.len());
        let mut speech = Vec::new();
        for (index, source) in sources.into_iter().enumerate() {
            match source {
                PlaybackSource::Clip(clip) => segments.push(Segment::Ready(Arc::new(clip))),
                PlaybackSource::Speech { text, language } => {
                    segments.push(Segment::Pending);
                    speech.push((index, text, language));
                }
            }
        }
        let total: Duration = segments
            .iter()
            .map(|segment| match segment {
                Segment::Ready(clip) => clip.duration(),
                Segment::Pending => Duration::ZERO,
            })
            .sum();
        let count = segments.len();
        {
            let mut st = inner.state.lock();
            st.state = PlaybackState::Playing;
            st.active = Some(ActivePlayback {
                generation,
                segments,
                index: 0,
                output_live: false,
                elapsed: Duration::ZERO,
                total,
                completion,
            });
        }

        inner.log.event(&format!(
            "Playback started: {} segment(s), {} to synthesize",
            count,
            speech.len()
        ));
        for (index, text, language) in speech {
            inner.request_speech(generation, index, &text, language.as_deref());
        }
        inner.advance(generation);
    }

    /// Stop the current playback; its completion receives `false`. No-op when idle.
    pub fn stop(&self) {
        let Some(completion) = self.inner.interrupt() else {
            return;
        };
        self.inner.log.event("Playback stopped");
        self.inner.notify_idle();
        completion(false);
    }

    /// Elapsed over total duration of the current playback, 0 when idle.
    pub fn progress(&self) -> f64 {
        let (elapsed, current, total) = {
            let st = self.inner.state.lock();
            let Some(active) = &st.active else {
                return 0.0;
            };
            let current = match active.segments.get(active.index) {
                Some(Segment::Ready(clip)) if active.output_live => clip.duration(),
                _ => Duration::ZERO,
            };
            (active.elapsed, current, active.total)
        };

        if total.is_zero() {
            return 0.0;
        }
        let position = self.inner.output.position().min(current);
        ((elapsed + position).as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Output gain for the live clip and everything played after.
    pub fn set_gain(&self, gain: f32) {
        let playing = {
            let mut st = self.inner.state.lock();
            st.gain = gain;
            st.state.is_playing()
        };
        if playing {
            self.inner.output.set_gain(gain);
        }
    }

    pub fn gain(&self) -> f32 {
        self.inner.state.lock().gain
    }
}
