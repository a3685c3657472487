use crate::models::audio::AudioClip;
use crate::models::error::AudioError;

/// Invoked once with the rendered speech or the reason it failed.
pub type SpeechCallback = Box<dyn FnOnce(Result<AudioClip, AudioError>) + Send + 'static>;

/// Text-to-speech engine, treated as a producer of audio samples.
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` without blocking the caller. `language` is a BCP-47
    /// code; `None` means the engine's default. `on_done` may fire on any
    /// thread, possibly before this returns.
    fn synthesize(&self, text: &str, language: Option<&str>, on_done: SpeechCallback);
}
