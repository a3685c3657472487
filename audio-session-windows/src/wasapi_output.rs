//! WASAPI clip output.
//!
//! Each clip gets its own shared-mode render stream on a dedicated thread.
//! The endpoint comes from the session's `EndpointSelection`, falling back
//! to the console default.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_session_core::models::audio::AudioClip;
use audio_session_core::models::error::AudioError;
use audio_session_core::traits::output_device::{OutputDevice, OutputFinishedCallback};

use crate::clip_render::{to_mix_format, write_scaled};
use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;
use crate::session::EndpointSelection;

const BUFFER_DURATION: i64 = 1_000_000;

/// State shared between the device and one render thread.
struct RenderControl {
    running: AtomicBool,
    gain_bits: AtomicU32,
    frames_played: AtomicU64,
    mix_rate: AtomicU32,
    on_finished: Mutex<Option<OutputFinishedCallback>>,
}

impl RenderControl {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    /// Runs the completion at most once, whoever gets here first.
    fn finish(&self, played_to_end: bool) {
        let done = self.on_finished.lock().take();
        if let Some(done) = done {
            done(played_to_end);
        }
    }

    fn position(&self) -> Duration {
        let rate = self.mix_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_played.load(Ordering::Relaxed) as f64 / rate as f64)
    }
}

pub struct WasapiOutput {
    selection: EndpointSelection,
    current: Mutex<Option<Arc<RenderControl>>>,
}

impl WasapiOutput {
    pub fn new(selection: EndpointSelection) -> Self {
        Self {
            selection,
            current: Mutex::new(None),
        }
    }

    fn interrupt_current(&self) {
        let previous = self.current.lock().take();
        if let Some(control) = previous {
            control.running.store(false, Ordering::SeqCst);
            control.finish(false);
        }
    }
}

impl OutputDevice for WasapiOutput {
    fn start(&self, clip: &AudioClip, gain: f32, on_finished: OutputFinishedCallback) -> std::result::Result<(), AudioError> {
        self.interrupt_current();

        let control = Arc::new(RenderControl {
            running: AtomicBool::new(true),
            gain_bits: AtomicU32::new(gain.to_bits()),
            frames_played: AtomicU64::new(0),
            mix_rate: AtomicU32::new(0),
            on_finished: Mutex::new(Some(on_finished)),
        });
        let clip = clip.clone();
        let endpoint = self.selection.get();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_control = Arc::clone(&control);
        thread::Builder::new()
            .name("wasapi-render".into())
            .spawn(move || {
                let played_to_end = match render_loop(&thread_control, &clip, endpoint.as_deref(), ready_tx) {
                    Ok(done) => done,
                    Err(e) => {
                        log::error!("Render error: {}", e);
                        false
                    }
                };
                thread_control.running.store(false, Ordering::SeqCst);
                thread_control.finish(played_to_end);
            })
            .map_err(|e| AudioError::PlaybackFailed(format!("failed to spawn render thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.current.lock() = Some(control);
                Ok(())
            }
            Ok(Err(e)) => Err(AudioError::PlaybackFailed(e.to_string())),
            Err(_) => {
                control.on_finished.lock().take();
                Err(AudioError::PlaybackFailed("render thread exited during setup".into()))
            }
        }
    }

    fn stop(&self) {
        self.interrupt_current();
    }

    fn set_gain(&self, gain: f32) {
        if let Some(control) = self.current.lock().as_ref() {
            control.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    fn position(&self) -> Duration {
        self.current
            .lock()
            .as_ref()
            .map(|control| control.position())
            .unwrap_or_default()
    }
}

/// Returns whether the clip played to the end.
fn render_loop(
    control: &RenderControl,
    clip: &AudioClip,
    endpoint: Option<&str>,
    ready: mpsc::Sender<std::result::Result<(), WasapiError>>,
) -> std::result::Result<bool, WasapiError> {
    let setup = (|| -> std::result::Result<_, WasapiError> { unsafe {
        let com = ComScope::enter()?;
        let enumerator = DeviceEnumerator::new()?;
        let device = match enumerator.render_device(endpoint) {
            Ok(device) => device,
            Err(_) if endpoint.is_some() => {
                log::warn!("Selected output vanished; using the default endpoint");
                enumerator.render_device(None)?
            }
            Err(e) => return Err(e),
        };

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(WasapiError::call("IMMDevice::Activate"))?;
        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(WasapiError::call("GetMixFormat"))?;
        let mix_format = &*mix_format_ptr;
        let mix_rate = mix_format.nSamplesPerSec;
        let mix_channels = mix_format.nChannels;
        let bits = mix_format.wBitsPerSample;

        let initialized = audio_client
            .Initialize(AUDCLNT_SHAREMODE_SHARED, 0, BUFFER_DURATION, 0, mix_format, None)
            .map_err(WasapiError::call("IAudioClient::Initialize"));
        CoTaskMemFree(Some(mix_format_ptr as *const _));
        initialized?;
        if bits != 32 {
            return Err(WasapiError::UnsupportedFormat(format!("{}-bit mix format", bits)));
        }

        let buffer_frames = audio_client
            .GetBufferSize()
            .map_err(WasapiError::call("GetBufferSize"))?;
        let render_client: IAudioRenderClient = audio_client
            .GetService()
            .map_err(WasapiError::call("GetService(IAudioRenderClient)"))?;

        Ok((com, audio_client, render_client, buffer_frames, mix_rate, mix_channels))
    } })();

    let (_com, audio_client, render_client, buffer_frames, mix_rate, mix_channels) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            // Surfaced by `start` instead of the completion.
            control.on_finished.lock().take();
            let _ = ready.send(Err(e));
            return Ok(false);
        }
    };

    let frames = to_mix_format(clip, mix_rate, mix_channels);
    let channels = mix_channels as usize;
    let total_frames = (frames.len() / channels) as u64;
    control.mix_rate.store(mix_rate, Ordering::Relaxed);

    if let Err(e) = unsafe { audio_client.Start() } {
        control.on_finished.lock().take();
        let _ = ready.send(Err(WasapiError::Call {
            call: "IAudioClient::Start",
            source: e,
        }));
        return Ok(false);
    }
    let _ = ready.send(Ok(()));

    let result = (|| -> std::result::Result<bool, WasapiError> { unsafe {
        let mut written = 0u64;
        loop {
            if !control.running.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let padding = audio_client
                .GetCurrentPadding()
                .map_err(WasapiError::call("GetCurrentPadding"))?;
            control
                .frames_played
                .store(written.saturating_sub(padding as u64), Ordering::Relaxed);

            let remaining = total_frames - written;
            if remaining == 0 && padding == 0 {
                return Ok(true);
            }

            let writable = ((buffer_frames - padding) as u64).min(remaining) as u32;
            if writable > 0 {
                let data = render_client
                    .GetBuffer(writable)
                    .map_err(WasapiError::call("GetBuffer"))?;
                let start = written as usize * channels;
                let end = start + writable as usize * channels;
                let dest = std::slice::from_raw_parts_mut(data as *mut f32, writable as usize * channels);
                write_scaled(dest, &frames[start..end], control.gain());
                render_client
                    .ReleaseBuffer(writable, 0)
                    .map_err(WasapiError::call("ReleaseBuffer"))?;
                written += writable as u64;
            }

            thread::sleep(Duration::from_millis(10));
        }
    } })();

    let _ = unsafe { audio_client.Stop() };
    result
}
