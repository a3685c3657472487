//! WASAPI microphone capture.
//!
//! Opens a capture endpoint in shared mode and delivers Float32 buffers on
//! a dedicated MMCSS-registered thread. Teardown happens off the caller's
//! thread, so `stop` returns immediately and confirms later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use audio_session_core::models::error::AudioError;
use audio_session_core::traits::capture_device::{AudioBufferCallback, CaptureDevice, TeardownCallback};

use crate::capture_thread::CaptureThread;
use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;

/// Shared-mode buffer duration in 100 ns units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;

pub struct WasapiMicCapture {
    device_id: Option<String>,
    stream: Mutex<Option<CaptureThread>>,
}

impl WasapiMicCapture {
    /// Capture from whatever microphone is the console default at start.
    pub fn default_device() -> Self {
        Self {
            device_id: None,
            stream: Mutex::new(None),
        }
    }

    pub fn with_device(id: String) -> Self {
        Self {
            device_id: Some(id),
            ..Self::default_device()
        }
    }
}

impl CaptureDevice for WasapiMicCapture {
    fn is_available(&self) -> bool {
        ComScope::enter()
            .and_then(|_com| DeviceEnumerator::new().map(|e| e.has_capture_device()))
            .unwrap_or(false)
    }

    fn start(&self, callback: AudioBufferCallback) -> std::result::Result<(), AudioError> {
        let mut stream = self.stream.lock();
        if matches!(stream.as_ref(), Some(current) if current.is_running()) {
            return Err(AudioError::CaptureStartFailed("mic capture already running".into()));
        }
        // A stream whose loop failed on its own has already exited.
        if let Some(finished) = stream.take() {
            finished.join();
        }

        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = mpsc::channel();
        let capture = CaptureThread::spawn("wasapi-mic-capture", move |running: &AtomicBool| {
            if let Err(e) = mic_capture_loop(running, device_id.as_deref(), callback, ready_tx) {
                log::error!("Mic capture error: {}", e);
            }
        })
        .map_err(|e| AudioError::CaptureStartFailed(format!("failed to spawn mic thread: {}", e)))?;

        // The thread reports whether the endpoint actually started.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                *stream = Some(capture);
                Ok(())
            }
            Ok(Err(e)) => {
                capture.join();
                Err(AudioError::CaptureStartFailed(e.to_string()))
            }
            Err(_) => {
                capture.join();
                Err(AudioError::CaptureStartFailed("mic thread exited during setup".into()))
            }
        }
    }

    /// Joining can take a poll interval plus IAudioClient::Stop, so it
    /// happens off the caller's thread.
    fn stop(&self, on_stopped: TeardownCallback) {
        let stream = self.stream.lock().take();
        match stream {
            Some(capture) => capture.stop(on_stopped),
            None => on_stopped(),
        }
    }
}

/// Capture loop on the dedicated thread.
///
/// Sequence:
/// 1. Enter COM (MTA)
/// 2. Resolve the capture endpoint (default or by id)
/// 3. Activate IAudioClient, initialize shared mode with the mix format
/// 4. Get IAudioCaptureClient, register with MMCSS
/// 5. Start, report readiness, poll packets until `running` clears
fn mic_capture_loop(
    running: &AtomicBool,
    device_id: Option<&str>,
    callback: AudioBufferCallback,
    ready: mpsc::Sender<std::result::Result<(), WasapiError>>,
) -> std::result::Result<(), WasapiError> {
    let setup = (|| -> std::result::Result<_, WasapiError> { unsafe {
        let com = ComScope::enter()?;
        let device = DeviceEnumerator::new()?.capture_device(device_id)?;

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(WasapiError::call("IMMDevice::Activate"))?;
        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(WasapiError::call("GetMixFormat"))?;
        let mix_format = &*mix_format_ptr;
        let sample_rate = mix_format.nSamplesPerSec as f64;
        let channels = mix_format.nChannels;

        let initialized = audio_client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_NOPERSIST,
                BUFFER_DURATION,
                0,
                mix_format,
                None,
            )
            .map_err(WasapiError::call("IAudioClient::Initialize"));
        CoTaskMemFree(Some(mix_format_ptr as *const _));
        initialized?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(WasapiError::call("GetService(IAudioCaptureClient)"))?;

        let mut task_index = 0u32;
        let _mmcss = AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index);

        audio_client
            .Start()
            .map_err(WasapiError::call("IAudioClient::Start"))?;
        Ok((com, audio_client, capture_client, sample_rate, channels))
    } })();

    let (_com, audio_client, capture_client, sample_rate, channels) = match setup {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            // Surfaced by `start`.
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };

    let result = (|| -> std::result::Result<(), WasapiError> { unsafe {
        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));

            let mut packet_length = capture_client
                .GetNextPacketSize()
                .map_err(WasapiError::call("GetNextPacketSize"))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames = 0u32;
                let mut flags = 0u32;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(WasapiError::call("GetBuffer"))?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let total_samples = num_frames as usize * channels as usize;
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        callback(&vec![0.0f32; total_samples], sample_rate, channels);
                    } else {
                        // Shared mode delivers Float32.
                        let samples = std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples);
                        callback(samples, sample_rate, channels);
                    }
                }

                capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(WasapiError::call("ReleaseBuffer"))?;
                packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(WasapiError::call("GetNextPacketSize"))?;
            }
        }
        Ok(())
    } })();

    let _ = unsafe { audio_client.Stop() };
    result
}
