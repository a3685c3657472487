//! Thread ownership for one capture stream.
//!
//! Every start gets its own stop flag, so stopping one stream and starting
//! the next can overlap without the old thread seeing the new flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use audio_session_core::traits::capture_device::TeardownCallback;

pub struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl CaptureThread {
    /// Run `body` on a new thread named `name`. `body` should return soon
    /// after the flag it is given clears.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            body(&flag);
            flag.store(false, Ordering::SeqCst);
        })?;
        Ok(Self { running, handle })
    }

    /// False once stopped, or once `body` returned on its own.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the flag and wait for the thread here.
    pub fn join(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.handle.join().is_err() {
            log::warn!("Capture thread panicked");
        }
    }

    /// Clear the flag and return at once; `on_stopped` fires after the
    /// thread has been joined on a separate teardown thread.
    pub fn stop(self, on_stopped: TeardownCallback) {
        self.running.store(false, Ordering::SeqCst);

        let on_stopped = Arc::new(Mutex::new(Some(on_stopped)));
        let deferred = Arc::clone(&on_stopped);
        let handle = self.handle;
        let spawned = thread::Builder::new()
            .name("capture-teardown".into())
            .spawn(move || {
                if handle.join().is_err() {
                    log::warn!("Capture thread panicked");
                }
                if let Some(done) = deferred.lock().take() {
                    done();
                }
            });
        if let Err(e) = spawned {
            log::warn!("Capture teardown thread failed to spawn ({}); confirming now", e);
            if let Some(done) = on_stopped.lock().take() {
                done();
            }
        }
    }
}
