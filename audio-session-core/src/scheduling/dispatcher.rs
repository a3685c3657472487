use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::models::error::AudioError;

/// A unit of work posted to a dispatcher or timer.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The designated execution context.
///
/// Public API calls are made here, and every hardware callback is posted
/// here before it touches session state or user completions.
///
/// Implemented by:
/// - `MainQueue`: drained by the host (UI loop, tests)
/// - `ThreadDispatcher`: a dedicated worker thread
pub trait Dispatcher: Send + Sync {
    /// Queue `task`. Never runs it inline.
    fn dispatch(&self, task: Task);

    /// Whether the calling thread is the designated context.
    fn is_current(&self) -> bool;
}

/// FIFO queue drained explicitly by its owner.
///
/// The thread that creates the queue is the designated context. Hosts call
/// `run_pending` from their main loop; tests call it to settle all
/// redispatched callbacks deterministically.
pub struct MainQueue {
    tasks: Mutex<VecDeque<Task>>,
    owner: ThreadId,
}

impl MainQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            owner: thread::current().id(),
        }
    }

    /// Run queued tasks until the queue is empty, including any a task
    /// queues while running. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            // Pop under the lock, run without it.
            let next = self.tasks.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            count += 1;
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for MainQueue {
    fn dispatch(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }
}

/// Runs tasks in order on one named worker thread.
pub struct ThreadDispatcher {
    sender: Option<mpsc::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl ThreadDispatcher {
    pub fn new(name: &str) -> Result<Self, AudioError> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
                log::debug!("Dispatcher thread exiting");
            })
            .map_err(|e| AudioError::Unknown(format!("failed to spawn dispatcher thread: {}", e)))?;

        let worker_id = worker.thread().id();
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            worker_id,
        })
    }
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, task: Task) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(task).is_err() {
            log::warn!("Dispatcher thread is gone; task dropped");
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once queued tasks finish.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // The last reference may be released by a task on the worker itself.
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}
