use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::dispatcher::Task;

/// Cancellation flag for one scheduled task. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs a task once after a delay, on whatever thread the timer uses.
///
/// Implemented by:
/// - `ThreadTimer`: wall-clock, one sleeper thread per task
/// - `ManualTimer`: virtual time advanced by the caller
pub trait Timer: Send + Sync {
    /// Schedule `task` under an existing handle.
    fn schedule_with(&self, delay: Duration, handle: TimerHandle, task: Task);

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        self.schedule_with(delay, handle.clone(), task);
        handle
    }
}

/// Wall-clock timer backed by short-lived named threads.
#[derive(Debug, Default)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        Self
    }
}

impl Timer for ThreadTimer {
    fn schedule_with(&self, delay: Duration, handle: TimerHandle, task: Task) {
        let spawned = thread::Builder::new()
            .name("audio-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                if !handle.is_cancelled() {
                    task();
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn timer thread: {}", e);
        }
    }
}

struct PendingTask {
    deadline: Duration,
    sequence: u64,
    handle: TimerHandle,
    task: Task,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_sequence: u64,
    pending: Vec<PendingTask>,
}

/// Virtual-time timer. Nothing fires until `advance` is called.
#[derive(Default)]
pub struct ManualTimer {
    clock: Mutex<ManualClock>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Scheduled tasks that are neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .pending
            .iter()
            .filter(|p| !p.handle.is_cancelled())
            .count()
    }

    /// Move time forward by `by`, firing due tasks in deadline order (ties in
    /// scheduling order). Tasks scheduled by a firing task run too if they
    /// fall due within the window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.lock().now + by;
        let mut fired = 0;

        loop {
            let next = {
                let mut clock = self.clock.lock();
                let due = clock
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.deadline <= target)
                    .min_by_key(|(_, p)| (p.deadline, p.sequence))
                    .map(|(index, _)| index);
                match due {
                    Some(index) => {
                        let pending = clock.pending.remove(index);
                        clock.now = pending.deadline.max(clock.now);
                        Some(pending)
                    }
                    None => {
                        clock.now = target;
                        None
                    }
                }
            };

            let Some(pending) = next else {
                break;
            };
            if !pending.handle.is_cancelled() {
                (pending.task)();
                fired += 1;
            }
        }

        fired
    }
}

impl Timer for ManualTimer {
    fn schedule_with(&self, delay: Duration, handle: TimerHandle, task: Task) {
        let mut clock = self.clock.lock();
        let deadline = clock.now + delay;
        let sequence = clock.next_sequence;
        clock.next_sequence += 1;
        clock.pending.push(PendingTask {
            deadline,
            sequence,
            handle,
            task,
        });
    }
}
