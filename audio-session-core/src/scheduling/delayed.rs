//! Delayed and redispatched blocks that never keep their target alive.
//!
//! ```text
//! [Timer thread] ──fires──→ [Dispatcher] ──→ cancelled? ──→ target alive? ──→ block(&target)
//! ```
//!
//! Every pending block holds a `Weak` to its target. Dropping the last
//! strong reference cancels all future firings without unregistering.

use std::sync::{Arc, Weak};
use std::time::Duration;

use super::dispatcher::Dispatcher;
use super::timer::{Timer, TimerHandle};

/// A block bound to a weakly-held target.
pub struct WeakTimerTarget<T: ?Sized> {
    target: Weak<T>,
    block: Box<dyn FnOnce(&T) + Send + 'static>,
}

impl<T: ?Sized> WeakTimerTarget<T> {
    pub fn new<F>(target: &Arc<T>, block: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        Self {
            target: Arc::downgrade(target),
            block: Box::new(block),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Run the block if the target still exists. Returns whether it ran.
    pub fn fire(self) -> bool {
        match self.target.upgrade() {
            Some(target) => {
                (self.block)(&target);
                true
            }
            None => {
                log::trace!("Timer target dropped; skipping");
                false
            }
        }
    }
}

/// Schedules blocks on the designated context, after a delay or right away.
#[derive(Clone)]
pub struct DelayedInvocation {
    timer: Arc<dyn Timer>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl DelayedInvocation {
    pub fn new(timer: Arc<dyn Timer>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { timer, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Run `block(&target)` on the dispatcher after `delay`.
    ///
    /// Skipped if the handle is cancelled or the target is dropped at any
    /// point before the block starts.
    pub fn perform_after<T, F>(&self, target: &Arc<T>, delay: Duration, block: F) -> TimerHandle
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let pending = WeakTimerTarget::new(target, block);
        let handle = TimerHandle::new();
        let dispatcher = Arc::clone(&self.dispatcher);
        let task_handle = handle.clone();

        self.timer.schedule_with(
            delay,
            handle.clone(),
            Box::new(move || {
                if !pending.is_alive() {
                    return;
                }
                dispatcher.dispatch(Box::new(move || {
                    if !task_handle.is_cancelled() {
                        pending.fire();
                    }
                }));
            }),
        );

        handle
    }

    /// Queue `block(&target)` on the dispatcher. Always asynchronous.
    pub fn perform_on_main<T, F>(&self, target: &Arc<T>, block: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let pending = WeakTimerTarget::new(target, block);
        self.dispatcher.dispatch(Box::new(move || {
            pending.fire();
        }));
    }

    /// Run `block(&target)` inline when already on the dispatcher, otherwise queue it.
    pub fn perform_now_on_main<T, F>(&self, target: &Arc<T>, block: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        if self.dispatcher.is_current() {
            block(&**target);
        } else {
            self.perform_on_main(target, block);
        }
    }
}
