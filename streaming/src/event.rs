//! Auto-reset event used to park the worker and the waiting main thread.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
pub(crate) struct WaitableEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl WaitableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, waking one waiter. A wake with no waiter is
    /// remembered until the next wait.
    pub fn wake(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Wait up to `timeout`. Returns true if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self.cond.wait_for(&mut signaled, timeout);
        }
        std::mem::take(&mut *signaled)
    }
}
