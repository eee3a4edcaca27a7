// crates/resilience/src/timer.rs
//! Timer scheduling on a tokio runtime

use crate::deferred::TimerToken;
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Set of running timers, each firing a callback once
pub struct TimerSet {
    runtime: Handle,
    timers: HashMap<TimerToken, JoinHandle<()>>,
}

impl TimerSet {
    /// Creates a timer set that spawns onto the given runtime
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            timers: HashMap::new(),
        }
    }

    /// Starts a timer that calls `on_fire` after `delay`
    pub fn start<F>(&mut self, token: TimerToken, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });

        if let Some(previous) = self.timers.insert(token, handle) {
            previous.abort();
        }
    }

    /// Forgets a timer that has fired
    pub fn finished(&mut self, token: TimerToken) {
        self.timers.remove(&token);
    }

    /// Cancels a pending timer
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.timers.remove(&token) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Gets the number of timers not yet reported as finished
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns true if no timer is pending
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
