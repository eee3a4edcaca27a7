// crates/resilience/src/deferred.rs
//! Deferred operations
//!
//! An operation that cannot run now is parked together with the delay after
//! which it should be retried. The queue only keeps the bookkeeping; firing
//! is driven by whoever owns a timer (see [`crate::TimerSet`]).

use crate::error::{ResilienceError, ResilienceResult};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Identifies one scheduled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Returns the raw token value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Handle describing a freshly scheduled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferred {
    pub token: TimerToken,
    pub delay: Duration,
}

/// Operations parked behind a delay, keyed by timer token
#[derive(Debug)]
pub struct DeferredQueue<T> {
    next_token: u64,
    entries: BTreeMap<TimerToken, T>,
}

impl<T> DeferredQueue<T> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            next_token: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Parks an operation to be resumed after `delay`
    pub fn schedule(&mut self, operation: T, delay: Duration) -> Deferred {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.entries.insert(token, operation);

        log::debug!("Deferred {} for {:?}", token, delay);
        Deferred { token, delay }
    }

    /// Removes the operation for a fired timer
    pub fn fire(&mut self, token: TimerToken) -> ResilienceResult<T> {
        self.entries
            .remove(&token)
            .ok_or(ResilienceError::UnknownToken(token.value()))
    }

    /// Removes every parked operation, in scheduling order
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Returns true if the token is still pending
    pub fn contains(&self, token: TimerToken) -> bool {
        self.entries.contains_key(&token)
    }

    /// Iterates over parked operations
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    /// Gets the number of parked operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_fire() {
        let mut queue = DeferredQueue::new();
        let deferred = queue.schedule("fetch note", Duration::from_secs(30));

        assert_eq!(deferred.delay, Duration::from_secs(30));
        assert!(queue.contains(deferred.token));
        assert_eq!(queue.fire(deferred.token), Ok("fetch note"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fire_twice_fails() {
        let mut queue = DeferredQueue::new();
        let deferred = queue.schedule(1, Duration::from_secs(1));
        queue.fire(deferred.token).unwrap();
        assert_eq!(
            queue.fire(deferred.token),
            Err(ResilienceError::UnknownToken(deferred.token.value()))
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        let mut queue = DeferredQueue::new();
        let a = queue.schedule('a', Duration::from_secs(1));
        let b = queue.schedule('b', Duration::from_secs(1));
        assert_ne!(a.token, b.token);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = DeferredQueue::new();
        queue.schedule(1, Duration::from_secs(5));
        queue.schedule(2, Duration::from_secs(1));
        queue.schedule(3, Duration::from_secs(3));

        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }
}
