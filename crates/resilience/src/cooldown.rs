// crates/resilience/src/cooldown.rs
//! Rate-limit cooldown handling

use crate::error::{ResilienceError, ResilienceResult};
use std::time::{Duration, SystemTime};

/// Wait period imposed by a remote rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    delay: Duration,
    resume_at: SystemTime,
}

impl Cooldown {
    /// Creates a cooldown from the number of seconds reported by the remote side
    ///
    /// A rate limit always carries a positive wait that ends at a representable
    /// wall-clock time; anything else is rejected.
    pub fn from_seconds(seconds: i64) -> ResilienceResult<Self> {
        if seconds <= 0 {
            return Err(ResilienceError::NonPositiveDelay(seconds));
        }

        let delay = Duration::from_secs(seconds as u64);
        let resume_at = SystemTime::now()
            .checked_add(delay)
            .ok_or(ResilienceError::DelayOutOfRange(seconds))?;
        Ok(Self { delay, resume_at })
    }

    /// Gets the wait duration
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Gets the wall-clock time after which the operation may resume
    pub fn resume_at(&self) -> SystemTime {
        self.resume_at
    }

    /// Gets the wait duration in whole seconds
    pub fn seconds(&self) -> u64 {
        self.delay.as_secs()
    }
}
