// crates/resilience/src/lib.rs
//! Resilience primitives for remote rate limiting
//!
//! This module provides:
//! - Validated rate-limit cooldowns
//! - A queue of deferred operations keyed by timer token
//! - Timer scheduling on a tokio runtime
//!
//! # Example
//!
//! ```rust
//! use notesync_resilience::{Cooldown, DeferredQueue};
//!
//! let cooldown = Cooldown::from_seconds(30).unwrap();
//! let mut queue = DeferredQueue::new();
//! let deferred = queue.schedule("download chunk", cooldown.delay());
//!
//! assert_eq!(queue.fire(deferred.token).unwrap(), "download chunk");
//! ```

mod cooldown;
mod deferred;
mod error;
mod timer;

pub use cooldown::Cooldown;
pub use deferred::{Deferred, DeferredQueue, TimerToken};
pub use error::{ResilienceError, ResilienceResult};
pub use timer::TimerSet;
