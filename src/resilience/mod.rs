//! Failure-mode engineering around provider calls: error classification,
//! the process-wide rate-limit breaker, candidate model chains and backoff.

pub mod backoff;
pub mod breaker;
pub mod chain;
pub mod classify;

pub use backoff::{backoff_delay, backoff_with_jitter};
pub use breaker::{RateLimiter, MIN_COOLDOWN};
pub use chain::{build_chain, normalize_model};
pub use classify::classify;
