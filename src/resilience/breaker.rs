//! Process-wide rate-limit circuit breaker.
//!
//! Once armed, every orchestrated call sharing this limiter fails fast with
//! [`Error::RateLimited`](crate::Error::RateLimited) until the cooldown ends.

use crate::clock::{Clock, SystemClock};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lower bound for any armed cooldown window.
pub const MIN_COOLDOWN: Duration = Duration::from_millis(30_000);

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    active_until_ms: AtomicI64,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            active_until_ms: AtomicI64::new(0),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.clock.now_ms() < self.active_until_ms.load(Ordering::Acquire)
    }

    pub fn remaining_cooldown(&self) -> Duration {
        let remaining = self.active_until_ms.load(Ordering::Acquire) - self.clock.now_ms();
        Duration::from_millis(remaining.max(0) as u64)
    }

    /// Arm the cooldown for `max(MIN_COOLDOWN, retry_after)`.
    ///
    /// The stored deadline only ever moves later: a shorter window armed by a
    /// concurrent failure never cuts an active longer one short. Returns the
    /// window that was requested.
    pub fn arm_cooldown(&self, retry_after: Option<Duration>) -> Duration {
        let window = retry_after.unwrap_or(MIN_COOLDOWN).max(MIN_COOLDOWN);
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let until = self.clock.now_ms().saturating_add(window_ms);
        let previous = self.active_until_ms.fetch_max(until, Ordering::AcqRel);
        tracing::warn!(
            window_ms,
            extended = until > previous,
            "Rate-limit cooldown armed"
        );
        window
    }

    /// Epoch milliseconds at which the cooldown ends (0 when never armed).
    pub fn active_until_ms(&self) -> i64 {
        self.active_until_ms.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.active_until_ms.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("active_until_ms", &self.active_until_ms())
            .finish()
    }
}
