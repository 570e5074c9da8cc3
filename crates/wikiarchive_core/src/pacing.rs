use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Everything that waits goes through this, so tests can swap in a fake clock.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Fixed pause after every `every` completed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub every: usize,
    pub pause: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            every: 10,
            pause: Duration::from_millis(500),
        }
    }
}

impl PacingPolicy {
    /// `completed` is the 1-based count of items finished so far.
    pub fn should_pause(&self, completed: usize) -> bool {
        self.every > 0 && !self.pause.is_zero() && completed > 0 && completed % self.every == 0
    }

    pub fn after_item(&self, completed: usize, sleeper: &dyn Sleeper) {
        if self.should_pause(completed) {
            log::debug!("pacing: pausing {:?} after {completed} items", self.pause);
            sleeper.sleep(self.pause);
        }
    }
}

/// Token bucket shared by every caller of one client.
///
/// Callers reserve a token under the lock and sleep outside it, so a
/// reservation may drive the balance negative; later callers wait longer.
#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refreshed_at: Instant,
}

impl RateLimiter {
    pub fn new(per_second: f64) -> Option<Self> {
        if !per_second.is_finite() || per_second <= 0.0 {
            return None;
        }
        let burst = per_second.max(1.0);
        Some(Self {
            per_second,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refreshed_at: Instant::now(),
            }),
        })
    }

    pub fn acquire(&self, sleeper: &dyn Sleeper) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            log::debug!("rate limit: waiting {wait:?}");
            sleeper.sleep(wait);
        }
    }

    fn reserve(&self, now: Instant) -> Duration {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let elapsed = now.saturating_duration_since(state.refreshed_at);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.per_second).min(self.burst);
        state.refreshed_at = now;
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.per_second)
        }
    }
}
