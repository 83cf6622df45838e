// Time Provider Port (for testability)

use tokio::time::Instant;

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (wall clock)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Monotonic clock anchored to the wall clock at construction.
///
/// Deadlines and rate windows are measured on tokio's clock, so they never
/// jump with NTP adjustments and follow `tokio::time::pause`/`advance` in tests.
pub struct MonotonicTimeProvider {
    origin: Instant,
    origin_millis: i64,
}

impl MonotonicTimeProvider {
    pub fn new() -> Self {
        Self::anchored_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor the clock at a fixed epoch value
    pub fn anchored_at(origin_millis: i64) -> Self {
        Self {
            origin: Instant::now(),
            origin_millis,
        }
    }
}

impl Default for MonotonicTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for MonotonicTimeProvider {
    fn now_millis(&self) -> i64 {
        self.origin_millis + self.origin.elapsed().as_millis() as i64
    }
}
