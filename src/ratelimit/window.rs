//! Per-key fixed window state.

use std::time::Duration;

/// Counter state for one caller key.
///
/// `count` is only incremented while the window is live. Once
/// `now >= reset_at_ms` the entry is stale and gets replaced by a fresh
/// window, never incremented in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests admitted in the current window.
    pub count: u32,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at_ms: u64,
}

impl WindowEntry {
    /// Open a new window at `now_ms`, already counting the request that opened it.
    pub fn open(now_ms: u64, window: Duration) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self {
            count: 1,
            reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Whether the window has ended. A request at exactly `reset_at_ms`
    /// belongs to the next window.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }

    /// Time left until the window ends.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset_at_ms.saturating_sub(now_ms))
    }

    /// Whole seconds a denied caller should wait, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_starts_at_one() {
        let entry = WindowEntry::open(10_000, Duration::from_millis(1_000));
        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_at_ms, 11_000);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let entry = WindowEntry::open(0, Duration::from_millis(1_000));
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
        assert!(entry.is_expired(1_001));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let entry = WindowEntry::open(0, Duration::from_millis(15_000));
        assert_eq!(entry.retry_after_secs(0), 15);
        assert_eq!(entry.retry_after_secs(1), 15);
        assert_eq!(entry.retry_after_secs(14_001), 1);
        assert_eq!(entry.retry_after_secs(15_000), 0);
    }

    #[test]
    fn test_remaining_saturates() {
        let entry = WindowEntry::open(0, Duration::from_millis(500));
        assert_eq!(entry.remaining(200), Duration::from_millis(300));
        assert_eq!(entry.remaining(900), Duration::ZERO);
    }
}
