//! Monotonic clock and TTL helpers shared by the stateful stores.
//!
//! Wall-clock timestamps (`chrono::Utc`) go into persisted records; every
//! expiry or rate decision uses `Instant` so that system clock changes
//! cannot expire or resurrect state.

use std::time::{Duration, Instant};

/// Monotonic "now" for activity tracking.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// True when `last_activity` is at least `ttl` in the past.
pub fn is_expired(last_activity: Instant, ttl: Duration) -> bool {
    last_activity.elapsed() >= ttl
}

/// Seconds elapsed since `earlier`, as a float suitable for rate math.
pub fn seconds_since(earlier: Instant) -> f64 {
    earlier.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let t = monotonic_now();
        assert!(is_expired(t, Duration::ZERO));
    }

    #[test]
    fn test_fresh_activity_is_not_expired() {
        let t = monotonic_now();
        assert!(!is_expired(t, Duration::from_secs(60)));
    }

    #[test]
    fn test_seconds_since_is_non_negative() {
        let t = monotonic_now();
        assert!(seconds_since(t) >= 0.0);
    }
}
