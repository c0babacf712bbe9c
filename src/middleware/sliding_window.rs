//! Per-client rolling-window request counter.
//!
//! # Algorithm
//!
//! Each client key owns a queue of the instants at which its admitted requests
//! arrived. A request is admitted while fewer than `limit` instants fall inside
//! the last `window`; otherwise it is rejected with the time until the oldest
//! instant leaves the window. Rejected requests are not recorded, so a queue
//! never holds more than `limit` entries.
//!
//! Unlike a token bucket, nothing refills mid-window: the 6th request inside
//! any 60-second span is refused even if the first 5 were spread out.
//!
//! # Memory
//!
//! Expired instants are dropped whenever a key is checked. Keys that stop
//! sending requests are removed by [`KeyedLimiter::retain_recent`], which the
//! application calls periodically from a background task.
//!
//! # Clock
//!
//! Time comes from a [`governor::clock::Clock`] so tests can drive the window
//! with [`governor::clock::FakeRelativeClock`].

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock, Reference};

use super::rate_limit::RateLimitError;

/// A rejected admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAdmitted {
    /// Time until the client may send its next request.
    pub retry_after: Duration,
}

/// Admission control keyed by client identity.
///
/// Implementations must be safe to call concurrently for the same key.
pub trait KeyedLimiter: Send + Sync {
    /// Record a request for `key` if it is within quota.
    fn check_key(&self, key: &str) -> Result<(), NotAdmitted>;

    /// Drop keys whose window holds no recent requests.
    fn retain_recent(&self);

    /// Number of keys currently tracked.
    fn tracked_keys(&self) -> usize;

    /// Requests admitted per window.
    fn limit(&self) -> u32;

    /// Window length.
    fn window(&self) -> Duration;
}

/// Rolling-window limiter backed by a sharded concurrent map.
pub struct SlidingWindowLimiter<C: Clock = DefaultClock> {
    windows: DashMap<String, VecDeque<C::Instant>>,
    limit: NonZeroU32,
    window: Duration,
    clock: C,
}

impl SlidingWindowLimiter<DefaultClock> {
    /// Create a limiter admitting `limit` requests per `window` for each key.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::ZeroLimit` or `RateLimitError::ZeroWindow`
    /// when either value is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_clock(limit, window, DefaultClock::default())
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a limiter reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`SlidingWindowLimiter::new`].
    pub fn with_clock(limit: u32, window: Duration, clock: C) -> Result<Self, RateLimitError> {
        let limit = NonZeroU32::new(limit).ok_or(RateLimitError::ZeroLimit)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            windows: DashMap::new(),
            limit,
            window,
            clock,
        })
    }

    fn age(&self, now: C::Instant, then: C::Instant) -> Duration {
        Duration::from(now.duration_since(then))
    }

    fn evict_expired(&self, hits: &mut VecDeque<C::Instant>, now: C::Instant) {
        while let Some(&oldest) = hits.front() {
            if self.age(now, oldest) < self.window {
                break;
            }
            hits.pop_front();
        }
    }
}

impl<C> KeyedLimiter for SlidingWindowLimiter<C>
where
    C: Clock + Send + Sync,
{
    fn check_key(&self, key: &str) -> Result<(), NotAdmitted> {
        let now = self.clock.now();
        let mut entry = self.windows.entry(key.to_owned()).or_default();
        let hits = entry.value_mut();

        self.evict_expired(hits, now);

        if hits.len() >= self.limit.get() as usize {
            // Queue is non-empty here because limit >= 1
            let retry_after = hits
                .front()
                .map(|&oldest| self.window.saturating_sub(self.age(now, oldest)))
                .unwrap_or(self.window);
            return Err(NotAdmitted { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    fn retain_recent(&self) {
        let now = self.clock.now();
        self.windows.retain(|_, hits| {
            self.evict_expired(hits, now);
            !hits.is_empty()
        });
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn limit(&self) -> u32 {
        self.limit.get()
    }

    fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use governor::clock::FakeRelativeClock;

    use super::*;

    type FakeLimiter = SlidingWindowLimiter<FakeRelativeClock>;

    fn fake_limiter(limit: u32, window_secs: u64) -> (FakeLimiter, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let window = Duration::from_secs(window_secs);
        let limiter = SlidingWindowLimiter::with_clock(limit, window, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(matches!(
            SlidingWindowLimiter::new(0, Duration::from_secs(60)),
            Err(RateLimitError::ZeroLimit)
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            SlidingWindowLimiter::new(5, Duration::ZERO),
            Err(RateLimitError::ZeroWindow)
        ));
    }

    #[test]
    fn test_fifth_admitted_sixth_rejected() {
        let (limiter, _clock) = fake_limiter(5, 60);

        for _ in 0..5 {
            assert!(limiter.check_key("10.0.0.1").is_ok());
        }
        let rejected = limiter.check_key("10.0.0.1").unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn test_no_refill_inside_window() {
        let (limiter, clock) = fake_limiter(5, 60);

        // Spread five requests over 40 seconds
        for _ in 0..5 {
            assert!(limiter.check_key("a").is_ok());
            clock.advance(Duration::from_secs(10));
        }

        // t = 50s: the first request (t = 0) is still inside the window
        let rejected = limiter.check_key("a").unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(10));

        // t = 60s: the first request has left the window, one slot frees up
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check_key("a").is_ok());
        assert!(limiter.check_key("a").is_err());
    }

    #[test]
    fn test_quota_resets_after_idle_window() {
        let (limiter, clock) = fake_limiter(5, 60);

        for _ in 0..5 {
            limiter.check_key("a").unwrap();
        }
        assert!(limiter.check_key("a").is_err());

        clock.advance(Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.check_key("a").is_ok());
        }
        assert!(limiter.check_key("a").is_err());
    }

    #[test]
    fn test_rejections_do_not_extend_window() {
        let (limiter, clock) = fake_limiter(1, 60);

        limiter.check_key("a").unwrap();
        for _ in 0..10 {
            clock.advance(Duration::from_secs(5));
            assert!(limiter.check_key("a").is_err());
        }

        clock.advance(Duration::from_secs(10));
        assert!(limiter.check_key("a").is_ok());
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = fake_limiter(2, 60);

        limiter.check_key("a").unwrap();
        limiter.check_key("a").unwrap();
        assert!(limiter.check_key("a").is_err());

        assert!(limiter.check_key("b").is_ok());
        assert!(limiter.check_key("b").is_ok());
    }

    #[test]
    fn test_retain_recent_evicts_idle_keys() {
        let (limiter, clock) = fake_limiter(5, 60);

        limiter.check_key("old").unwrap();
        clock.advance(Duration::from_secs(30));
        limiter.check_key("new").unwrap();
        assert_eq!(limiter.tracked_keys(), 2);

        clock.advance(Duration::from_secs(30));
        limiter.retain_recent();
        assert_eq!(limiter.tracked_keys(), 1);

        clock.advance(Duration::from_secs(30));
        limiter.retain_recent();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_concurrent_checks_never_overshoot() {
        let (limiter, _clock) = fake_limiter(5, 60);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check_key("shared").is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
    }
}
