//! Retry delay policy.
//!
//! Exponential backoff (base 500ms, doubling per attempt, capped at 10s)
//! plus up to 30% random jitter. A server-provided `Retry-After` wins
//! verbatim.

use rand::Rng;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the exponential delay added as random jitter
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter: 0.3,
        }
    }
}

impl BackoffPolicy {
    /// Exponential component for a 1-based attempt number, without jitter
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay before retrying `attempt`.
    ///
    /// With `retry_after` present the result is exactly that many seconds.
    pub fn delay<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(server_delay) = retry_after {
            return server_delay;
        }
        let exponential = self.exponential(attempt);
        let jitter_fraction = if self.jitter > 0.0 {
            rng.gen_range(0.0..self.jitter)
        } else {
            0.0
        };
        exponential + exponential.mul_f64(jitter_fraction)
    }

    /// Largest delay this policy can produce without `Retry-After`
    pub fn ceiling(&self) -> Duration {
        self.max + self.max.mul_f64(self.jitter)
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are ignored and fall back to exponential backoff.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let seconds: f64 = value?.trim().parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Something that can wait
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn exponential_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.exponential(1), Duration::from_millis(500));
        assert_eq!(policy.exponential(2), Duration::from_millis(1000));
        assert_eq!(policy.exponential(5), Duration::from_millis(8000));
        assert_eq!(policy.exponential(6), Duration::from_secs(10));
        assert_eq!(policy.exponential(60), Duration::from_secs(10));
    }

    #[test]
    fn delay_is_non_decreasing_without_jitter() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<_> = (1..=12).map(|a| policy.delay(a, None, &mut rng)).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 1..=10 {
            let floor = policy.exponential(attempt);
            let delay = policy.delay(attempt, None, &mut rng);
            assert!(delay >= floor);
            assert!(delay <= floor.mul_f64(1.3));
            assert!(delay <= policy.ceiling());
        }
    }

    #[test]
    fn retry_after_is_honored_verbatim() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        for attempt in [1, 3, 9] {
            let delay = policy.delay(attempt, Some(Duration::from_secs(4)), &mut rng);
            assert_eq!(delay, Duration::from_secs(4));
        }
    }

    #[test]
    fn parses_numeric_retry_after_only() {
        assert_eq!(parse_retry_after(Some("3")), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(Some(" 0 ")), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(Some("-1")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
