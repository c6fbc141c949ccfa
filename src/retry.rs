//! Backoff policy for segment fetch attempts (spec §4.2).
//!
//! Classification itself lives on `CoreError::is_retryable`; this module
//! only owns the backoff arithmetic, mirroring the split the pack's other
//! download manager draws between `retry::classify` and `retry::policy`.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2.0,
            max_delay: Duration::from_millis(30_000),
            max_attempts: 4, // retry_count(3) + 1
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn from_retry_count(retry_count: u32) -> Self {
        Self {
            max_attempts: retry_count + 1,
            ..Default::default()
        }
    }

    /// `attempt` is 1-based (1 = first try, already failed when this is
    /// called). Returns `None` once `max_attempts` is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(20);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let final_secs = if self.jitter {
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.5..=1.5);
            (capped * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };
        Some(Duration::from_secs_f64(final_secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = BackoffPolicy {
            jitter: false,
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.delay_for(1).is_some());
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
    }

    #[test]
    fn grows_exponentially_without_jitter() {
        let policy = BackoffPolicy {
            jitter: false,
            max_attempts: 10,
            base: Duration::from_millis(1000),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
        };
        let d1 = policy.delay_for(1).unwrap();
        let d2 = policy.delay_for(2).unwrap();
        let d3 = policy.delay_for(3).unwrap();
        assert_eq!(d1, Duration::from_millis(1000));
        assert_eq!(d2, Duration::from_millis(2000));
        assert_eq!(d3, Duration::from_millis(4000));
    }

    #[test]
    fn never_exceeds_max_delay() {
        let policy = BackoffPolicy {
            jitter: true,
            max_attempts: 50,
            base: Duration::from_millis(1000),
            factor: 2.0,
            max_delay: Duration::from_millis(30_000),
        };
        for attempt in 1..40 {
            if let Some(d) = policy.delay_for(attempt) {
                assert!(d <= Duration::from_millis(30_000));
            }
        }
    }

    #[test]
    fn from_retry_count_matches_spec_default() {
        let policy = BackoffPolicy::from_retry_count(3);
        assert_eq!(policy.max_attempts, 4);
    }
}
