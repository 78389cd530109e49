//! Reconnection back-off policy

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Decides how long to wait before each automatic reconnection attempt
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay().max(config.initial_delay()),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based), or
    /// `None` once the attempt budget is exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let actual_ms = if self.jitter {
            // ±10%
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            capped_ms * (1.0 + jitter)
        } else {
            capped_ms
        };

        Some(Duration::from_millis(actual_ms as u64))
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_is_constant_three_seconds() {
        let policy = ReconnectPolicy::default();
        for attempt in [1, 2, 10, 1000] {
            assert_eq!(policy.delay_for(attempt), Some(Duration::from_secs(3)));
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = ReconnectPolicy::new(&ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: false,
            max_attempts: None,
        });
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(800)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(1_000)));
        assert_eq!(policy.delay_for(u32::MAX), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = ReconnectPolicy::new(&ReconnectConfig {
            max_attempts: Some(2),
            ..Default::default()
        });
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
    }

    proptest! {
        #[test]
        fn prop_jittered_delay_within_bounds(
            initial in 1u64..10_000,
            extra in 0u64..100_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..50,
        ) {
            let max = initial + extra;
            let policy = ReconnectPolicy::new(&ReconnectConfig {
                initial_delay_ms: initial,
                max_delay_ms: max,
                multiplier,
                jitter: true,
                max_attempts: None,
            });
            let delay = policy.delay_for(attempt).unwrap().as_millis() as f64;
            prop_assert!(delay >= (initial as f64 * 0.9).floor() - 1.0);
            prop_assert!(delay <= max as f64 * 1.1 + 1.0);
        }
    }
}
