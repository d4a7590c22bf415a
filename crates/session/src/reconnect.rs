//! Reconnect delays with jittered exponential back-off.

use std::time::Duration;

use lb_domain::config::ReconnectConfig;

/// Delay schedule for the session's reconnect worker.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Consecutive failed attempts before giving up. `0` = never.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectBackoff {
    pub fn from_config(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.initial_delay_ms)),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_attempts: cfg.max_attempts,
        }
    }

    /// Delay before the given attempt (0-indexed). Capped at `max_delay`,
    /// then up to 20% is shaved off so parallel sessions spread out.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exp = attempt.min(32) as i32;
        let capped_ms = (base_ms * self.backoff_factor.powi(exp)).min(self.max_delay.as_millis() as f64);

        let jitter = capped_ms * 0.2 * jitter_fraction(attempt);
        Duration::from_millis((capped_ms - jitter).max(0.0) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2_654_435_761);
    (hash as f64) / (u32::MAX as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64, factor: f64) -> ReconnectBackoff {
        ReconnectBackoff::from_config(&ReconnectConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            backoff_factor: factor,
            max_attempts: 0,
        })
    }

    #[test]
    fn defaults_follow_config_defaults() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.max_attempts, 0);
    }

    #[test]
    fn delay_grows_then_caps() {
        let p = policy(100, 1_000, 2.0);
        let d0 = p.delay_for_attempt(0);
        let d3 = p.delay_for_attempt(3);
        assert!(d0 <= Duration::from_millis(100));
        assert!(d0 >= Duration::from_millis(80));
        assert!(d3 > d0);
        for attempt in 0..64 {
            assert!(p.delay_for_attempt(attempt) <= Duration::from_millis(1_000));
        }
        assert!(p.delay_for_attempt(50) >= Duration::from_millis(800));
    }

    #[test]
    fn factor_below_one_is_clamped() {
        let p = policy(100, 1_000, 0.1);
        assert!(p.delay_for_attempt(5) >= Duration::from_millis(80));
    }

    #[test]
    fn give_up_only_when_limited() {
        let mut p = ReconnectBackoff::default();
        assert!(!p.should_give_up(1_000_000));
        p.max_attempts = 3;
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
    }
}
