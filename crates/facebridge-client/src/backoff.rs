//! Reconnect backoff policies

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long a faulted client waits before it may leave `Faulted`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackoffPolicy {
    /// Same delay after every failure
    Fixed {
        #[serde(with = "facebridge_core::duration_ms")]
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, with +/- `jitter` spread
    #[serde(rename_all = "camelCase")]
    Exponential {
        #[serde(with = "facebridge_core::duration_ms")]
        base: Duration,
        #[serde(with = "facebridge_core::duration_ms")]
        max: Duration,
        factor: f64,
        /// Fraction in [0, 1]
        jitter: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed { delay }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Exponential {
                base,
                max,
                factor,
                jitter,
            } => {
                let exp = factor.max(1.0).powi(attempt.min(32) as i32);
                let raw = (base.as_secs_f64() * exp).min(max.as_secs_f64());
                let jitter = jitter.clamp(0.0, 1.0);
                let spread = if jitter > 0.0 {
                    rand::thread_rng().gen_range(-jitter..=jitter)
                } else {
                    0.0
                };
                let secs = (raw * (1.0 + spread)).clamp(0.0, max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
        }
    }
}

/// Attempt counter driving a policy
#[derive(Clone, Debug, Default)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Backoff { policy, attempt: 0 }
    }

    /// Delay for the next retry; advances the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Called once the connection is healthy again
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let mut backoff = Backoff::new(BackoffPolicy::fixed(Duration::from_millis(250)));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.attempt(), 2);
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.0,
        };
        let mut backoff = Backoff::new(policy);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.5,
        };
        for _ in 0..100 {
            let d = policy.delay(0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_policy_serde() {
        let json = r#"{"type":"fixed","delay":750}"#;
        let policy: BackoffPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy, BackoffPolicy::fixed(Duration::from_millis(750)));

        let exp: BackoffPolicy = serde_json::from_str(
            r#"{"type":"exponential","base":100,"max":5000,"factor":1.5,"jitter":0.1}"#,
        )
        .unwrap();
        assert!(matches!(exp, BackoffPolicy::Exponential { factor, .. } if factor == 1.5));
    }
}
