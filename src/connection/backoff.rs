use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or subtracted at random, 0.0..=1.0.
    pub jitter: f64,
    /// 0 keeps retrying forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self.policy.max_attempts != 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }

        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let growth = self.policy.multiplier.max(1.0).powi(exponent);
        let max_secs = self.policy.max_delay.as_secs_f64();
        let base_secs = (self.policy.initial_delay.as_secs_f64() * growth).min(max_secs);
        self.attempts += 1;

        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Some(Duration::from_secs_f64((base_secs * factor).min(max_secs)))
    }
}
