use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses worth another attempt; every other non-success status is final
const RETRIABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub fn is_retriable_status(status: u16) -> bool {
    RETRIABLE_STATUSES.contains(&status)
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, including Retry-After
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed
    pub jitter: f64,
    /// Fixed seed for the jitter generator
    pub seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.2,
            seed: None,
        }
    }
}

impl RetryPolicy {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Starts a fresh delay sequence for one fetch
    pub fn backoff(&self) -> Backoff {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Backoff {
            policy: self.clone(),
            rng,
            retries: 0,
        }
    }
}

/// Exponential delay sequence with jitter
pub struct Backoff {
    policy: RetryPolicy,
    rng: StdRng,
    retries: u32,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let max = self.policy.max_delay_ms as f64;
        let exponent = i32::try_from(self.retries).unwrap_or(i32::MAX);
        let base = (self.policy.initial_delay_ms as f64 * self.policy.multiplier.powi(exponent)).min(max);
        self.retries = self.retries.saturating_add(1);

        let spread = base * self.policy.jitter.clamp(0.0, 1.0);
        let jittered = if spread > 0.0 {
            base + self.rng.random_range(-spread..=spread)
        } else {
            base
        };

        Duration::from_millis(jittered.clamp(0.0, max).round() as u64)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Parses a Retry-After header value, either delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
