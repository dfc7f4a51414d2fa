//! Retry budget and backoff schedule for warehouse writes

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

/// Maximum allowed submissions per chunk
const MAX_ATTEMPTS: u32 = 1000;
/// Maximum backoff duration to prevent excessive delays
const MAX_BACKOFF_SECONDS: u64 = 3600; // 1 hour
/// Maximum multiplier to prevent exponential explosion
const MAX_MULTIPLIER: f64 = 100.0;
/// Maximum jitter factor
const MAX_JITTER_FACTOR: f64 = 1.0;

fn validate_max_attempts<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u32::deserialize(deserializer)?;
    if value == 0 || value > MAX_ATTEMPTS {
        return Err(serde::de::Error::custom(format!(
            "max_attempts {} must be between 1 and {}",
            value, MAX_ATTEMPTS
        )));
    }
    Ok(value)
}

/// Read a millisecond count and bound it
fn validate_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    let duration = Duration::from_millis(millis);
    if duration.as_secs() > MAX_BACKOFF_SECONDS {
        return Err(serde::de::Error::custom(format!(
            "duration {:?} exceeds maximum allowed {} seconds",
            duration, MAX_BACKOFF_SECONDS
        )));
    }
    Ok(duration)
}

fn validate_multiplier<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(1.0..=MAX_MULTIPLIER).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "backoff_multiplier {} must be finite and between 1.0 and {}",
            value, MAX_MULTIPLIER
        )));
    }
    Ok(value)
}

fn validate_jitter<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(0.0..=MAX_JITTER_FACTOR).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "jitter_factor {} must be finite and between 0.0 and {}",
            value, MAX_JITTER_FACTOR
        )));
    }
    Ok(value)
}

/// Retry policy with validated bounds
///
/// `max_attempts` counts submissions, the first one included. Durations are
/// given in milliseconds in configuration files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total submissions allowed, first one included
    #[serde(deserialize_with = "validate_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first resubmission
    #[serde(rename = "initial_backoff_ms", deserialize_with = "validate_millis")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_backoff_ms", deserialize_with = "validate_millis")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    #[serde(deserialize_with = "validate_multiplier")]
    pub backoff_multiplier: f64,
    /// Random extra delay as a fraction of the computed one (0.0 to 1.0)
    #[serde(deserialize_with = "validate_jitter")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before resubmission number `retry` (1 for the first resubmission)
    pub fn next_backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let initial = self.initial_backoff.as_secs_f64();
        let multiplier = self.backoff_multiplier.powi(retry.min(64) as i32 - 1);
        let base = if multiplier.is_finite() {
            Duration::from_secs_f64((initial * multiplier).min(self.max_backoff.as_secs_f64()))
        } else {
            self.max_backoff
        };

        let jitter = base.as_secs_f64() * self.jitter_factor * rand::random::<f64>();
        let with_jitter = base + Duration::from_secs_f64(jitter);

        debug!(
            "Calculated backoff for retry {}: {:?} (base: {:?})",
            retry, with_jitter, base
        );

        with_jitter
    }

    /// Whether another submission is allowed after `attempts_made`
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Single submission, never retried
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Constant delay between submissions
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            max_backoff: backoff,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Doubling delay from `initial`, capped at `max`
    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: initial,
            max_backoff: max,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Cross-field checks that serde validators cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.initial_backoff > self.max_backoff {
            return Err(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff, self.max_backoff
            ));
        }
        Ok(())
    }
}
