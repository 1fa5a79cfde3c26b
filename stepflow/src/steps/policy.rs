//! Retry and timeout policy attached to a step.

use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a failed attempt may be retried. Receives the failure and
/// the 1-based attempt number that produced it.
pub type RetryPredicate = Arc<dyn Fn(&FlowError, u32) -> bool + Send + Sync>;

/// Retry behaviour for one step.
///
/// Attempts run `1..=max_attempts`. The first wait is exactly `delay`; after
/// each wait the delay grows to `min(delay * backoff_multiplier, max_delay)`.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Growth factor applied between attempts.
    pub backoff_multiplier: f64,
    /// Upper bound for the delay.
    pub max_delay: Option<Duration>,
    /// Optional retry filter.
    pub retry_if: Option<RetryPredicate>,
    /// Per-step timeout overriding the flow's default step timeout.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: None,
            retry_if: None,
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts with no delay.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the initial delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        self.with_delay(Duration::from_millis(delay_ms))
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Caps the delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Sets the retry filter.
    #[must_use]
    pub fn with_retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FlowError, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks the policy's ranges.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            ));
        }
        if let Some(max) = self.max_delay {
            if max < self.delay {
                return Err(format!(
                    "max_delay ({}ms) is shorter than the initial delay ({}ms)",
                    max.as_millis(),
                    self.delay.as_millis()
                ));
            }
        }
        Ok(())
    }

    /// Computes the delay that follows `current`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn next_delay(&self, current: Duration) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let nanos = (current.as_nanos() as f64 * multiplier).round();
        let grown = if nanos >= u64::MAX as f64 {
            Duration::from_nanos(u64::MAX)
        } else {
            Duration::from_nanos(nanos as u64)
        };
        match self.max_delay {
            Some(max) => grown.min(max),
            None => grown,
        }
    }

    /// Returns the waits between attempts, in order.
    ///
    /// There are `max_attempts - 1` of them.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut delay = self.delay;
        for _ in 1..self.max_attempts {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }

    /// Returns true if the filter allows retrying `error`.
    #[must_use]
    pub fn allows(&self, error: &FlowError, attempt: u32) -> bool {
        self.retry_if
            .as_ref()
            .map_or(true, |predicate| predicate(error, attempt))
    }

    /// Returns the serializable part of the policy.
    #[must_use]
    pub fn to_config(&self) -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_attempts: self.max_attempts,
            delay_ms: duration_ms(self.delay),
            backoff_multiplier: self.backoff_multiplier,
            max_delay_ms: self.max_delay.map(duration_ms),
            timeout_ms: self.timeout.map(duration_ms),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("retry_if", &self.retry_if.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serializable retry settings, for loading policies from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicyConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Growth factor applied between attempts.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Delay cap in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Per-step timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl From<RetryPolicyConfig> for RetryPolicy {
    fn from(config: RetryPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
            retry_if: None,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_default_policy_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.delays().is_empty());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_delays_with_multiplier() {
        let policy = RetryPolicy::new(3)
            .with_delay_ms(100)
            .with_backoff_multiplier(2.0);

        assert_eq!(policy.delays(), ms(&[100, 200]));
    }

    #[test]
    fn test_delays_without_multiplier_are_constant() {
        let policy = RetryPolicy::new(4).with_delay_ms(50);
        assert_eq!(policy.delays(), ms(&[50, 50, 50]));
    }

    #[test]
    fn test_delays_capped() {
        let policy = RetryPolicy::new(5)
            .with_delay_ms(100)
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(300));

        assert_eq!(policy.delays(), ms(&[100, 200, 300, 300]));
    }

    #[test]
    fn test_fractional_multiplier() {
        let policy = RetryPolicy::new(3)
            .with_delay_ms(100)
            .with_backoff_multiplier(1.5);

        assert_eq!(policy.delays(), ms(&[100, 150]));
    }

    #[test]
    fn test_next_delay_saturates() {
        let policy = RetryPolicy::new(2).with_backoff_multiplier(1e30);
        assert_eq!(
            policy.next_delay(Duration::from_secs(1)),
            Duration::from_nanos(u64::MAX)
        );
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(RetryPolicy::new(0).validate().is_err());
        assert!(RetryPolicy::new(2)
            .with_backoff_multiplier(0.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::new(2)
            .with_backoff_multiplier(f64::NAN)
            .validate()
            .is_err());
        assert!(RetryPolicy::new(2)
            .with_delay_ms(500)
            .with_max_delay(Duration::from_millis(100))
            .validate()
            .is_err());
    }

    #[test]
    fn test_allows_uses_predicate() {
        let policy = RetryPolicy::new(3).with_retry_if(|err, _| err.is_timeout());
        let timeout = FlowError::Timeout {
            flow: "f".to_string(),
            step: Some("s".to_string()),
            duration: Duration::from_millis(5),
            scope: crate::errors::TimeoutScope::Step,
        };
        let failure = FlowError::from_handler("f", "s", anyhow::anyhow!("boom"));

        assert!(policy.allows(&timeout, 1));
        assert!(!policy.allows(&failure, 1));
        assert!(RetryPolicy::new(3).allows(&failure, 1));
    }

    #[test]
    fn test_config_round_trip() {
        let config: RetryPolicyConfig = serde_json::from_str(
            r#"{"maxAttempts": 3, "delayMs": 100, "backoffMultiplier": 2, "timeoutMs": 1000}"#,
        )
        .unwrap();
        let policy = RetryPolicy::from(config.clone());

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout, Some(Duration::from_secs(1)));
        assert_eq!(policy.delays(), ms(&[100, 200]));
        assert_eq!(policy.to_config(), config);
    }

    #[test]
    fn test_config_defaults() {
        let config: RetryPolicyConfig = serde_json::from_str(r#"{"maxAttempts": 2}"#).unwrap();
        assert_eq!(config.delay_ms, 0);
        assert!((config.backoff_multiplier - 1.0).abs() < f64::EPSILON);
    }
}
