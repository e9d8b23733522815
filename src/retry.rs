//! Retry rules for inference calls.
//!
//! A [`RetryPolicy`] is an ordered list of [`RetryRule`]s. When a call
//! fails, the first rule matching the error's [`ErrorClass`] decides whether
//! and when to try again. Each rule keeps its own attempt count, so a burst of
//! throttling does not consume the budget for transient faults.
//! [`ErrorClass::Permanent`] failures are never retried.

use std::time::Duration;

use crate::service::{ErrorClass, ServiceError};
use crate::{Error, Result};

/// One retry rule: which errors it covers and how it backs off.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRule {
    errors: Vec<ErrorClass>,
    interval: Duration,
    backoff_rate: f64,
    max_attempts: u32,
    max_delay: Option<Duration>,
}

impl RetryRule {
    /// Create a rule.
    ///
    /// `max_attempts` counts matched failures, the first call included:
    /// with `max_attempts = 3` the service is called at most three times for
    /// errors this rule covers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `errors` is empty, `max_attempts`
    /// is zero, or `backoff_rate` is below 1.0 or not finite.
    ///
    /// # Example
    ///
    /// ```rust
    /// use prompt_chain::{ErrorClass, RetryRule};
    /// use std::time::Duration;
    ///
    /// let rule = RetryRule::new(vec![ErrorClass::Transient], Duration::from_secs(2), 2.0, 6).unwrap();
    ///
    /// // Delays: 2s, 4s, 8s, ...
    /// assert_eq!(rule.delay_for_retry(0), Duration::from_secs(2));
    /// assert_eq!(rule.delay_for_retry(2), Duration::from_secs(8));
    /// ```
    pub fn new(
        errors: Vec<ErrorClass>,
        interval: Duration,
        backoff_rate: f64,
        max_attempts: u32,
    ) -> Result<Self> {
        if errors.is_empty() {
            return Err(Error::Validation("retry rule must match at least one error class".into()));
        }
        if max_attempts == 0 {
            return Err(Error::Validation("max_attempts must be greater than 0".into()));
        }
        if !backoff_rate.is_finite() || backoff_rate < 1.0 {
            return Err(Error::Validation(format!(
                "backoff_rate must be a finite value >= 1.0, got {backoff_rate}"
            )));
        }
        Ok(Self {
            errors,
            interval,
            backoff_rate,
            max_attempts,
            max_delay: None,
        })
    }

    /// Cap every delay at `max_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `max_delay` is shorter than the interval.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Result<Self> {
        if max_delay < self.interval {
            return Err(Error::Validation(format!(
                "max_delay {max_delay:?} is shorter than interval {:?}",
                self.interval
            )));
        }
        self.max_delay = Some(max_delay);
        Ok(self)
    }

    /// Whether this rule covers `class`.
    pub fn matches(&self, class: ErrorClass) -> bool {
        class != ErrorClass::Permanent && self.errors.contains(&class)
    }

    /// Maximum calls for errors this rule covers.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry numbered `retry` (0 is the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.backoff_rate.powi(exponent);
        let uncapped = Duration::try_from_secs_f64(self.interval.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => uncapped.min(cap),
            None => uncapped,
        }
    }
}

/// What to do after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then call again.
    Retry(Duration),
    /// The matching rule's budget is spent.
    Exhausted,
    /// No rule covers the error.
    Fail,
}

/// An ordered set of [`RetryRule`]s attached to an invoke step.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{RetryDecision, RetryPolicy, ServiceError};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// let mut tracker = policy.tracker();
///
/// // Throttling backs off longer than transient faults.
/// assert_eq!(
///     tracker.on_failure(&ServiceError::throttling("slow down")),
///     RetryDecision::Retry(Duration::from_secs(5))
/// );
/// assert_eq!(
///     tracker.on_failure(&ServiceError::transient("reset")),
///     RetryDecision::Retry(Duration::from_secs(2))
/// );
/// assert_eq!(
///     tracker.on_failure(&ServiceError::permanent("bad request")),
///     RetryDecision::Fail
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    /// A policy built from `rules`, evaluated in order.
    pub fn new(rules: Vec<RetryRule>) -> Self {
        Self { rules }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule.
    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    /// Start tracking attempts for one invocation.
    pub fn tracker(&self) -> RetryTracker<'_> {
        RetryTracker {
            policy: self,
            failures: vec![0; self.rules.len()],
        }
    }
}

impl Default for RetryPolicy {
    /// Throttling: 5s, x3, 5 attempts. Transient: 2s, x2, 6 attempts. Both capped at 60s.
    fn default() -> Self {
        let cap = Some(Duration::from_secs(60));
        Self {
            rules: vec![
                RetryRule {
                    errors: vec![ErrorClass::Throttling],
                    interval: Duration::from_secs(5),
                    backoff_rate: 3.0,
                    max_attempts: 5,
                    max_delay: cap,
                },
                RetryRule {
                    errors: vec![ErrorClass::Transient],
                    interval: Duration::from_secs(2),
                    backoff_rate: 2.0,
                    max_attempts: 6,
                    max_delay: cap,
                },
            ],
        }
    }
}

/// Per-invocation attempt counters for a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryTracker<'a> {
    policy: &'a RetryPolicy,
    failures: Vec<u32>,
}

impl RetryTracker<'_> {
    /// Record a failed call and decide what happens next.
    pub fn on_failure(&mut self, error: &ServiceError) -> RetryDecision {
        let Some(index) = self
            .policy
            .rules
            .iter()
            .position(|rule| rule.matches(error.class))
        else {
            return RetryDecision::Fail;
        };
        let rule = &self.policy.rules[index];
        self.failures[index] += 1;
        let failures = self.failures[index];
        if failures >= rule.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry(rule.delay_for_retry(failures - 1))
        }
    }
}
