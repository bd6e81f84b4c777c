//! Retry with exponential backoff for upstream stream failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, RikkiError};

/// Why an upstream failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    RateLimited,
    Overloaded,
    Timeout,
}

impl RetryReason {
    /// Human-readable label reported alongside a retry.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "Rate Limited",
            Self::Overloaded => "Provider is overloaded",
            Self::Timeout => "Request Timeout",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited => ErrorCategory::RateLimit,
            Self::Overloaded => ErrorCategory::Overloaded,
            Self::Timeout => ErrorCategory::Timeout,
        }
    }
}

/// Recognize rate-limit, overload and timeout signatures in raw error text.
pub fn classify_message(message: &str) -> Option<RetryReason> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        Some(RetryReason::RateLimited)
    } else if lower.contains("overloaded") || lower.contains("503") {
        Some(RetryReason::Overloaded)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Some(RetryReason::Timeout)
    } else {
        None
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub delay_millis: u64,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_label: Option<String>,
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(2_000),
            max_backoff: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max_backoff
        }
    }

    /// Map an error onto a retry reason, `None` when it is fatal.
    pub fn classify(&self, error: &RikkiError) -> Option<RetryReason> {
        match error {
            RikkiError::RateLimited { .. } => Some(RetryReason::RateLimited),
            RikkiError::Overloaded(_) => Some(RetryReason::Overloaded),
            RikkiError::Timeout(_) => Some(RetryReason::Timeout),
            RikkiError::Transport(message) => classify_message(message),
            _ => None,
        }
    }

    /// Decide what to do after `attempt` failed with `error`.
    pub fn decide(&self, attempt: u32, error: &RikkiError) -> RetryDecision {
        let reason = self.classify(error);
        let retryable = reason.is_some() && attempt < self.max_attempts;
        let delay_millis = if !retryable {
            0
        } else if let RikkiError::RateLimited {
            retry_after_ms: Some(after),
        } = error
        {
            (*after).min(self.max_backoff.as_millis() as u64)
        } else {
            self.delay(attempt).as_millis() as u64
        };
        RetryDecision {
            delay_millis,
            retryable,
            reason_label: reason.map(|r| r.label().to_string()),
        }
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RikkiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RikkiError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let decision = self.decide(attempt, &e);
                    if !decision.retryable {
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = decision.delay_millis,
                        reason = decision.reason_label.as_deref().unwrap_or_default(),
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(Duration::from_millis(decision.delay_millis)).await;
                    attempt += 1;
                }
            }
        }
    }
}
