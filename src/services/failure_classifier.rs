//! Classification of model call failures.
//!
//! Everything above the model-call boundary only sees three kinds of failure.
//! The rules are evaluated top to bottom and the first match wins.

use std::time::Duration;

use crate::domain::ports::ModelCallError;

/// How the driver should react to a failed model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Short-lived rate limit. Retry the same model and credential after a wait.
    Transient { retry_after: Option<Duration> },
    /// Daily quota or billing block. Retrying today is pointless.
    Permanent,
    /// Anything else: bad request, server bug, transport failure.
    Other,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// Message fragments that mean the quota is gone for the day.
const PERMANENT_PATTERNS: &[&str] = &[
    "billing",
    "check your plan",
    "limit: 0",
    "per day",
    "perday",
    "daily",
    "exceeded your current quota",
];

/// Message fragments of short-lived throttling.
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "resource exhausted",
    "resource has been exhausted",
    "resource_exhausted",
    "too many requests",
    "please retry in",
    "perminute",
    "per minute",
];

/// Classify a failed call.
///
/// A server-provided retry delay always routes to transient, even when the
/// message also looks permanent.
pub fn classify(error: &ModelCallError) -> FailureKind {
    if let Some(retry_after) = error.retry_after {
        return FailureKind::Transient {
            retry_after: Some(retry_after),
        };
    }

    let message = error.message.to_lowercase();

    if PERMANENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return FailureKind::Permanent;
    }

    let throttled_status = matches!(error.status, Some(429 | 503));
    if throttled_status || TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return FailureKind::Transient {
            retry_after: parse_retry_hint(&message),
        };
    }

    FailureKind::Other
}

/// Extract a delay from prose such as "please retry in 17.5s".
fn parse_retry_hint(message: &str) -> Option<Duration> {
    let start = message.find("retry in ")? + "retry in ".len();
    let rest = &message[start..];
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = number.parse().ok()?;
    let unit = rest[number.len()..].trim_start();

    let secs = if unit.starts_with("ms") {
        value / 1000.0
    } else if unit.starts_with('s') {
        value
    } else if unit.starts_with('m') {
        value * 60.0
    } else {
        return None;
    };

    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(status: Option<u16>, message: &str) -> ModelCallError {
        ModelCallError::new(status, message)
    }

    #[test]
    fn test_server_delay_is_transient() {
        let e = err(Some(429), "quota").with_retry_after(Duration::from_secs(12));
        assert_eq!(
            classify(&e),
            FailureKind::Transient {
                retry_after: Some(Duration::from_secs(12))
            }
        );
    }

    #[test]
    fn test_server_delay_wins_over_permanent_message() {
        let e = err(Some(429), "Quota exceeded for metric PerDay, limit: 0")
            .with_retry_after(Duration::from_secs(30));
        assert!(classify(&e).is_transient());
    }

    #[test]
    fn test_billing_is_permanent_even_with_429() {
        let e = err(
            Some(429),
            "You exceeded your current quota, please check your plan and billing details",
        );
        assert_eq!(classify(&e), FailureKind::Permanent);
    }

    #[test]
    fn test_daily_metric_is_permanent() {
        let e = err(
            Some(429),
            "Quota exceeded for quota metric 'GenerateRequestsPerDayPerProjectPerModel'",
        );
        assert!(classify(&e).is_permanent());
        assert!(classify(&err(Some(403), "limit: 0")).is_permanent());
    }

    #[test]
    fn test_status_429_and_503_are_transient() {
        assert!(classify(&err(Some(429), "slow down")).is_transient());
        assert!(classify(&err(Some(503), "The model is overloaded")).is_transient());
    }

    #[test]
    fn test_transient_message_without_status() {
        let e = err(None, "RESOURCE_EXHAUSTED: GenerateRequestsPerMinute exceeded");
        assert!(classify(&e).is_transient());
    }

    #[test]
    fn test_retry_hint_parsed_from_message() {
        let e = err(Some(429), "Rate limit reached. Please retry in 17.5s.");
        assert_eq!(
            classify(&e),
            FailureKind::Transient {
                retry_after: Some(Duration::from_millis(17_500))
            }
        );
        let e = err(Some(429), "rate limit, retry in 250ms");
        assert_eq!(
            classify(&e),
            FailureKind::Transient {
                retry_after: Some(Duration::from_millis(250))
            }
        );
    }

    #[test]
    fn test_oversized_retry_hint_is_ignored() {
        let e = err(
            Some(429),
            "Rate limit reached. Please retry in 99999999999999999999999s.",
        );
        assert_eq!(classify(&e), FailureKind::Transient { retry_after: None });
        let e = err(Some(429), "rate limit, retry in 999999999999999999999m");
        assert_eq!(classify(&e), FailureKind::Transient { retry_after: None });
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(classify(&err(Some(400), "Invalid argument")), FailureKind::Other);
        assert_eq!(classify(&err(Some(500), "internal error")), FailureKind::Other);
        assert_eq!(classify(&err(None, "connection reset")), FailureKind::Other);
    }
}
