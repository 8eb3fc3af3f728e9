//! Redelivery suppression.
//!
//! Slack redelivers an event when the first attempt is slow to acknowledge and
//! tags every redelivery with an attempt header. Tagged deliveries are
//! acknowledged without running the flow again, so each logical event yields
//! at most one reply and one ledger commit.

/// Header carrying the delivery attempt number (absent on first delivery).
pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

/// Header carrying why the transport retried (e.g. `http_timeout`).
pub const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    First,
    Redelivery { attempt: String },
}

pub struct RetryGuard;

impl RetryGuard {
    pub fn classify(attempt_marker: Option<&str>) -> Delivery {
        match attempt_marker.map(str::trim) {
            Some(attempt) if !attempt.is_empty() => Delivery::Redelivery {
                attempt: attempt.to_string(),
            },
            _ => Delivery::First,
        }
    }

    pub fn is_retry(attempt_marker: Option<&str>) -> bool {
        matches!(Self::classify(attempt_marker), Delivery::Redelivery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_empty_marker_is_first_delivery() {
        assert_eq!(RetryGuard::classify(None), Delivery::First);
        assert_eq!(RetryGuard::classify(Some("")), Delivery::First);
        assert!(!RetryGuard::is_retry(Some("  ")));
    }

    #[test]
    fn any_marker_is_redelivery() {
        assert_eq!(
            RetryGuard::classify(Some("1")),
            Delivery::Redelivery {
                attempt: "1".to_string()
            }
        );
        assert!(RetryGuard::is_retry(Some("3")));
    }
}
