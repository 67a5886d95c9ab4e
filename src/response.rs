//! Outcome to transport mapping.
//!
//! The core never touches a transport. This module gives the HTTP layer the
//! status and body it should send for an outcome: `Ready` is 200 with the
//! serialized payload, `TimedOut` is 408 with a short diagnostic, `Closed` is
//! 410 (the resource is permanently gone).

use serde::Serialize;

use crate::coordinator::Outcome;

/// 200 OK.
pub const STATUS_OK: u16 = 200;
/// 408 Request Timeout.
pub const STATUS_REQUEST_TIMEOUT: u16 = 408;
/// 410 Gone.
pub const STATUS_GONE: u16 = 410;

/// Body sent with a timed out long poll.
pub const TIMEOUT_BODY: &str = "Request timeout occurred.";

/// Status code and optional body for a resolved subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseParts {
    /// HTTP status code.
    pub status: u16,
    /// Response body, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ResponseParts {
    /// Returns true for a 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

impl<C> From<&Outcome<C>> for ResponseParts {
    fn from(outcome: &Outcome<C>) -> Self {
        match outcome {
            Outcome::Ready(payload) => Self {
                status: STATUS_OK,
                body: Some(payload.body.clone()),
            },
            Outcome::TimedOut => Self {
                status: STATUS_REQUEST_TIMEOUT,
                body: Some(TIMEOUT_BODY.to_string()),
            },
            Outcome::Closed => Self {
                status: STATUS_GONE,
                body: None,
            },
        }
    }
}

impl<C> From<Outcome<C>> for ResponseParts {
    fn from(outcome: Outcome<C>) -> Self {
        match outcome {
            Outcome::Ready(payload) => Self {
                status: STATUS_OK,
                body: Some(payload.body),
            },
            other => Self::from(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{resolve, Subscription};
    use crate::holder::ContentHolder;
    use std::time::Duration;

    #[test]
    fn ready_maps_to_ok_with_body() {
        let h = ContentHolder::new("bcd234".to_string()).unwrap();
        let stale = h.fingerprint_of(&"abc123".to_string()).unwrap();
        let out = resolve(&h, &Subscription::since(stale)).unwrap();

        let parts = ResponseParts::from(out);
        assert_eq!(parts.status, STATUS_OK);
        assert!(parts.is_success());
        assert_eq!(parts.body.as_deref(), Some(r#""bcd234""#));
    }

    #[test]
    fn timeout_and_closed_mapping() {
        let parts = ResponseParts::from(&Outcome::<String>::TimedOut);
        assert_eq!(parts.status, STATUS_REQUEST_TIMEOUT);
        assert_eq!(parts.body.as_deref(), Some(TIMEOUT_BODY));
        assert!(!parts.is_success());

        let h = ContentHolder::new("abc123".to_string()).unwrap();
        h.terminate();
        let out = resolve(&h, &Subscription::next_update().with_timeout(Duration::from_secs(5))).unwrap();
        let parts = ResponseParts::from(out);
        assert_eq!(parts.status, STATUS_GONE);
        assert!(parts.body.is_none());
        assert_eq!(serde_json::to_string(&parts).unwrap(), r#"{"status":410}"#);
    }
}
