//! Errors raised by the reasoning provider seam.
//!
//! Tools and the agent itself never return errors to their callers (they
//! encode failures in `ToolResult` / `FixResult`); the provider is the one
//! place where a typed error has to travel, because the retry policy needs to
//! tell transient failures from fatal ones.

use thiserror::Error;

/// Transport-level failure kinds worth distinguishing for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionReset,
    Connect,
    Dns,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error ({kind:?}): {message}")]
    Network { kind: NetworkErrorKind, message: String },

    /// The provider answered but reported throttling (e.g. a 200 body carrying a 429 code).
    #[error("provider throttled the request: {0}")]
    Throttled(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("no API key configured (set OPENROUTER_API_KEY)")]
    MissingApiKey,

    #[error("{0}")]
    Other(String),
}

/// Message fragments that mark an otherwise untyped error as transient.
const RETRYABLE_MESSAGE_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "quota",
    "too many requests",
    "overloaded",
];

impl ProviderError {
    /// Whether the retry policy should try again.
    ///
    /// Retryable: HTTP 429 and 5xx, every network failure, provider-reported
    /// throttling or unavailability, and any other error whose text mentions a
    /// timeout, quota or rate limit.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, message } => {
                *status == 429 || (500..=599).contains(status) || message_is_transient(message)
            }
            ProviderError::Network { .. } => true,
            ProviderError::Throttled(_) | ProviderError::Unavailable(_) => true,
            ProviderError::InvalidResponse(_) | ProviderError::MissingApiKey => false,
            ProviderError::Other(message) => message_is_transient(message),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_ascii_lowercase();
        if err.is_timeout() {
            ProviderError::Network {
                kind: NetworkErrorKind::Timeout,
                message,
            }
        } else if lower.contains("dns") || lower.contains("failed to lookup address") {
            ProviderError::Network {
                kind: NetworkErrorKind::Dns,
                message,
            }
        } else if lower.contains("connection reset") || lower.contains("broken pipe") {
            ProviderError::Network {
                kind: NetworkErrorKind::ConnectionReset,
                message,
            }
        } else if err.is_connect() || err.is_request() {
            ProviderError::Network {
                kind: NetworkErrorKind::Connect,
                message,
            }
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message,
            }
        } else if err.is_decode() {
            ProviderError::InvalidResponse(message)
        } else {
            ProviderError::Other(message)
        }
    }
}

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRYABLE_MESSAGE_HINTS.iter().any(|hint| lower.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_classification() {
        let rate = ProviderError::Http {
            status: 429,
            message: "slow down".into(),
        };
        let server = ProviderError::Http {
            status: 503,
            message: "unavailable".into(),
        };
        let auth = ProviderError::Http {
            status: 401,
            message: "bad key".into(),
        };
        assert!(rate.is_retryable());
        assert!(server.is_retryable());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_message_hints() {
        assert!(ProviderError::Other("Request timed out after 90s".into()).is_retryable());
        assert!(ProviderError::Other("monthly quota exceeded".into()).is_retryable());
        assert!(!ProviderError::Other("model not found".into()).is_retryable());
        assert!(ProviderError::Http {
            status: 400,
            message: "Rate limit reached for requests".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(!ProviderError::MissingApiKey.is_retryable());
        assert!(!ProviderError::InvalidResponse("garbage".into()).is_retryable());
        assert!(ProviderError::Throttled("busy".into()).is_retryable());
        assert!(ProviderError::Network {
            kind: NetworkErrorKind::Dns,
            message: "lookup failed".into()
        }
        .is_retryable());
    }
}
