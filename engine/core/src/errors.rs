//! Error Taxonomy
//!
//! Engine-level error types and the categorization of raw stream-error text
//! into a small set of user-presentable buckets.
//!
//! # Propagation Policy
//!
//! Image-load and pagination failures are fully local: they degrade one
//! image or one history page and never abort the session. Stream and
//! timeout errors reset the session to Idle after a categorized,
//! non-technical message. Validation errors surface synchronously at the
//! point of user input and block the action. No error is fatal to the
//! process.

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport-level failure talking to the backend.
    #[error("network error: {0}")]
    Network(String),

    /// No liveness signal within the configured threshold.
    #[error("timed out waiting for the stream: {0}")]
    Timeout(String),

    /// Explicit error event received from the transport.
    #[error("stream error: {0}")]
    Stream(String),

    /// A single image failed to load; isolated to that URL.
    #[error("image failed to load: {url}: {reason}")]
    ImageLoad {
        /// The image URL that failed.
        url: String,
        /// Why the load failed.
        reason: String,
    },

    /// A history fetch failed; isolated to that page.
    #[error("history fetch failed: {0}")]
    Pagination(String),

    /// User input rejected before any action was taken.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A request is already in flight; `begin_request` refused.
    #[error("a request is already in flight")]
    Busy,
}

/// User-presentable category of a stream error.
///
/// Categorization is first-match-wins against the raw error text, in the
/// order the variants are declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection-level failure.
    Network,
    /// The upstream took too long.
    Timeout,
    /// Authentication or authorization failure.
    Auth,
    /// The model/upstream service failed.
    Upstream,
    /// Anything else.
    Generic,
}

impl ErrorCategory {
    /// Categorize raw error text, first match wins.
    #[must_use]
    pub fn categorize(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        const NETWORK: &[&str] = &["network", "connection", "connect", "dns", "refused"];
        const TIMEOUT: &[&str] = &["timeout", "timed out", "deadline"];
        const AUTH: &[&str] = &["auth", "unauthorized", "forbidden", "401", "403", "token expired"];
        const UPSTREAM: &[&str] = &["upstream", "model", "overloaded", "502", "503"];

        if NETWORK.iter().any(|k| lower.contains(k)) {
            Self::Network
        } else if TIMEOUT.iter().any(|k| lower.contains(k)) {
            Self::Timeout
        } else if AUTH.iter().any(|k| lower.contains(k)) {
            Self::Auth
        } else if UPSTREAM.iter().any(|k| lower.contains(k)) {
            Self::Upstream
        } else {
            Self::Generic
        }
    }

    /// Concise, non-technical message shown in place of the reply.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => "Connection problem. Please check your network and try again.",
            Self::Timeout => "The reply took too long. Please try again.",
            Self::Auth => "Your session has expired. Please sign in again.",
            Self::Upstream => "The assistant is temporarily unavailable. Please try again shortly.",
            Self::Generic => "Something went wrong. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_first_match_wins() {
        // Contains both "network" and "timeout"; network is checked first.
        assert_eq!(
            ErrorCategory::categorize("network timeout while connecting"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::categorize("request timed out"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::categorize("401 Unauthorized"),
            ErrorCategory::Auth
        );
        assert_eq!(
            ErrorCategory::categorize("model overloaded"),
            ErrorCategory::Upstream
        );
        assert_eq!(
            ErrorCategory::categorize("weird failure"),
            ErrorCategory::Generic
        );
    }

    #[test]
    fn test_categorize_is_case_insensitive() {
        assert_eq!(
            ErrorCategory::categorize("Connection REFUSED"),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_user_messages_are_non_technical() {
        for cat in [
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::Auth,
            ErrorCategory::Upstream,
            ErrorCategory::Generic,
        ] {
            let msg = cat.user_message();
            assert!(!msg.contains("error code"));
            assert!(msg.ends_with('.'));
        }
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::ImageLoad {
            url: "https://example.com/a.png".to_string(),
            reason: "decode failed".to_string(),
        };
        assert!(err.to_string().contains("a.png"));
        assert_eq!(EngineError::Busy.to_string(), "a request is already in flight");
    }
}
