//! Input Validation
//!
//! Synchronous validation of user input before any network action is taken.
//! Rejections surface immediately at the point of input and block the
//! action; they never touch session state.

use crate::config::LimitsConfig;

/// Result of validating user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is acceptable.
    Valid,
    /// Input was rejected with a human-readable reason.
    Invalid(String),
}

impl ValidationResult {
    /// Whether the input passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Validates user input against configured limits.
#[derive(Clone, Debug)]
pub struct InputValidator {
    limits: LimitsConfig,
}

impl InputValidator {
    /// Create a validator with the given limits.
    #[must_use]
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Validate an outgoing chat message.
    #[must_use]
    pub fn validate_message(&self, content: &str) -> ValidationResult {
        if content.trim().is_empty() {
            return ValidationResult::Invalid("Message is empty".to_string());
        }
        ValidationResult::Valid
    }

    /// Validate a conversation title (create or rename).
    ///
    /// An empty title blocks a rename; an oversize title blocks both.
    #[must_use]
    pub fn validate_title(&self, title: &str) -> ValidationResult {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return ValidationResult::Invalid("Title is empty".to_string());
        }
        if trimmed.chars().count() > self.limits.max_title_len {
            return ValidationResult::Invalid(format!(
                "Title too long: {} characters (max: {})",
                trimmed.chars().count(),
                self.limits.max_title_len
            ));
        }
        ValidationResult::Valid
    }

    /// Validate an image URL found in message content.
    ///
    /// Only absolute http(s) URLs are accepted; anything else is treated as
    /// malformed and never handed to the loader.
    #[must_use]
    pub fn validate_image_url(&self, url: &str) -> ValidationResult {
        match reqwest::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
                ValidationResult::Valid
            }
            Ok(parsed) => ValidationResult::Invalid(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )),
            Err(_) => ValidationResult::Invalid("Malformed image URL".to_string()),
        }
    }

    /// Derive a conversation title from the first message.
    ///
    /// Used when a send auto-creates a conversation: the text is trimmed
    /// and truncated to the title limit on a character boundary.
    #[must_use]
    pub fn derive_title(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.chars().count() <= self.limits.max_title_len {
            return trimmed.to_string();
        }
        trimmed.chars().take(self.limits.max_title_len).collect()
    }
}
