//! Adapter credentials.
//!
//! - `ApiKey`: token wrapper that never prints its value
//! - `scrub_secrets`: redact token-bearing fragments from provider error text

use secrecy::{ExposeSecret, SecretBox};

/// Bot token / access token wrapper that prevents accidental logging.
#[derive(Clone)]
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    /// Wrap a token.
    #[must_use]
    pub fn new(key: String) -> Self {
        Self(SecretBox::new(key.into_boxed_str()))
    }

    /// Expose the secret for actual API calls.
    ///
    /// Use sparingly - only when building a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Replace every occurrence of this token in `text` with `[REDACTED]`.
    ///
    /// Provider errors (e.g. reqwest errors for Telegram) embed the request
    /// URL, which carries the bot token.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let secret = self.expose();
        if secret.is_empty() {
            return text.to_string();
        }
        text.replace(secret, "[REDACTED]")
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Scrub secrets from error messages and logs.
///
/// Replaces values after known secret patterns with `[REDACTED]`.
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut result = text.to_string();

    for pattern in patterns {
        let mut search_start = 0;
        while let Some(start) = result[search_start..].find(pattern) {
            let abs_start = search_start + start + pattern.len();

            // Value ends at whitespace, a quote, a separator, or a path boundary
            let end = result[abs_start..]
                .find(|c: char| {
                    c.is_whitespace() || matches!(c, '"' | '\'' | '&' | ',' | '/' | ')')
                })
                .map_or(result.len(), |e| abs_start + e);

            result.replace_range(abs_start..end, "[REDACTED]");

            search_start = abs_start + "[REDACTED]".len();
        }
    }

    result
}

/// Secret patterns that show up in provider errors.
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "api.telegram.org/bot",
    "access_token=",
    "token=",
    "Authorization: Bearer ",
    "Authorization: Bot ",
];
