//! Inbound input validation and sanitization.
//!
//! Every platform event is validated before it becomes a command.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Validation error types.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Input exceeds maximum allowed length.
    #[error("Input exceeds maximum length ({max} bytes, got {actual})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual input length.
        actual: usize,
    },

    /// Disallowed characters in input.
    #[error("Disallowed characters in input")]
    DisallowedChars,

    /// Input is empty after sanitization.
    #[error("Empty input")]
    Empty,
}

/// Size limits per input type.
pub mod limits {
    /// Maximum inbound message length (64KB).
    pub const MAX_MESSAGE_LENGTH: usize = 64 * 1024;

    /// Maximum uploaded file size (50MB).
    pub const MAX_ATTACHMENT_SIZE: u64 = 50 * 1024 * 1024;

    /// Maximum file name length.
    pub const MAX_FILENAME_LENGTH: usize = 255;
}

/// Validate and sanitize message content from adapters.
///
/// Performs:
/// 1. Length check
/// 2. Strip null bytes and control chars (except newlines/tabs)
/// 3. Unicode normalization (NFKC)
///
/// # Errors
///
/// Returns `ValidationError::TooLong` if input exceeds `max_len`, or
/// `ValidationError::Empty` if nothing but whitespace remains.
pub fn validate_message_content(input: &str, max_len: usize) -> Result<String, ValidationError> {
    if input.len() > max_len {
        return Err(ValidationError::TooLong {
            max: max_len,
            actual: input.len(),
        });
    }

    let sanitized: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .collect();

    if sanitized.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    Ok(sanitized.nfkc().collect())
}

/// Validate an uploaded file name and reduce it to its final path component.
///
/// # Errors
///
/// Returns error if the name is empty, too long, or contains a null byte.
pub fn sanitize_filename(name: &str) -> Result<String, ValidationError> {
    if name.contains('\0') {
        return Err(ValidationError::DisallowedChars);
    }

    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(ValidationError::Empty);
    }
    if base.len() > limits::MAX_FILENAME_LENGTH {
        return Err(ValidationError::TooLong {
            max: limits::MAX_FILENAME_LENGTH,
            actual: base.len(),
        });
    }

    Ok(base.to_string())
}
