//! Router errors.

use thiserror::Error;

use teleclaude_adapters::AdapterError;
use teleclaude_core::{StoreError, short_id};

use crate::commands::CommandError;

/// Router errors.
///
/// Every adapter-related variant names the adapter and the short session ID.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Origin delivery failed.
    #[error("{adapter} delivery failed for session {session}: {source}")]
    Delivery {
        /// Adapter name.
        adapter: String,
        /// Short session ID.
        session: String,
        /// Underlying error.
        #[source]
        source: AdapterError,
    },

    /// Channel provisioning failed.
    #[error("{adapter} channel creation failed for session {session}: {source}")]
    ChannelCreation {
        /// Adapter name.
        adapter: String,
        /// Short session ID.
        session: String,
        /// Underlying error.
        #[source]
        source: AdapterError,
    },

    /// The session's origin adapter is not registered.
    #[error("{adapter} is not registered (origin of session {session})")]
    AdapterNotRegistered {
        /// Adapter name.
        adapter: String,
        /// Short session ID.
        session: String,
    },

    /// Adapter failed to start.
    #[error("{adapter} failed to start: {source}")]
    Start {
        /// Adapter name.
        adapter: String,
        /// Underlying error.
        #[source]
        source: AdapterError,
    },

    /// Session not found.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// Malformed event payload.
    #[error("Invalid {event} payload for session {session}: {reason}")]
    InvalidPayload {
        /// Event name.
        event: String,
        /// Short session ID.
        session: String,
        /// What was wrong.
        reason: String,
    },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Command service error.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

impl RouterError {
    /// Origin delivery failure.
    #[must_use]
    pub fn delivery(adapter: &str, session_id: &str, source: AdapterError) -> Self {
        Self::Delivery {
            adapter: adapter.to_string(),
            session: short_id(session_id).to_string(),
            source,
        }
    }

    /// Channel provisioning failure.
    #[must_use]
    pub fn channel_creation(adapter: &str, session_id: &str, source: AdapterError) -> Self {
        Self::ChannelCreation {
            adapter: adapter.to_string(),
            session: short_id(session_id).to_string(),
            source,
        }
    }

    /// Unregistered origin adapter.
    #[must_use]
    pub fn not_registered(adapter: &str, session_id: &str) -> Self {
        Self::AdapterNotRegistered {
            adapter: adapter.to_string(),
            session: short_id(session_id).to_string(),
        }
    }

    /// Malformed event payload.
    #[must_use]
    pub fn invalid_payload(event: &str, session_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event: event.to_string(),
            session: short_id(session_id).to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_adapter_and_session() {
        let err = RouterError::delivery(
            "telegram",
            "1a2b3c4d-5e6f-4a8b-9c0d-112233445566",
            AdapterError::Provider("Bad Request: chat not found".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "telegram delivery failed for session 1a2b3c4d: Provider error: Bad Request: chat not found"
        );
    }
}
