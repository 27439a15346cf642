//! # TeleClaude Core
//!
//! Core types, configuration, and storage for TeleClaude.
//!
//! This crate provides:
//! - The session data model and per-adapter metadata sub-records
//! - Configuration loading and validation (JSON5 format)
//! - The persistent session store (sled, index-backed metadata lookups)
//! - Secret wrappers for adapter tokens
//! - Inbound text validation and sanitization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod secrets;
pub mod store;
pub mod types;
pub mod validation;

pub use config::{Config, ConfigError};
pub use secrets::{ApiKey, scrub_secrets};
pub use store::{NewSession, SessionStore, SessionUpdate, SledSessionStore, StoreError};
pub use types::{
    AdapterMetadata, DeletionType, DiscordMetadata, LifecycleStatus, PeerInfo, PeerStatus,
    PendingDeletion, Session, TelegramMetadata, WhatsAppMetadata, short_id,
};
pub use validation::{ValidationError, validate_message_content};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::secrets::ApiKey;
    pub use crate::store::{SessionStore, SessionUpdate};
    pub use crate::types::*;
}
