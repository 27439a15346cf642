//! # TeleClaude Adapters
//!
//! Transport adapters that carry session traffic to chat platforms and
//! other computers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod traits;
mod http;
mod limiter;

/// Output formatting and truncation.
pub mod format;
/// Discord forum routing.
pub mod routing;

/// Telegram adapter.
pub mod telegram;
/// Discord adapter.
pub mod discord;
/// WhatsApp adapter.
pub mod whatsapp;
/// REST adapter and HTTP API.
pub mod rest;
/// Local terminal adapter.
pub mod terminal;

#[cfg(test)]
mod testing;

pub use traits::{
    Actor, Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, InboundEvent,
    InboundPayload, MessageMetadata, ensure_file,
};
pub use limiter::OutboundLimiter;
pub use format::{FormattedOutput, IdleTier, OutputStatus, format_output};
pub use routing::{ForumRouter, ForumRule, SessionRole};

// Re-export adapter implementations
pub use telegram::TelegramAdapter;
pub use discord::DiscordAdapter;
pub use whatsapp::WhatsAppAdapter;
pub use rest::RestAdapter;
pub use terminal::TerminalAdapter;
