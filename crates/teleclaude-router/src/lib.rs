//! # TeleClaude Router
//!
//! Routes session traffic across transport adapters. The origin adapter of a
//! session gets every delivery and its failures are fatal. Other UI adapters
//! observe best-effort.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod commands;
pub mod error;
mod events;
pub mod registry;

pub use client::{AdapterClient, TERMINAL};
pub use commands::{
    Command, CommandError, CommandService, HandleFile, HandleVoice, ProcessMessage,
};
pub use error::RouterError;
pub use registry::AdapterRegistry;
