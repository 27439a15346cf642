//! Commands handed to the command service.
//!
//! Inbound platform events are normalized by the adapters, resolved to a
//! session by the router and then delivered here. What happens next (typing
//! into tmux, transcribing voice) is the command service's business.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use teleclaude_core::store::NewSession;
use teleclaude_core::{Session, StoreError};

/// Command service errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command could not be carried out.
    #[error("{0}")]
    Failed(String),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// User text for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMessage {
    /// Target session.
    pub session_id: String,
    /// Text.
    pub text: String,
    /// Adapter that received it.
    pub origin: String,
    /// Sender platform ID.
    pub actor_id: Option<String>,
    /// Sender display name.
    pub actor_name: Option<String>,
    /// Sender avatar.
    pub actor_avatar_url: Option<String>,
}

/// Uploaded file, already on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleFile {
    /// Target session.
    pub session_id: String,
    /// Local path.
    pub file_path: PathBuf,
    /// Original file name.
    pub filename: String,
    /// Caption.
    pub caption: Option<String>,
}

/// Voice note, already on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleVoice {
    /// Target session.
    pub session_id: String,
    /// Local path.
    pub file_path: PathBuf,
    /// Duration in seconds.
    pub duration: Option<u32>,
    /// Sender platform ID.
    pub actor_id: Option<String>,
}

/// A command for the command service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forward text to the agent.
    ProcessMessage(ProcessMessage),
    /// Hand over an uploaded file.
    HandleFile(HandleFile),
    /// Hand over a voice note.
    HandleVoice(HandleVoice),
    /// Send raw key presses (`/keys ctrl+c`).
    Keys {
        /// Target session.
        session_id: String,
        /// Key sequence.
        keys: String,
    },
    /// The session's channel went away on the platform.
    SessionClosed {
        /// Closed session.
        session_id: String,
    },
}

impl Command {
    /// Session the command targets.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::ProcessMessage(c) => &c.session_id,
            Self::HandleFile(c) => &c.session_id,
            Self::HandleVoice(c) => &c.session_id,
            Self::Keys { session_id, .. } | Self::SessionClosed { session_id } => session_id,
        }
    }
}

/// The collaborator that acts on inbound commands.
#[async_trait]
pub trait CommandService: Send + Sync {
    /// Create a session for a first contact on a platform.
    async fn create_session(&self, new: NewSession) -> Result<Session, CommandError>;

    /// Forward text to the agent.
    async fn process_message(&self, command: ProcessMessage) -> Result<(), CommandError>;

    /// Hand over an uploaded file.
    async fn handle_file(&self, command: HandleFile) -> Result<(), CommandError>;

    /// Hand over a voice note.
    async fn handle_voice(&self, command: HandleVoice) -> Result<(), CommandError>;

    /// React to a session's channel going away.
    async fn session_closed(&self, session_id: &str) -> Result<(), CommandError>;

    /// Send raw key presses to the session's terminal.
    async fn keys(&self, session_id: &str, keys: &str) -> Result<(), CommandError>;

    /// Dispatch a command to its handler.
    async fn execute(&self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::ProcessMessage(c) => self.process_message(c).await,
            Command::HandleFile(c) => self.handle_file(c).await,
            Command::HandleVoice(c) => self.handle_voice(c).await,
            Command::Keys { session_id, keys } => self.keys(&session_id, &keys).await,
            Command::SessionClosed { session_id } => self.session_closed(&session_id).await,
        }
    }
}
