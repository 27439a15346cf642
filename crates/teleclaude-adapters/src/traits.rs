//! Adapter traits.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use teleclaude_core::types::{AdapterMetadata, PeerInfo, Session};

/// Adapter errors.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Adapter not started.
    #[error("Adapter not connected")]
    NotConnected,

    /// The platform rejected the request.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session has no channel on this platform yet.
    #[error("No destination recorded for this session")]
    NoDestination,

    /// Operation not supported by this transport.
    #[error("{0} is not supported by this adapter")]
    NotSupported(&'static str),

    /// Local file to upload does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Local IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Case-insensitive match of the error text against known provider phrases.
    #[must_use]
    pub fn mentions_any(&self, needles: &[&str]) -> bool {
        let text = self.to_string().to_lowercase();
        needles
            .iter()
            .any(|needle| text.contains(&needle.to_lowercase()))
    }
}

/// Closed set of transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Telegram forum topics.
    Telegram,
    /// Discord forum threads.
    Discord,
    /// WhatsApp Cloud API conversations.
    WhatsApp,
    /// HTTP API for other computers and tools.
    Rest,
    /// Local terminal.
    Terminal,
}

impl AdapterKind {
    /// Adapter name as stored in `Session::origin_adapter`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::WhatsApp => "whatsapp",
            Self::Rest => "rest",
            Self::Terminal => "terminal",
        }
    }

    /// Platform message size limit in characters. `None` is unbounded.
    #[must_use]
    pub const fn max_message_len(&self) -> Option<usize> {
        match self {
            Self::Telegram | Self::WhatsApp => Some(4096),
            Self::Discord => Some(2000),
            Self::Rest | Self::Terminal => None,
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "discord" => Ok(Self::Discord),
            "whatsapp" => Ok(Self::WhatsApp),
            "rest" => Ok(Self::Rest),
            "terminal" => Ok(Self::Terminal),
            other => Err(AdapterError::Config(format!("unknown adapter: {other}"))),
        }
    }
}

/// Adapter capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AdapterCapabilities {
    /// Renders messages to a human. Only UI adapters receive broadcasts.
    pub has_ui: bool,
    /// Messages can be edited in place.
    pub supports_edit: bool,
    /// Files can be uploaded.
    pub supports_files: bool,
    /// Sessions map to a platform channel/thread.
    pub supports_channels: bool,
    /// Message size limit in characters.
    pub max_message_len: Option<usize>,
}

impl AdapterCapabilities {
    /// Capabilities of a transport with no display surface.
    #[must_use]
    pub const fn headless() -> Self {
        Self {
            has_ui: false,
            supports_edit: false,
            supports_files: false,
            supports_channels: false,
            max_message_len: None,
        }
    }
}

/// Who a message should appear to come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// Platform user ID.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    /// Mirror of a message delivered elsewhere, or ephemeral feedback.
    /// Sent without notification and never reflected through an actor.
    pub feedback_only: bool,
    /// Platform parse mode (e.g. "MarkdownV2", "HTML").
    pub parse_mode: Option<String>,
    /// Post as this actor instead of the bot identity where supported.
    pub actor: Option<Actor>,
    /// Full transcript offered for download when the text was truncated.
    pub download: Option<PathBuf>,
    /// Suppress notifications.
    pub silent: bool,
}

impl MessageMetadata {
    /// Metadata for an observer mirror.
    #[must_use]
    pub fn feedback() -> Self {
        Self {
            feedback_only: true,
            silent: true,
            ..Default::default()
        }
    }

    /// Copy of `self` marked as an observer mirror.
    #[must_use]
    pub fn as_feedback(&self) -> Self {
        Self {
            feedback_only: true,
            silent: true,
            ..self.clone()
        }
    }
}

/// Context handed to adapters on start.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// This computer's name.
    pub computer_name: String,
    /// Where inbound files are downloaded to.
    pub download_dir: PathBuf,
    /// Sink for normalized platform events.
    pub inbound: mpsc::Sender<InboundEvent>,
}

/// Normalized platform event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// User text.
    Text(String),
    /// Uploaded file, already downloaded.
    File {
        /// Local path.
        path: PathBuf,
        /// Original file name.
        filename: String,
        /// Caption.
        caption: Option<String>,
    },
    /// Voice note, already downloaded.
    Voice {
        /// Local path.
        path: PathBuf,
        /// Duration in seconds.
        duration_secs: Option<u32>,
    },
    /// The user asked for the full transcript.
    DownloadRequested,
    /// The session's channel was deleted on the platform.
    ChannelDeleted,
}

/// A platform event, ready to be resolved to a session.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Adapter that received it.
    pub adapter: String,
    /// Metadata field identifying the session (e.g. `topic_id`).
    pub lookup_field: &'static str,
    /// Value of that field.
    pub lookup_value: String,
    /// Metadata to seed a new session with when none matches.
    pub seed: AdapterMetadata,
    /// Provider message ID, when there is one.
    pub message_id: Option<String>,
    /// Sender.
    pub actor: Option<Actor>,
    /// Payload.
    pub payload: InboundPayload,
}

/// Transport adapter.
///
/// Non-fatal operations return `bool`. Channel operations mutate only the
/// adapter's own metadata sub-record; the caller persists it.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter name matched against `Session::origin_adapter`.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Transport kind.
    fn kind(&self) -> AdapterKind;

    /// Capabilities.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Start listening for platform events.
    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError>;

    /// Stop listening.
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Send a message and return its provider ID (`""` when there is no UI).
    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError>;

    /// Edit a message. `false` means "send a new one instead".
    async fn edit_message(
        &self,
        session: &Session,
        message_id: &str,
        text: &str,
        metadata: &MessageMetadata,
    ) -> bool;

    /// Delete a message.
    async fn delete_message(&self, session: &Session, message_id: &str) -> bool;

    /// Upload a local file.
    async fn send_file(
        &self,
        session: &Session,
        path: &Path,
        caption: Option<&str>,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError>;

    /// Provision the session's channel, returning the existing one if recorded.
    async fn create_channel(
        &self,
        session: &mut Session,
        title: &str,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError>;

    /// Rename the session's channel.
    async fn update_channel_title(&self, session: &Session, title: &str) -> bool;

    /// Close (archive) the session's channel.
    async fn close_channel(&self, session: &mut Session) -> bool;

    /// Reopen the session's channel.
    async fn reopen_channel(&self, session: &mut Session) -> bool;

    /// Delete the session's channel.
    async fn delete_channel(&self, session: &mut Session) -> bool;

    /// Computers visible through this transport. Bounded in time; never fails.
    async fn discover_peers(&self) -> Vec<PeerInfo>;

    /// Stream output published for a session until `timeout` elapses.
    async fn poll_output_stream(
        &self,
        _session: &Session,
        _timeout: Duration,
    ) -> Result<BoxStream<'static, String>, AdapterError> {
        Err(AdapterError::NotSupported("output streaming"))
    }

    /// Whether `error` means the session's channel no longer exists.
    fn is_missing_destination_error(&self, _error: &AdapterError) -> bool {
        false
    }

    /// Forget the session's channel identifiers.
    fn clear_destination(&self, _session: &mut Session) {}

    /// Message holding this adapter's live output.
    fn output_message_id(&self, session: &Session) -> Option<String> {
        session
            .adapter_metadata
            .output_message_id(self.name())
            .map(str::to_string)
    }

    /// Record (or clear) this adapter's live output message.
    fn set_output_message_id(&self, session: &mut Session, message_id: Option<String>) {
        session
            .adapter_metadata
            .set_output_message_id(self.name(), message_id);
    }
}

/// Fail with `FileNotFound` unless `path` is an existing file.
///
/// # Errors
///
/// Returns `AdapterError::FileNotFound` if the path is missing.
pub async fn ensure_file(path: &Path) -> Result<u64, AdapterError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(AdapterError::FileNotFound(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            AdapterKind::Telegram,
            AdapterKind::Discord,
            AdapterKind::WhatsApp,
            AdapterKind::Rest,
            AdapterKind::Terminal,
        ] {
            assert_eq!(kind.as_str().parse::<AdapterKind>().unwrap(), kind);
        }
        assert!("carrier-pigeon".parse::<AdapterKind>().is_err());
    }

    #[test]
    fn test_platform_limits() {
        assert_eq!(AdapterKind::Telegram.max_message_len(), Some(4096));
        assert_eq!(AdapterKind::Discord.max_message_len(), Some(2000));
        assert_eq!(AdapterKind::WhatsApp.max_message_len(), Some(4096));
        assert_eq!(AdapterKind::Terminal.max_message_len(), None);
    }

    #[test]
    fn test_mentions_any_is_case_insensitive() {
        let err = AdapterError::Provider("Bad Request: message thread not found".to_string());
        assert!(err.mentions_any(&["Message thread not found"]));
        assert!(!err.mentions_any(&["Unknown Channel"]));
    }

    #[tokio::test]
    async fn test_ensure_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.txt");
        assert!(matches!(
            ensure_file(&path).await,
            Err(AdapterError::FileNotFound(_))
        ));

        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(ensure_file(&path).await.unwrap(), 5);
    }
}
