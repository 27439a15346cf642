//! Core types used throughout TeleClaude.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shorten a session ID for logs and error messages.
#[must_use]
pub fn short_id(session_id: &str) -> &str {
    let end = session_id
        .char_indices()
        .nth(8)
        .map_or(session_id.len(), |(i, _)| i);
    &session_id[..end]
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Session is live and routable.
    #[default]
    Active,
    /// Close requested; channels are being torn down.
    Closing,
    /// Session is closed. The record is kept until explicitly deleted.
    Closed,
}

impl LifecycleStatus {
    /// Get string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 160, rows: 80 }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Telegram forum-topic identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramMetadata {
    /// Forum topic (message thread) ID.
    #[serde(default)]
    pub topic_id: Option<i64>,
    /// Message holding the live output.
    #[serde(default)]
    pub output_message_id: Option<String>,
    /// Footer message under the output.
    #[serde(default)]
    pub footer_message_id: Option<String>,
}

/// Discord forum-thread identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordMetadata {
    /// Discord user that owns the session.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Guild the forum lives in.
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Forum channel the thread was created in.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Thread ID.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Starter message of the forum thread.
    #[serde(default)]
    pub thread_topper_message_id: Option<String>,
    /// Message holding the live output.
    #[serde(default)]
    pub output_message_id: Option<String>,
    /// Status message ID.
    #[serde(default)]
    pub status_message_id: Option<String>,
}

/// WhatsApp conversation identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhatsAppMetadata {
    /// Customer phone number (WhatsApp ID).
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Last output message sent.
    #[serde(default)]
    pub output_message_id: Option<String>,
    /// When the customer last wrote to us (opens the 24h window).
    #[serde(default)]
    pub last_customer_message_at: Option<DateTime<Utc>>,
    /// Last inbound message ID.
    #[serde(default)]
    pub last_received_message_id: Option<String>,
    /// Conversation closed on our side.
    #[serde(default)]
    pub closed: bool,
}

/// Per-adapter metadata, one typed sub-record per platform.
///
/// Each sub-record is owned by its adapter. The blob is serialized with an
/// explicit field list so round-trips never drop data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMetadata {
    /// Telegram sub-record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramMetadata>,
    /// Discord sub-record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordMetadata>,
    /// WhatsApp sub-record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<WhatsAppMetadata>,
}

impl AdapterMetadata {
    /// Telegram sub-record, created on first access.
    pub fn telegram_mut(&mut self) -> &mut TelegramMetadata {
        self.telegram.get_or_insert_with(TelegramMetadata::default)
    }

    /// Discord sub-record, created on first access.
    pub fn discord_mut(&mut self) -> &mut DiscordMetadata {
        self.discord.get_or_insert_with(DiscordMetadata::default)
    }

    /// WhatsApp sub-record, created on first access.
    pub fn whatsapp_mut(&mut self) -> &mut WhatsAppMetadata {
        self.whatsapp.get_or_insert_with(WhatsAppMetadata::default)
    }

    /// Make sure a (possibly empty) sub-record exists for `adapter`.
    ///
    /// Adapters without metadata (rest, terminal) are ignored.
    pub fn ensure(&mut self, adapter: &str) {
        match adapter {
            "telegram" => {
                self.telegram_mut();
            }
            "discord" => {
                self.discord_mut();
            }
            "whatsapp" => {
                self.whatsapp_mut();
            }
            _ => {}
        }
    }

    /// Whether a sub-record exists for `adapter`.
    #[must_use]
    pub fn has(&self, adapter: &str) -> bool {
        match adapter {
            "telegram" => self.telegram.is_some(),
            "discord" => self.discord.is_some(),
            "whatsapp" => self.whatsapp.is_some(),
            _ => false,
        }
    }

    /// Output message ID recorded by `adapter`.
    #[must_use]
    pub fn output_message_id(&self, adapter: &str) -> Option<&str> {
        match adapter {
            "telegram" => self.telegram.as_ref()?.output_message_id.as_deref(),
            "discord" => self.discord.as_ref()?.output_message_id.as_deref(),
            "whatsapp" => self.whatsapp.as_ref()?.output_message_id.as_deref(),
            _ => None,
        }
    }

    /// Record (or clear) the output message ID for `adapter`.
    pub fn set_output_message_id(&mut self, adapter: &str, id: Option<String>) {
        match adapter {
            "telegram" => self.telegram_mut().output_message_id = id,
            "discord" => self.discord_mut().output_message_id = id,
            "whatsapp" => self.whatsapp_mut().output_message_id = id,
            _ => {}
        }
    }

    /// Copy `adapter`'s sub-record from `other` into `self`, leaving the rest untouched.
    pub fn merge_from(&mut self, adapter: &str, other: &Self) {
        match adapter {
            "telegram" => self.telegram.clone_from(&other.telegram),
            "discord" => self.discord.clone_from(&other.discord),
            "whatsapp" => self.whatsapp.clone_from(&other.whatsapp),
            _ => {}
        }
    }

    /// Overlay the non-null fields of `other`'s sub-records onto `self`.
    ///
    /// Used to fold inbound event metadata into an existing session without
    /// dropping identifiers the event does not carry.
    pub fn absorb(&mut self, other: &Self) {
        overlay(&mut self.telegram, other.telegram.as_ref());
        overlay(&mut self.discord, other.discord.as_ref());
        overlay(&mut self.whatsapp, other.whatsapp.as_ref());
    }

    /// String projection of one field, as used by the metadata index.
    #[must_use]
    pub fn field(&self, adapter: &str, field: &str) -> Option<String> {
        self.indexed_fields()
            .into_iter()
            .find(|(a, f, _)| *a == adapter && f == field)
            .map(|(_, _, v)| v)
    }

    /// All scalar, non-null fields as `(adapter, field, value)` triples.
    #[must_use]
    pub fn indexed_fields(&self) -> Vec<(&'static str, String, String)> {
        let mut out = Vec::new();
        let records = [
            ("telegram", self.telegram.as_ref().map(serde_json::to_value)),
            ("discord", self.discord.as_ref().map(serde_json::to_value)),
            ("whatsapp", self.whatsapp.as_ref().map(serde_json::to_value)),
        ];

        for (adapter, value) in records {
            let Some(Ok(serde_json::Value::Object(map))) = value else {
                continue;
            };
            for (field, value) in map {
                let projected = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                out.push((adapter, field, projected));
            }
        }

        out
    }
}

fn overlay<T>(target: &mut Option<T>, source: Option<&T>)
where
    T: Serialize + DeserializeOwned + Default,
{
    let Some(source) = source else {
        return;
    };
    let base = target.get_or_insert_with(T::default);
    let (Ok(serde_json::Value::Object(mut merged)), Ok(serde_json::Value::Object(extra))) =
        (serde_json::to_value(&*base), serde_json::to_value(source))
    else {
        return;
    };

    merged.extend(extra.into_iter().filter(|(_, v)| !v.is_null()));
    if let Ok(value) = serde_json::from_value(serde_json::Value::Object(merged)) {
        *base = value;
    }
}

/// UX state tracked per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxState {
    /// Adapter that delivered the most recent user input.
    #[serde(default)]
    pub last_input_adapter: Option<String>,
    /// When feedback was last shown to the user.
    #[serde(default)]
    pub last_feedback_received: Option<DateTime<Utc>>,
    /// Last message forwarded to the agent.
    #[serde(default)]
    pub last_message_sent: Option<String>,
    /// When output last changed.
    #[serde(default)]
    pub last_output_at: Option<DateTime<Utc>>,
    /// Full transcript of the agent output, offered for download on truncation.
    #[serde(default)]
    pub transcript_path: Option<String>,
}

/// A conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub session_id: String,
    /// Computer hosting the session.
    pub computer_name: String,
    /// tmux session backing the agent.
    pub tmux_session_name: String,
    /// Authoritative adapter. Set at creation, never changed.
    pub origin_adapter: String,
    /// Display title.
    pub title: String,
    /// Per-adapter identifiers.
    #[serde(default)]
    pub adapter_metadata: AdapterMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub last_activity: DateTime<Utc>,
    /// Terminal dimensions.
    #[serde(default)]
    pub terminal_size: TerminalSize,
    /// Working directory of the agent.
    #[serde(default)]
    pub working_directory: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Session was started by another AI rather than a human.
    #[serde(default)]
    pub initiated_by_ai: bool,
    /// When the session was closed.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    #[serde(default)]
    pub lifecycle_status: LifecycleStatus,
    /// Agent running in the session (e.g. "claude").
    #[serde(default)]
    pub active_agent: Option<String>,
    /// Agent thinking mode.
    #[serde(default)]
    pub thinking_mode: Option<String>,
    /// The agent's own session ID.
    #[serde(default)]
    pub native_session_id: Option<String>,
    /// UX state.
    #[serde(default)]
    pub ux: UxState,
}

impl Session {
    /// Whether the session is closing or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle_status != LifecycleStatus::Active
    }

    /// Shortened session ID for logs.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.session_id)
    }
}

/// Kind of message awaiting deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionType {
    /// Message typed by the user.
    UserInput,
    /// Ephemeral status message.
    Feedback,
}

impl DeletionType {
    /// Get string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::Feedback => "feedback",
        }
    }
}

/// An ephemeral message awaiting cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    /// Session the message belongs to.
    pub session_id: String,
    /// Provider message ID.
    pub message_id: String,
    /// Deletion type.
    pub deletion_type: DeletionType,
    /// Adapter the message was sent through.
    pub adapter: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl PendingDeletion {
    /// Create a pending deletion row.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        deletion_type: DeletionType,
        adapter: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            deletion_type,
            adapter: adapter.into(),
            created_at: Utc::now(),
        }
    }
}

/// Peer availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Reachable.
    Online,
    /// Not reachable.
    Offline,
}

/// A computer discovered through an adapter. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Computer name; the deduplication key.
    pub name: String,
    /// Availability.
    pub status: PeerStatus,
    /// Last time the peer was seen.
    pub last_seen: DateTime<Utc>,
    /// Adapter that reported the peer.
    pub adapter_type: String,
    /// Login user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Role (e.g. "development").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Free-form system stats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_stats: Option<serde_json::Value>,
}

impl PeerInfo {
    /// Create an online peer seen now.
    #[must_use]
    pub fn online(name: impl Into<String>, adapter_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PeerStatus::Online,
            last_seen: Utc::now(),
            adapter_type: adapter_type.into(),
            user: None,
            host: None,
            ip: None,
            role: None,
            system_stats: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("1a2b3c4d-5e6f-7a8b"), "1a2b3c4d");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_ensure_creates_empty_record() {
        let mut meta = AdapterMetadata::default();
        meta.ensure("telegram");
        meta.ensure("terminal");
        assert_eq!(meta.telegram, Some(TelegramMetadata::default()));
        assert!(meta.discord.is_none());
        assert!(meta.has("telegram"));
        assert!(!meta.has("terminal"));
    }

    #[test]
    fn test_field_projection() {
        let mut meta = AdapterMetadata::default();
        meta.telegram_mut().topic_id = Some(123);
        meta.discord_mut().thread_id = Some("998877".to_string());
        meta.whatsapp_mut().phone_number = Some("+15550001".to_string());

        assert_eq!(meta.field("telegram", "topic_id").as_deref(), Some("123"));
        assert_eq!(meta.field("discord", "thread_id").as_deref(), Some("998877"));
        assert_eq!(
            meta.field("whatsapp", "phone_number").as_deref(),
            Some("+15550001")
        );
        assert_eq!(meta.field("whatsapp", "closed").as_deref(), Some("false"));
        assert!(meta.field("discord", "channel_id").is_none());
    }

    #[test]
    fn test_merge_from_touches_one_adapter() {
        let mut fresh = AdapterMetadata::default();
        fresh.discord_mut().thread_id = Some("1".to_string());

        let mut mine = AdapterMetadata::default();
        mine.telegram_mut().topic_id = Some(7);
        mine.discord_mut().thread_id = Some("stale".to_string());

        fresh.merge_from("telegram", &mine);
        assert_eq!(fresh.telegram.as_ref().and_then(|t| t.topic_id), Some(7));
        assert_eq!(
            fresh.discord.as_ref().and_then(|d| d.thread_id.as_deref()),
            Some("1")
        );
    }

    #[test]
    fn test_absorb_keeps_existing_identifiers() {
        let mut current = AdapterMetadata::default();
        current.whatsapp_mut().phone_number = Some("15551234567".to_string());
        current.whatsapp_mut().output_message_id = Some("wamid.out".to_string());

        let mut inbound = AdapterMetadata::default();
        inbound.whatsapp_mut().last_received_message_id = Some("wamid.in".to_string());

        current.absorb(&inbound);
        let wa = current.whatsapp.unwrap();
        assert_eq!(wa.phone_number.as_deref(), Some("15551234567"));
        assert_eq!(wa.output_message_id.as_deref(), Some("wamid.out"));
        assert_eq!(wa.last_received_message_id.as_deref(), Some("wamid.in"));
        assert!(current.telegram.is_none());
    }

    #[test]
    fn test_metadata_roundtrip_keeps_fields() {
        let mut meta = AdapterMetadata::default();
        meta.telegram_mut().footer_message_id = Some("55".to_string());
        meta.whatsapp_mut().closed = true;

        let json = serde_json::to_string(&meta).unwrap();
        let back: AdapterMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
