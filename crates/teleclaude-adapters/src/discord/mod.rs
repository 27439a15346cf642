//! Discord adapter using the Bot REST API.
//!
//! Each session is a post (thread) in a forum channel picked by
//! [`ForumRouter`]. Messages that should look like they come from a person
//! go through a per-forum webhook.

mod api;
mod gateway;

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use teleclaude_core::config::DiscordConfig;
use teleclaude_core::secrets::ApiKey;
use teleclaude_core::types::{AdapterMetadata, PeerInfo, Session};
use teleclaude_core::validation::{limits, sanitize_filename, validate_message_content};

use self::api::{
    AllowedMentions, CreateMessageParams, DiscordApi, DiscordChannel, DiscordMessage,
    DiscordUser, FLAG_SUPPRESS_NOTIFICATIONS, ListedWebhook, StartThreadParams, StarterMessage,
    WEBHOOK_NAME, Webhook, WebhookMessage, download_components, usable_webhook,
};
use self::gateway::ThreadEvent;
use crate::format::truncate_head;
use crate::limiter::OutboundLimiter;
use crate::routing::ForumRouter;
use crate::traits::{
    Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, InboundEvent,
    InboundPayload, MessageMetadata, ensure_file,
};

pub use self::api::GatewayEvent;

/// Provider phrases meaning the session's thread is gone.
const MISSING_THREAD_ERRORS: &[&str] = &["Unknown Channel", "10003", "Unknown Thread"];

/// Thread names are capped at 100 characters.
const MAX_THREAD_NAME: usize = 100;

/// Discord adapter.
pub struct DiscordAdapter {
    api: DiscordApi,
    guild_id: Option<String>,
    user_id: Option<String>,
    router: ForumRouter,
    limiter: OutboundLimiter,
    state: Arc<RwLock<DiscordState>>,
}

#[derive(Debug, Default)]
struct DiscordState {
    connected: bool,
    /// Webhooks by forum channel ID.
    webhooks: HashMap<String, Webhook>,
    ctx: Option<AdapterContext>,
}

impl DiscordAdapter {
    /// Create a new Discord adapter.
    #[must_use]
    pub fn new(token: ApiKey, router: ForumRouter) -> Self {
        Self {
            api: DiscordApi::new(token),
            guild_id: None,
            user_id: None,
            router,
            limiter: OutboundLimiter::new(5, 5),
            state: Arc::new(RwLock::new(DiscordState::default())),
        }
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Config` if the token is missing.
    pub fn from_config(config: &DiscordConfig) -> Result<Self, AdapterError> {
        let token = config
            .token()
            .ok_or_else(|| AdapterError::Config("discord.botToken is required".to_string()))?;

        let mut adapter = Self::new(token, ForumRouter::from_config(config));
        adapter.guild_id.clone_from(&config.guild_id);
        adapter.user_id.clone_from(&config.user_id);
        Ok(adapter)
    }

    /// Whether `start` succeeded and `stop` has not been called.
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    fn thread_id(session: &Session) -> Result<&str, AdapterError> {
        session
            .adapter_metadata
            .discord
            .as_ref()
            .and_then(|d| d.thread_id.as_deref())
            .ok_or(AdapterError::NoDestination)
    }

    fn forum_id(session: &Session) -> Option<&str> {
        session
            .adapter_metadata
            .discord
            .as_ref()
            .and_then(|d| d.channel_id.as_deref())
    }

    /// Webhook for a forum channel, created on first use.
    async fn webhook_for(&self, channel_id: &str) -> Result<Webhook, AdapterError> {
        if let Some(hook) = self.state.read().await.webhooks.get(channel_id) {
            return Ok(hook.clone());
        }

        let listed: Result<Vec<ListedWebhook>, _> = self
            .api
            .call(
                Method::GET,
                &format!("/channels/{channel_id}/webhooks"),
                None::<&()>,
            )
            .await;
        let existing = match listed {
            Ok(listed) => usable_webhook(listed),
            Err(e) => {
                tracing::debug!(
                    adapter = "discord",
                    channel = channel_id,
                    error = %e,
                    "Listing webhooks failed, creating one"
                );
                None
            }
        };

        let hook = match existing {
            Some(hook) => hook,
            None => {
                self.api
                    .call(
                        Method::POST,
                        &format!("/channels/{channel_id}/webhooks"),
                        Some(&serde_json::json!({ "name": WEBHOOK_NAME })),
                    )
                    .await?
            }
        };

        self.state
            .write()
            .await
            .webhooks
            .insert(channel_id.to_string(), hook.clone());
        Ok(hook)
    }

    /// Post `text` in the thread as `metadata.actor`.
    async fn send_as_actor(
        &self,
        session: &Session,
        thread_id: &str,
        text: String,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let (Some(actor), Some(forum_id)) = (&metadata.actor, Self::forum_id(session)) else {
            return Err(AdapterError::NotSupported("actor reflection without a forum"));
        };

        let hook = self.webhook_for(forum_id).await?;
        let body = WebhookMessage {
            content: text,
            username: actor.name.clone(),
            avatar_url: actor.avatar_url.clone(),
            allowed_mentions: AllowedMentions::default(),
        };
        let message = self.api.execute_webhook(&hook, thread_id, &body).await?;
        Ok(message.id)
    }

    /// Feed a gateway dispatch (`MESSAGE_CREATE`, `THREAD_DELETE`) in from the
    /// gateway connection.
    ///
    /// # Errors
    ///
    /// Returns error if an attachment cannot be downloaded or the adapter is
    /// not started.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) -> Result<(), AdapterError> {
        let Some(thread_event) = gateway::normalize(event) else {
            return Ok(());
        };

        let ctx = self
            .state
            .read()
            .await
            .ctx
            .clone()
            .ok_or(AdapterError::NotConnected)?;

        let Some(inbound) = self.to_inbound(thread_event, &ctx.download_dir).await? else {
            return Ok(());
        };
        ctx.inbound
            .send(inbound)
            .await
            .map_err(|_| AdapterError::NotConnected)
    }

    async fn to_inbound(
        &self,
        event: ThreadEvent,
        download_dir: &Path,
    ) -> Result<Option<InboundEvent>, AdapterError> {
        let (thread_id, message_id, actor, payload) = match event {
            ThreadEvent::Text {
                thread_id,
                message_id,
                actor,
                text,
            } => {
                let Ok(text) = validate_message_content(&text, limits::MAX_MESSAGE_LENGTH) else {
                    tracing::warn!(adapter = "discord", thread = %thread_id, "Dropping oversized message");
                    return Ok(None);
                };
                (thread_id, Some(message_id), Some(actor), InboundPayload::Text(text))
            }
            ThreadEvent::Attachment {
                thread_id,
                message_id,
                actor,
                url,
                filename,
                caption,
                voice_duration,
            } => {
                let Ok(filename) = sanitize_filename(&filename) else {
                    return Ok(None);
                };
                let path: PathBuf = download_dir.join("discord").join(&thread_id).join(&filename);
                let bytes = self.api.download(&url).await?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, bytes).await?;

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let payload = match voice_duration {
                    Some(secs) => InboundPayload::Voice {
                        path,
                        duration_secs: Some(secs.round() as u32),
                    },
                    None => InboundPayload::File {
                        path,
                        filename,
                        caption,
                    },
                };
                (thread_id, Some(message_id), Some(actor), payload)
            }
            ThreadEvent::Deleted { thread_id } => (thread_id, None, None, InboundPayload::ChannelDeleted),
        };

        let mut seed = AdapterMetadata::default();
        seed.discord_mut().thread_id = Some(thread_id.clone());

        Ok(Some(InboundEvent {
            adapter: "discord".to_string(),
            lookup_field: "thread_id",
            lookup_value: thread_id,
            seed,
            message_id,
            actor,
            payload,
        }))
    }

    async fn thread_patch(&self, session: &Session, body: serde_json::Value, op: &str) -> bool {
        let Ok(thread_id) = Self::thread_id(session) else {
            return false;
        };

        match self
            .api
            .call_no_response(Method::PATCH, &format!("/channels/{thread_id}"), Some(&body))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    adapter = "discord",
                    session = %session.short_id(),
                    op,
                    error = %e,
                    "Thread update failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Adapter for DiscordAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Discord
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            has_ui: true,
            supports_edit: true,
            supports_files: true,
            supports_channels: true,
            max_message_len: AdapterKind::Discord.max_message_len(),
        }
    }

    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        let me: DiscordUser = self
            .api
            .call(Method::GET, "/users/@me", None::<&()>)
            .await?;

        let mut state = self.state.write().await;
        state.connected = true;
        state.ctx = Some(ctx);

        tracing::info!(adapter = "discord", bot = %me.username, "Discord bot connected");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        state.connected = false;
        state.ctx = None;
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let thread_id = Self::thread_id(session)?;
        self.limiter.acquire(thread_id).await;

        let limit = AdapterKind::Discord.max_message_len().unwrap_or(2000);
        let text = truncate_head(text, limit);

        if metadata.actor.is_some() && !metadata.feedback_only {
            match self
                .send_as_actor(session, thread_id, text.clone(), metadata)
                .await
            {
                Ok(id) => return Ok(id),
                Err(e) => tracing::warn!(
                    adapter = "discord",
                    session = %session.short_id(),
                    error = %e,
                    "Webhook reflection failed, sending as bot"
                ),
            }
        }

        let params = CreateMessageParams {
            content: text,
            flags: if metadata.silent || metadata.feedback_only {
                FLAG_SUPPRESS_NOTIFICATIONS
            } else {
                0
            },
            allowed_mentions: AllowedMentions::default(),
            components: if metadata.download.is_some() {
                download_components()
            } else {
                Vec::new()
            },
        };

        let message: DiscordMessage = self
            .api
            .call(
                Method::POST,
                &format!("/channels/{thread_id}/messages"),
                Some(&params),
            )
            .await?;
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        session: &Session,
        message_id: &str,
        text: &str,
        metadata: &MessageMetadata,
    ) -> bool {
        let Ok(thread_id) = Self::thread_id(session) else {
            return false;
        };

        let limit = AdapterKind::Discord.max_message_len().unwrap_or(2000);
        let components = if metadata.download.is_some() {
            download_components()
        } else {
            Vec::new()
        };
        let body = serde_json::json!({
            "content": truncate_head(text, limit),
            "components": components,
        });

        match self
            .api
            .call_no_response(
                Method::PATCH,
                &format!("/channels/{thread_id}/messages/{message_id}"),
                Some(&body),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    adapter = "discord",
                    session = %session.short_id(),
                    error = %e,
                    "Edit failed"
                );
                false
            }
        }
    }

    async fn delete_message(&self, session: &Session, message_id: &str) -> bool {
        let Ok(thread_id) = Self::thread_id(session) else {
            return false;
        };

        self.api
            .call_no_response(
                Method::DELETE,
                &format!("/channels/{thread_id}/messages/{message_id}"),
                None::<&()>,
            )
            .await
            .inspect_err(|e| {
                tracing::debug!(
                    adapter = "discord",
                    session = %session.short_id(),
                    error = %e,
                    "Delete failed"
                );
            })
            .is_ok()
    }

    async fn send_file(
        &self,
        session: &Session,
        path: &Path,
        caption: Option<&str>,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        ensure_file(path).await?;
        let thread_id = Self::thread_id(session)?;
        self.limiter.acquire(thread_id).await;

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());

        let flags = if metadata.silent || metadata.feedback_only {
            FLAG_SUPPRESS_NOTIFICATIONS
        } else {
            0
        };
        let payload = serde_json::json!({
            "content": caption.map(|c| truncate_head(c, 2000)).unwrap_or_default(),
            "flags": flags,
        });
        let form = reqwest::multipart::Form::new()
            .text("payload_json", payload.to_string())
            .part(
                "files[0]",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            );

        let message: DiscordMessage = self
            .api
            .call_multipart(&format!("/channels/{thread_id}/messages"), form)
            .await?;
        Ok(message.id)
    }

    async fn create_channel(
        &self,
        session: &mut Session,
        title: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        if let Ok(thread_id) = Self::thread_id(session) {
            return Ok(thread_id.to_string());
        }

        let forum_id = self
            .router
            .route_session(session)
            .ok_or_else(|| AdapterError::Config("no Discord forum for this session".to_string()))?
            .to_string();

        let params = StartThreadParams {
            name: title.chars().take(MAX_THREAD_NAME).collect(),
            message: StarterMessage {
                content: session
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("📂 `{}`", session.working_directory)),
            },
        };
        let thread: DiscordChannel = self
            .api
            .call(
                Method::POST,
                &format!("/channels/{forum_id}/threads"),
                Some(&params),
            )
            .await?;

        let dc = session.adapter_metadata.discord_mut();
        // A forum post's starter message shares the thread's ID
        dc.thread_topper_message_id = Some(thread.message.map_or_else(|| thread.id.clone(), |m| m.id));
        dc.thread_id = Some(thread.id.clone());
        dc.channel_id = Some(forum_id);
        dc.guild_id = thread.guild_id.or_else(|| self.guild_id.clone());
        if dc.user_id.is_none() {
            dc.user_id.clone_from(&self.user_id);
        }

        tracing::info!(
            adapter = "discord",
            session = %session.short_id(),
            thread = %thread.id,
            "Forum thread created"
        );
        Ok(thread.id)
    }

    async fn update_channel_title(&self, session: &Session, title: &str) -> bool {
        let name: String = title.chars().take(MAX_THREAD_NAME).collect();
        self.thread_patch(session, serde_json::json!({ "name": name }), "rename")
            .await
    }

    async fn close_channel(&self, session: &mut Session) -> bool {
        self.thread_patch(session, serde_json::json!({ "archived": true }), "archive")
            .await
    }

    async fn reopen_channel(&self, session: &mut Session) -> bool {
        self.thread_patch(session, serde_json::json!({ "archived": false }), "unarchive")
            .await
    }

    async fn delete_channel(&self, session: &mut Session) -> bool {
        let Ok(thread_id) = Self::thread_id(session) else {
            return false;
        };

        match self
            .api
            .call_no_response(Method::DELETE, &format!("/channels/{thread_id}"), None::<&()>)
            .await
        {
            Ok(()) => {
                self.clear_destination(session);
                true
            }
            Err(e) if self.is_missing_destination_error(&e) => {
                self.clear_destination(session);
                true
            }
            Err(e) => {
                tracing::warn!(
                    adapter = "discord",
                    session = %session.short_id(),
                    error = %e,
                    "Thread delete failed"
                );
                false
            }
        }
    }

    async fn discover_peers(&self) -> Vec<PeerInfo> {
        Vec::new()
    }

    fn is_missing_destination_error(&self, error: &AdapterError) -> bool {
        error.mentions_any(MISSING_THREAD_ERRORS)
    }

    fn clear_destination(&self, session: &mut Session) {
        let dc = session.adapter_metadata.discord_mut();
        dc.thread_id = None;
        dc.thread_topper_message_id = None;
        dc.output_message_id = None;
        dc.status_message_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;
    use tokio::sync::mpsc;

    fn adapter() -> DiscordAdapter {
        DiscordAdapter::new(
            ApiKey::new("test".to_string()),
            ForumRouter::new(Some("forum-1".to_string())),
        )
    }

    fn session(thread_id: Option<&str>) -> Session {
        let mut session = test_session("discord");
        session.adapter_metadata.discord_mut().thread_id = thread_id.map(str::to_string);
        session
    }

    #[test]
    fn test_webhook_selection_skips_tokenless_hooks() {
        let listed: Vec<ListedWebhook> = serde_json::from_value(serde_json::json!([
            { "id": "1", "name": "Other App" },
            { "id": "2", "name": "Zapier", "token": "zap" },
            { "id": "3", "name": "TeleClaude", "token": "ours" },
        ]))
        .unwrap();

        let hook = usable_webhook(listed).unwrap();
        assert_eq!(hook.id, "3");
        assert_eq!(hook.token, "ours");

        let foreign: Vec<ListedWebhook> =
            serde_json::from_value(serde_json::json!([{ "id": "1", "name": "Other App" }])).unwrap();
        assert!(usable_webhook(foreign).is_none());
    }

    #[test]
    fn test_capabilities() {
        let caps = adapter().capabilities();
        assert!(caps.has_ui);
        assert!(caps.supports_edit);
        assert_eq!(caps.max_message_len, Some(2000));
    }

    #[test]
    fn test_missing_destination_errors() {
        let adapter = adapter();
        let unknown = AdapterError::Provider(
            r#"404 Not Found: {"message": "Unknown Channel", "code": 10003}"#.to_string(),
        );
        assert!(adapter.is_missing_destination_error(&unknown));
        assert!(!adapter.is_missing_destination_error(&AdapterError::RateLimited));
    }

    #[tokio::test]
    async fn test_create_channel_is_idempotent() {
        let adapter = adapter();
        let mut session = session(Some("555"));
        let id = adapter
            .create_channel(&mut session, "Test", &MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(id, "555");
    }

    #[test]
    fn test_clear_destination_keeps_forum() {
        let adapter = adapter();
        let mut session = session(Some("555"));
        session.adapter_metadata.discord_mut().channel_id = Some("forum-1".to_string());

        adapter.clear_destination(&mut session);
        let dc = session.adapter_metadata.discord.unwrap();
        assert!(dc.thread_id.is_none());
        assert_eq!(dc.channel_id.as_deref(), Some("forum-1"));
    }

    #[tokio::test]
    async fn test_gateway_event_requires_start() {
        let adapter = adapter();
        let event = GatewayEvent {
            t: Some("THREAD_DELETE".to_string()),
            d: Some(serde_json::json!({ "id": "555" })),
        };
        assert!(matches!(
            adapter.handle_gateway_event(event).await,
            Err(AdapterError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_thread_delete_becomes_inbound_event() {
        let adapter = adapter();
        let (tx, mut rx) = mpsc::channel(4);
        adapter.state.write().await.ctx = Some(AdapterContext {
            computer_name: "macbook".to_string(),
            download_dir: std::env::temp_dir(),
            inbound: tx,
        });

        adapter
            .handle_gateway_event(GatewayEvent {
                t: Some("THREAD_DELETE".to_string()),
                d: Some(serde_json::json!({ "id": "555" })),
            })
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.adapter, "discord");
        assert_eq!(event.lookup_field, "thread_id");
        assert_eq!(event.lookup_value, "555");
        assert_eq!(event.payload, InboundPayload::ChannelDeleted);
    }
}
