//! Telegram adapter using the Bot API.
//!
//! One forum supergroup, one topic per session.

mod api;
mod poll;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use teleclaude_core::config::TelegramConfig;
use teleclaude_core::secrets::ApiKey;
use teleclaude_core::types::{PeerInfo, Session};

use self::api::{
    BotApi, EditMessageParams, ForumTopic, InlineKeyboardMarkup, SendMessageParams, TelegramUser,
};
use crate::format::truncate_head;
use crate::limiter::OutboundLimiter;
use crate::traits::{
    Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, MessageMetadata,
    ensure_file,
};

/// Provider phrases meaning the session's topic is gone.
const MISSING_TOPIC_ERRORS: &[&str] = &["message thread not found", "topic_deleted"];

/// The topic exists but was closed. It is reopened, never replaced.
const CLOSED_TOPIC_ERROR: &str = "topic_closed";

/// Forum topic names are capped at 128 characters.
const MAX_TOPIC_NAME: usize = 128;

/// Telegram adapter.
pub struct TelegramAdapter {
    api: BotApi,
    supergroup_id: i64,
    poll_timeout_secs: u64,
    limiter: OutboundLimiter,
    state: Arc<RwLock<TelegramState>>,
}

#[derive(Debug, Default)]
struct TelegramState {
    connected: bool,
    poller: Option<JoinHandle<()>>,
}

impl TelegramAdapter {
    /// Create a new Telegram adapter for one forum supergroup.
    #[must_use]
    pub fn new(token: ApiKey, supergroup_id: i64) -> Self {
        Self {
            api: BotApi::new(token),
            supergroup_id,
            poll_timeout_secs: 30,
            limiter: OutboundLimiter::default(),
            state: Arc::new(RwLock::new(TelegramState::default())),
        }
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Config` if the token or supergroup is missing.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, AdapterError> {
        let token = config
            .token()
            .ok_or_else(|| AdapterError::Config("telegram.botToken is required".to_string()))?;
        let supergroup_id = config
            .supergroup_id
            .ok_or_else(|| AdapterError::Config("telegram.supergroupId is required".to_string()))?;

        let mut adapter = Self::new(token, supergroup_id);
        adapter.poll_timeout_secs = config.poll_timeout_secs;
        Ok(adapter)
    }

    /// Whether `start` succeeded and `stop` has not been called.
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    fn topic_id(session: &Session) -> Result<i64, AdapterError> {
        session
            .adapter_metadata
            .telegram
            .as_ref()
            .and_then(|t| t.topic_id)
            .ok_or(AdapterError::NoDestination)
    }

    fn keyboard(metadata: &MessageMetadata) -> Option<InlineKeyboardMarkup> {
        metadata
            .download
            .as_ref()
            .map(|_| InlineKeyboardMarkup::download_button())
    }

    /// Call a topic-management method and map the result to the bool contract.
    ///
    /// `TOPIC_NOT_MODIFIED` means the topic is already in the requested state.
    async fn topic_call(&self, method: &str, session: &Session, extra: serde_json::Value) -> bool {
        let Ok(topic_id) = Self::topic_id(session) else {
            return false;
        };

        let mut params = serde_json::json!({
            "chat_id": self.supergroup_id,
            "message_thread_id": topic_id,
        });
        if let (Some(params), Some(extra)) = (params.as_object_mut(), extra.as_object()) {
            params.extend(extra.clone());
        }

        match self.api.call::<bool>(method, &params).await {
            Ok(_) => true,
            Err(e) if e.mentions_any(&["TOPIC_NOT_MODIFIED"]) => true,
            Err(e) => {
                tracing::warn!(
                    adapter = "telegram",
                    session = %session.short_id(),
                    method,
                    error = %e,
                    "Topic operation failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Adapter for TelegramAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Telegram
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            has_ui: true,
            supports_edit: true,
            supports_files: true,
            supports_channels: true,
            max_message_len: AdapterKind::Telegram.max_message_len(),
        }
    }

    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        let me: TelegramUser = self.api.call("getMe", &serde_json::json!({})).await?;

        let poller = tokio::spawn(poll::run(
            self.api.clone(),
            self.supergroup_id,
            self.poll_timeout_secs,
            ctx,
        ));

        let mut state = self.state.write().await;
        state.connected = true;
        if let Some(old) = state.poller.replace(poller) {
            old.abort();
        }

        tracing::info!(adapter = "telegram", bot = %me.first_name, "Telegram bot connected");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        state.connected = false;
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let topic_id = Self::topic_id(session)?;
        self.limiter.acquire(&topic_id.to_string()).await;

        let params = SendMessageParams {
            chat_id: self.supergroup_id,
            text: truncate_head(text, AdapterKind::Telegram.max_message_len().unwrap_or(4096)),
            message_thread_id: Some(topic_id),
            parse_mode: metadata.parse_mode.clone(),
            disable_notification: metadata.silent || metadata.feedback_only,
            reply_markup: Self::keyboard(metadata),
        };

        let message: api::TelegramMessage = match self.api.call("sendMessage", &params).await {
            Err(e) if e.mentions_any(&[CLOSED_TOPIC_ERROR]) => {
                tracing::info!(
                    adapter = "telegram",
                    session = %session.short_id(),
                    topic = topic_id,
                    "Topic is closed, reopening"
                );
                if !self
                    .topic_call("reopenForumTopic", session, serde_json::json!({}))
                    .await
                {
                    return Err(e);
                }
                self.api.call("sendMessage", &params).await?
            }
            sent => sent?,
        };
        Ok(message.message_id.to_string())
    }

    async fn edit_message(
        &self,
        session: &Session,
        message_id: &str,
        text: &str,
        metadata: &MessageMetadata,
    ) -> bool {
        let Ok(message_id) = message_id.parse::<i64>() else {
            return false;
        };

        let params = EditMessageParams {
            chat_id: self.supergroup_id,
            message_id,
            text: truncate_head(text, AdapterKind::Telegram.max_message_len().unwrap_or(4096)),
            parse_mode: metadata.parse_mode.clone(),
            reply_markup: Self::keyboard(metadata),
        };

        match self
            .api
            .call::<serde_json::Value>("editMessageText", &params)
            .await
        {
            Ok(_) => true,
            // Same text as before: the message is still there and current
            Err(e) if e.mentions_any(&["message is not modified"]) => true,
            Err(e) => {
                tracing::debug!(
                    adapter = "telegram",
                    session = %session.short_id(),
                    error = %e,
                    "Edit failed"
                );
                false
            }
        }
    }

    async fn delete_message(&self, session: &Session, message_id: &str) -> bool {
        let Ok(message_id) = message_id.parse::<i64>() else {
            return false;
        };

        let params = serde_json::json!({
            "chat_id": self.supergroup_id,
            "message_id": message_id,
        });
        match self.api.call::<bool>("deleteMessage", &params).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::debug!(
                    adapter = "telegram",
                    session = %session.short_id(),
                    error = %e,
                    "Delete failed"
                );
                false
            }
        }
    }

    async fn send_file(
        &self,
        session: &Session,
        path: &Path,
        caption: Option<&str>,
        metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        ensure_file(path).await?;
        let topic_id = Self::topic_id(session)?;
        self.limiter.acquire(&topic_id.to_string()).await;

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", self.supergroup_id.to_string())
            .text("message_thread_id", topic_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            );
        if let Some(caption) = caption {
            form = form.text("caption", truncate_head(caption, 1024));
        }
        if metadata.silent || metadata.feedback_only {
            form = form.text("disable_notification", "true");
        }

        let message: api::TelegramMessage = self.api.call_multipart("sendDocument", form).await?;
        Ok(message.message_id.to_string())
    }

    async fn create_channel(
        &self,
        session: &mut Session,
        title: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        if let Ok(topic_id) = Self::topic_id(session) {
            return Ok(topic_id.to_string());
        }

        let name: String = title.chars().take(MAX_TOPIC_NAME).collect();
        let topic: ForumTopic = self
            .api
            .call(
                "createForumTopic",
                &serde_json::json!({ "chat_id": self.supergroup_id, "name": name }),
            )
            .await?;

        session.adapter_metadata.telegram_mut().topic_id = Some(topic.message_thread_id);
        tracing::info!(
            adapter = "telegram",
            session = %session.short_id(),
            topic = topic.message_thread_id,
            "Forum topic created"
        );
        Ok(topic.message_thread_id.to_string())
    }

    async fn update_channel_title(&self, session: &Session, title: &str) -> bool {
        let name: String = title.chars().take(MAX_TOPIC_NAME).collect();
        self.topic_call("editForumTopic", session, serde_json::json!({ "name": name }))
            .await
    }

    async fn close_channel(&self, session: &mut Session) -> bool {
        self.topic_call("closeForumTopic", session, serde_json::json!({}))
            .await
    }

    async fn reopen_channel(&self, session: &mut Session) -> bool {
        self.topic_call("reopenForumTopic", session, serde_json::json!({}))
            .await
    }

    async fn delete_channel(&self, session: &mut Session) -> bool {
        let deleted = self
            .topic_call("deleteForumTopic", session, serde_json::json!({}))
            .await;
        if deleted {
            self.clear_destination(session);
        }
        deleted
    }

    async fn discover_peers(&self) -> Vec<PeerInfo> {
        // Bots cannot see each other in a supergroup
        Vec::new()
    }

    fn is_missing_destination_error(&self, error: &AdapterError) -> bool {
        error.mentions_any(MISSING_TOPIC_ERRORS)
    }

    fn clear_destination(&self, session: &mut Session) {
        let tg = session.adapter_metadata.telegram_mut();
        tg.topic_id = None;
        tg.output_message_id = None;
        tg.footer_message_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;

    fn adapter() -> TelegramAdapter {
        TelegramAdapter::new(ApiKey::new("test".to_string()), -100)
    }

    fn session(topic_id: Option<i64>) -> Session {
        let mut session = test_session("telegram");
        session.adapter_metadata.telegram_mut().topic_id = topic_id;
        session
    }

    #[test]
    fn test_capabilities() {
        let caps = adapter().capabilities();
        assert!(caps.has_ui);
        assert!(caps.supports_edit);
        assert_eq!(caps.max_message_len, Some(4096));
        assert_eq!(adapter().name(), "telegram");
    }

    #[tokio::test]
    async fn test_not_connected_until_started() {
        let adapter = adapter();
        assert!(!adapter.is_connected().await);
        adapter.stop().await.unwrap();
        assert!(!adapter.is_connected().await);
    }

    #[test]
    fn test_missing_destination_errors() {
        let adapter = adapter();
        for text in [
            "Bad Request: message thread not found",
            "Bad Request: TOPIC_DELETED",
        ] {
            assert!(adapter.is_missing_destination_error(&AdapterError::Provider(text.to_string())));
        }
        assert!(!adapter.is_missing_destination_error(&AdapterError::RateLimited));
        assert!(!adapter.is_missing_destination_error(&AdapterError::Provider(
            "Bad Request: TOPIC_CLOSED".to_string()
        )));
    }

    /// Minimal Bot API that reports the topic as closed until reopened.
    #[derive(Default)]
    struct ClosedTopicApi {
        calls: std::sync::Mutex<Vec<String>>,
        reopened: std::sync::atomic::AtomicBool,
    }

    async fn closed_topic_handler(
        axum::extract::State(api): axum::extract::State<Arc<ClosedTopicApi>>,
        axum::extract::Path((_bot, method)): axum::extract::Path<(String, String)>,
    ) -> axum::Json<serde_json::Value> {
        use std::sync::atomic::Ordering;

        api.calls.lock().unwrap().push(method.clone());
        axum::Json(match method.as_str() {
            "reopenForumTopic" => {
                api.reopened.store(true, Ordering::SeqCst);
                serde_json::json!({ "ok": true, "result": true })
            }
            "sendMessage" if !api.reopened.load(Ordering::SeqCst) => serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: TOPIC_CLOSED",
            }),
            "sendMessage" => serde_json::json!({
                "ok": true,
                "result": {
                    "message_id": 77,
                    "date": 1_700_000_000,
                    "chat": { "id": -100, "type": "supergroup" },
                    "message_thread_id": 123,
                },
            }),
            "createForumTopic" => serde_json::json!({
                "ok": true,
                "result": { "message_thread_id": 999, "name": "dup" },
            }),
            _ => serde_json::json!({ "ok": false, "description": "unexpected method" }),
        })
    }

    #[tokio::test]
    async fn test_closed_topic_is_reopened_not_replaced() {
        let api = Arc::new(ClosedTopicApi::default());
        let app = axum::Router::new()
            .route("/{bot}/{method}", axum::routing::post(closed_topic_handler))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let mut adapter = adapter();
        adapter.api = adapter.api.with_base(format!("http://{addr}"));

        let id = adapter
            .send_message(&session(Some(123)), "hi", &MessageMetadata::default())
            .await
            .unwrap();

        assert_eq!(id, "77");
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec!["sendMessage", "reopenForumTopic", "sendMessage"]
        );
    }

    #[test]
    fn test_clear_destination() {
        let adapter = adapter();
        let mut session = session(Some(123));
        adapter.set_output_message_id(&mut session, Some("55".to_string()));

        adapter.clear_destination(&mut session);
        let tg = session.adapter_metadata.telegram.unwrap();
        assert!(tg.topic_id.is_none());
        assert!(tg.output_message_id.is_none());
    }

    #[tokio::test]
    async fn test_create_channel_is_idempotent() {
        // A recorded topic is returned without touching the network
        let adapter = adapter();
        let mut session = session(Some(123));
        let id = adapter
            .create_channel(&mut session, "Test", &MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(id, "123");
    }

    #[tokio::test]
    async fn test_send_without_topic() {
        let adapter = adapter();
        let result = adapter
            .send_message(&session(None), "hi", &MessageMetadata::default())
            .await;
        assert!(matches!(result, Err(AdapterError::NoDestination)));
    }

    #[tokio::test]
    async fn test_send_file_missing() {
        let adapter = adapter();
        let result = adapter
            .send_file(
                &session(Some(1)),
                Path::new("/nonexistent/file.txt"),
                None,
                &MessageMetadata::default(),
            )
            .await;
        assert!(matches!(result, Err(AdapterError::FileNotFound(_))));
    }
}
