//! WhatsApp adapter using the Cloud API.
//!
//! A session is a conversation with one customer phone number. Free-form
//! messages are only allowed within 24 hours of the customer's last message;
//! outside that window a pre-approved template is sent instead.

mod api;
mod webhook;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use teleclaude_core::config::WhatsAppConfig;
use teleclaude_core::secrets::ApiKey;
use teleclaude_core::types::{AdapterMetadata, PeerInfo, Session};
use teleclaude_core::validation::{limits, sanitize_filename, validate_message_content};

use self::api::{
    CloudApi, DocumentBody, OutboundBody, OutboundMessage, TemplateBody, TemplateLanguage,
    TextBody,
};
use self::webhook::{CustomerMessage, CustomerMessageKind, SIGNATURE_HEADER, verify_signature};
use crate::format::truncate_head;
use crate::limiter::OutboundLimiter;
use crate::traits::{
    Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, InboundEvent,
    InboundPayload, MessageMetadata, ensure_file,
};

pub use self::api::WebhookPayload;

/// How long after the customer's last message free-form replies are allowed.
pub const CUSTOMER_WINDOW: TimeDelta = TimeDelta::hours(24);

/// Whether a free-form message may be sent at `now`.
#[must_use]
pub fn within_customer_window(last_customer_message: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_customer_message.is_some_and(|last| now.signed_duration_since(last) < CUSTOMER_WINDOW)
}

/// WhatsApp adapter.
pub struct WhatsAppAdapter {
    api: CloudApi,
    template_name: String,
    template_language: String,
    verify_token: Option<String>,
    app_secret: Option<ApiKey>,
    limiter: OutboundLimiter,
    state: Arc<RwLock<WhatsAppState>>,
}

#[derive(Debug, Default)]
struct WhatsAppState {
    ctx: Option<AdapterContext>,
}

impl WhatsAppAdapter {
    /// Create a new WhatsApp adapter for one business phone number.
    #[must_use]
    pub fn new(token: ApiKey, phone_number_id: impl Into<String>) -> Self {
        Self {
            api: CloudApi::new(token, phone_number_id.into()),
            template_name: "session_update".to_string(),
            template_language: "en_US".to_string(),
            verify_token: None,
            app_secret: None,
            limiter: OutboundLimiter::default(),
            state: Arc::new(RwLock::new(WhatsAppState::default())),
        }
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Config` if the token or phone number ID is missing.
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, AdapterError> {
        let token = config
            .token()
            .ok_or_else(|| AdapterError::Config("whatsapp.accessToken is required".to_string()))?;
        if config.phone_number_id.is_empty() {
            return Err(AdapterError::Config(
                "whatsapp.phoneNumberId is required".to_string(),
            ));
        }

        let mut adapter = Self::new(token, config.phone_number_id.clone());
        adapter.template_name.clone_from(&config.template_name);
        adapter.template_language.clone_from(&config.template_language);
        adapter.verify_token.clone_from(&config.verify_token);
        adapter.app_secret = config.secret();
        if adapter.app_secret.is_none() {
            tracing::warn!(
                adapter = "whatsapp",
                "No whatsapp.appSecret configured, webhook deliveries will be rejected"
            );
        }
        Ok(adapter)
    }

    fn recipient(session: &Session) -> Result<&str, AdapterError> {
        session
            .adapter_metadata
            .whatsapp
            .as_ref()
            .filter(|wa| !wa.closed)
            .and_then(|wa| wa.phone_number.as_deref())
            .ok_or(AdapterError::NoDestination)
    }

    fn last_customer_message(session: &Session) -> Option<DateTime<Utc>> {
        session
            .adapter_metadata
            .whatsapp
            .as_ref()
            .and_then(|wa| wa.last_customer_message_at)
    }

    fn template(&self) -> OutboundBody {
        OutboundBody::Template {
            template: TemplateBody {
                name: self.template_name.clone(),
                language: TemplateLanguage {
                    code: self.template_language.clone(),
                },
            },
        }
    }

    /// Message body for `text`, or the template when the window has closed.
    fn body_for(&self, session: &Session, text: &str, now: DateTime<Utc>) -> OutboundBody {
        if within_customer_window(Self::last_customer_message(session), now) {
            OutboundBody::Text {
                text: TextBody {
                    body: truncate_head(text, AdapterKind::WhatsApp.max_message_len().unwrap_or(4096)),
                    preview_url: false,
                },
            }
        } else {
            tracing::debug!(
                adapter = "whatsapp",
                session = %session.short_id(),
                "Outside customer window, sending template"
            );
            self.template()
        }
    }

    /// Handle a webhook notification from the Cloud API.
    ///
    /// # Errors
    ///
    /// Returns error if the adapter is not started or media download fails.
    pub async fn handle_webhook(&self, payload: WebhookPayload) -> Result<usize, AdapterError> {
        let ctx = self
            .state
            .read()
            .await
            .ctx
            .clone()
            .ok_or(AdapterError::NotConnected)?;

        let mut delivered = 0;
        for message in webhook::normalize(payload, Utc::now()) {
            let Some(event) = self.to_inbound(message, &ctx.download_dir).await? else {
                continue;
            };
            ctx.inbound
                .send(event)
                .await
                .map_err(|_| AdapterError::NotConnected)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn to_inbound(
        &self,
        message: CustomerMessage,
        download_dir: &Path,
    ) -> Result<Option<InboundEvent>, AdapterError> {
        let dir = download_dir.join("whatsapp").join(&message.phone_number);

        let payload = match message.kind {
            CustomerMessageKind::Text(text) => {
                match validate_message_content(&text, limits::MAX_MESSAGE_LENGTH) {
                    Ok(text) => InboundPayload::Text(text),
                    Err(e) => {
                        tracing::warn!(adapter = "whatsapp", error = %e, "Dropping message");
                        return Ok(None);
                    }
                }
            }
            CustomerMessageKind::Document {
                media_id,
                filename,
                caption,
            } => {
                let Ok(filename) = sanitize_filename(&filename) else {
                    return Ok(None);
                };
                let path = self.download(&media_id, dir.join(&filename)).await?;
                InboundPayload::File {
                    path,
                    filename,
                    caption,
                }
            }
            CustomerMessageKind::Voice { media_id } => {
                let path = self
                    .download(&media_id, dir.join(format!("voice_{media_id}.ogg")))
                    .await?;
                InboundPayload::Voice {
                    path,
                    duration_secs: None,
                }
            }
        };

        let mut seed = AdapterMetadata::default();
        let wa = seed.whatsapp_mut();
        wa.phone_number = Some(message.phone_number.clone());
        wa.last_customer_message_at = Some(message.received_at);
        wa.last_received_message_id = Some(message.message_id.clone());

        Ok(Some(InboundEvent {
            adapter: "whatsapp".to_string(),
            lookup_field: "phone_number",
            lookup_value: message.phone_number,
            seed,
            message_id: Some(message.message_id),
            actor: Some(message.actor),
            payload,
        }))
    }

    async fn download(&self, media_id: &str, dest: PathBuf) -> Result<PathBuf, AdapterError> {
        let bytes = self.api.download_media(media_id).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, bytes).await?;
        Ok(dest)
    }

    /// Webhook routes (`GET`/`POST /webhooks/whatsapp`), to be merged into
    /// the HTTP server.
    pub fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route(
                "/webhooks/whatsapp",
                get(verify_webhook).post(receive_webhook),
            )
            .with_state(self)
    }
}

#[derive(Debug, serde::Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_webhook(
    State(adapter): State<Arc<WhatsAppAdapter>>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    let expected = adapter.verify_token.as_deref().ok_or(StatusCode::FORBIDDEN)?;
    match (query.mode.as_deref(), query.verify_token.as_deref(), query.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected => Ok(challenge),
        _ => Err(StatusCode::FORBIDDEN),
    }
}

async fn receive_webhook(
    State(adapter): State<Arc<WhatsAppAdapter>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(secret) = adapter.app_secret.as_ref() else {
        return StatusCode::UNAUTHORIZED;
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !verify_signature(secret.expose(), &body, signature) {
        tracing::warn!(adapter = "whatsapp", "Rejected webhook with a bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(adapter = "whatsapp", error = %e, "Malformed webhook body");
            return StatusCode::BAD_REQUEST;
        }
    };

    match adapter.handle_webhook(payload).await {
        Ok(_) => StatusCode::OK,
        Err(AdapterError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
        Err(e) => {
            tracing::warn!(adapter = "whatsapp", error = %e, "Webhook handling failed");
            // Acknowledge anyway so the platform does not redeliver forever
            StatusCode::OK
        }
    }
}

#[async_trait]
impl Adapter for WhatsAppAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::WhatsApp
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            has_ui: true,
            supports_edit: false,
            supports_files: true,
            supports_channels: true,
            max_message_len: AdapterKind::WhatsApp.max_message_len(),
        }
    }

    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.state.write().await.ctx = Some(ctx);
        tracing::info!(adapter = "whatsapp", "WhatsApp webhook receiver ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.state.write().await.ctx = None;
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let to = Self::recipient(session)?;
        self.limiter.acquire(to).await;

        let message = OutboundMessage::new(to, self.body_for(session, text, Utc::now()));
        self.api.send(&message).await
    }

    async fn edit_message(
        &self,
        _session: &Session,
        _message_id: &str,
        _text: &str,
        _metadata: &MessageMetadata,
    ) -> bool {
        false
    }

    async fn delete_message(&self, _session: &Session, _message_id: &str) -> bool {
        false
    }

    async fn send_file(
        &self,
        session: &Session,
        path: &Path,
        caption: Option<&str>,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        ensure_file(path).await?;
        let to = Self::recipient(session)?;
        if !within_customer_window(Self::last_customer_message(session), Utc::now()) {
            return Err(AdapterError::Provider(
                "customer window closed, files need an open conversation".to_string(),
            ));
        }
        self.limiter.acquire(to).await;

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        let media_id = self
            .api
            .upload_media(bytes, filename.clone(), "application/octet-stream")
            .await?;

        let message = OutboundMessage::new(
            to,
            OutboundBody::Document {
                document: DocumentBody {
                    id: media_id,
                    filename,
                    caption: caption.map(|c| truncate_head(c, 1024)),
                },
            },
        );
        self.api.send(&message).await
    }

    async fn create_channel(
        &self,
        session: &mut Session,
        _title: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let wa = session.adapter_metadata.whatsapp_mut();
        let phone = wa.phone_number.clone().ok_or(AdapterError::NoDestination)?;
        wa.closed = false;
        Ok(phone)
    }

    async fn update_channel_title(&self, _session: &Session, _title: &str) -> bool {
        // Conversations have no title
        true
    }

    async fn close_channel(&self, session: &mut Session) -> bool {
        session.adapter_metadata.whatsapp_mut().closed = true;
        true
    }

    async fn reopen_channel(&self, session: &mut Session) -> bool {
        let wa = session.adapter_metadata.whatsapp_mut();
        wa.closed = false;
        wa.phone_number.is_some()
    }

    async fn delete_channel(&self, session: &mut Session) -> bool {
        self.clear_destination(session);
        true
    }

    async fn discover_peers(&self) -> Vec<PeerInfo> {
        Vec::new()
    }

    fn is_missing_destination_error(&self, error: &AdapterError) -> bool {
        // 131026: recipient is not a WhatsApp user
        error.mentions_any(&["(131026)"])
    }

    fn clear_destination(&self, session: &mut Session) {
        let wa = session.adapter_metadata.whatsapp_mut();
        wa.closed = true;
        wa.output_message_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn adapter() -> WhatsAppAdapter {
        let mut adapter = WhatsAppAdapter::new(ApiKey::new("test".to_string()), "1000");
        adapter.verify_token = Some("s3cret".to_string());
        adapter.app_secret = Some(ApiKey::new("app-secret".to_string()));
        adapter
    }

    fn session(phone: Option<&str>) -> Session {
        let mut session = test_session("whatsapp");
        session.adapter_metadata.whatsapp_mut().phone_number = phone.map(str::to_string);
        session
    }

    #[test]
    fn test_customer_window() {
        let now = Utc::now();
        assert!(within_customer_window(Some(now - TimeDelta::hours(23)), now));
        assert!(!within_customer_window(Some(now - TimeDelta::hours(24)), now));
        assert!(!within_customer_window(None, now));
    }

    #[test]
    fn test_template_outside_window() {
        let adapter = adapter();
        let now = Utc::now();
        let mut session = session(Some("15551234567"));

        assert!(matches!(
            adapter.body_for(&session, "hi", now),
            OutboundBody::Template { .. }
        ));

        session.adapter_metadata.whatsapp_mut().last_customer_message_at =
            Some(now - TimeDelta::minutes(5));
        assert!(matches!(
            adapter.body_for(&session, "hi", now),
            OutboundBody::Text { .. }
        ));
    }

    #[tokio::test]
    async fn test_edit_never_supported() {
        let adapter = adapter();
        assert!(
            !adapter
                .edit_message(&session(Some("1")), "wamid.1", "x", &MessageMetadata::default())
                .await
        );
        assert!(!adapter.capabilities().supports_edit);
    }

    #[tokio::test]
    async fn test_close_and_create_channel() {
        let adapter = adapter();
        let mut session = session(Some("15551234567"));

        assert!(adapter.close_channel(&mut session).await);
        assert!(session.adapter_metadata.whatsapp.as_ref().unwrap().closed);
        assert!(matches!(
            WhatsAppAdapter::recipient(&session),
            Err(AdapterError::NoDestination)
        ));

        let id = adapter
            .create_channel(&mut session, "ignored", &MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(id, "15551234567");
        assert!(!session.adapter_metadata.whatsapp.unwrap().closed);
    }

    #[tokio::test]
    async fn test_create_channel_without_phone() {
        let adapter = adapter();
        let mut session = session(None);
        let result = adapter
            .create_channel(&mut session, "t", &MessageMetadata::default())
            .await;
        assert!(matches!(result, Err(AdapterError::NoDestination)));
    }

    #[tokio::test]
    async fn test_webhook_text_becomes_event() {
        let adapter = adapter();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        adapter
            .start(AdapterContext {
                computer_name: "macbook".to_string(),
                download_dir: std::env::temp_dir(),
                inbound: tx,
            })
            .await
            .unwrap();

        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "entry": [{ "changes": [{ "value": {
                "messages": [{
                    "from": "15551234567", "id": "wamid.7", "timestamp": "1700000000",
                    "type": "text", "text": { "body": "deploy it" }
                }]
            }}]}]
        }))
        .unwrap();

        assert_eq!(adapter.handle_webhook(payload).await.unwrap(), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.lookup_field, "phone_number");
        assert_eq!(event.lookup_value, "15551234567");
        assert_eq!(event.payload, InboundPayload::Text("deploy it".to_string()));
        let wa = event.seed.whatsapp.unwrap();
        assert_eq!(wa.last_received_message_id.as_deref(), Some("wamid.7"));
        assert_eq!(wa.last_customer_message_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_webhook_verification() {
        let app = Arc::new(adapter()).routes();

        let ok = app
            .clone()
            .oneshot(
                Request::get(
                    "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=s3cret&hub.challenge=42",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = app
            .oneshot(
                Request::get(
                    "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=42",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    fn delivery(body: &str, signature: Option<String>) -> Request<Body> {
        let mut request = Request::post("/webhooks/whatsapp").header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_requires_valid_signature() {
        let adapter = Arc::new(adapter());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        adapter
            .start(AdapterContext {
                computer_name: "macbook".to_string(),
                download_dir: std::env::temp_dir(),
                inbound: tx,
            })
            .await
            .unwrap();
        let app = adapter.clone().routes();

        let body = serde_json::json!({
            "entry": [{ "changes": [{ "value": {
                "messages": [{
                    "from": "15551234567", "id": "wamid.9", "timestamp": "1700000000",
                    "type": "text", "text": { "body": "rm -rf /" }
                }]
            }}]}]
        })
        .to_string();

        let unsigned = app.clone().oneshot(delivery(&body, None)).await.unwrap();
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let forged = app
            .clone()
            .oneshot(delivery(&body, Some(webhook::sign("guessed", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());

        let signed = app
            .oneshot(delivery(&body, Some(webhook::sign("app-secret", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(signed.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap().lookup_value, "15551234567");
    }

    #[tokio::test]
    async fn test_webhook_rejected_without_app_secret() {
        let mut adapter = adapter();
        adapter.app_secret = None;
        let app = Arc::new(adapter).routes();

        let body = r#"{"entry":[]}"#;
        let response = app
            .oneshot(delivery(body, Some(webhook::sign("app-secret", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
