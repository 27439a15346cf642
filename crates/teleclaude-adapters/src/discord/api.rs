//! Discord REST client and wire types.

use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};

use teleclaude_core::secrets::ApiKey;

use crate::traits::AdapterError;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// `SUPPRESS_NOTIFICATIONS` message flag.
pub(crate) const FLAG_SUPPRESS_NOTIFICATIONS: u64 = 1 << 12;

/// `IS_VOICE_MESSAGE` message flag.
pub(crate) const FLAG_VOICE_MESSAGE: u64 = 1 << 13;

#[derive(Clone)]
pub(crate) struct DiscordApi {
    client: Client,
    token: ApiKey,
}

impl DiscordApi {
    pub(crate) fn new(token: ApiKey) -> Self {
        Self {
            client: crate::http::client(),
            token,
        }
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{DISCORD_API_BASE}{endpoint}"))
            .header("Authorization", format!("Bot {}", self.token.expose()))
    }

    /// Call an endpoint and decode the JSON response.
    pub(crate) async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, AdapterError> {
        let mut request = self.request(method, endpoint);
        if let Some(b) = body {
            request = request.json(b);
        }
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    /// Call an endpoint, ignoring the response body.
    pub(crate) async fn call_no_response(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&impl Serialize>,
    ) -> Result<(), AdapterError> {
        let mut request = self.request(method, endpoint);
        if let Some(b) = body {
            request = request.json(b);
        }
        self.send(request).await?;
        Ok(())
    }

    /// Post a multipart message.
    pub(crate) async fn call_multipart<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, AdapterError> {
        let request = self.request(Method::POST, endpoint).multipart(form);
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    /// Execute a webhook. Webhook URLs carry their own token, no bot auth.
    pub(crate) async fn execute_webhook(
        &self,
        webhook: &Webhook,
        thread_id: &str,
        body: &WebhookMessage,
    ) -> Result<DiscordMessage, AdapterError> {
        let url = format!(
            "{DISCORD_API_BASE}/webhooks/{}/{}?wait=true&thread_id={thread_id}",
            webhook.id, webhook.token
        );
        let response = self.send(self.client.post(url).json(body)).await?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    /// Download an attachment.
    pub(crate) async fn download(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        let response = self.send(self.client.get(url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, AdapterError> {
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            if status.as_u16() == 429 {
                return Err(AdapterError::RateLimited);
            }
            // Body is `{"message": "Unknown Channel", "code": 10003}`
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Provider(format!("{status}: {text}")));
        }

        Ok(response)
    }
}

// Discord API types

/// Discord user object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordUser {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar hash.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether the user is a bot.
    #[serde(default)]
    pub bot: bool,
}

impl DiscordUser {
    /// CDN avatar URL.
    #[must_use]
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{hash}.png", self.id))
    }
}

/// Discord message object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordMessage {
    /// Message ID.
    pub id: String,
    /// Channel (or thread) ID.
    pub channel_id: String,
    /// Guild ID.
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Author.
    #[serde(default)]
    pub author: Option<DiscordUser>,
    /// Content.
    #[serde(default)]
    pub content: Option<String>,
    /// Set when posted through a webhook.
    #[serde(default)]
    pub webhook_id: Option<String>,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
    /// Message flags.
    #[serde(default)]
    pub flags: u64,
}

/// Discord attachment object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordAttachment {
    /// Attachment ID.
    pub id: String,
    /// File name.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Source URL.
    pub url: String,
    /// MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Voice message duration.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Channel or thread object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordChannel {
    /// Channel ID.
    pub id: String,
    /// Parent (forum) ID.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Guild ID.
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Name.
    #[serde(default)]
    pub name: Option<String>,
    /// Starter message of a forum post.
    #[serde(default)]
    pub message: Option<DiscordMessage>,
}

/// Name of the webhooks this adapter creates.
pub(crate) const WEBHOOK_NAME: &str = "TeleClaude";

/// Channel webhook with its execution token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Webhook {
    pub id: String,
    pub token: String,
}

/// Webhook as listed on a channel. Webhooks owned by other applications
/// come without a token.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListedWebhook {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Pick a listed webhook this bot can execute, preferring its own.
pub(crate) fn usable_webhook(listed: Vec<ListedWebhook>) -> Option<Webhook> {
    let mut usable: Vec<_> = listed
        .into_iter()
        .filter_map(|hook| {
            let token = hook.token?;
            let ours = hook.name.as_deref() == Some(WEBHOOK_NAME);
            Some((ours, Webhook { id: hook.id, token }))
        })
        .collect();
    usable.sort_by_key(|(ours, _)| !*ours);
    usable.into_iter().next().map(|(_, hook)| hook)
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateMessageParams {
    pub content: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub flags: u64,
    pub allowed_mentions: AllowedMentions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookMessage {
    pub content: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct AllowedMentions {
    pub parse: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartThreadParams {
    pub name: String,
    pub message: StarterMessage,
}

#[derive(Debug, Serialize)]
pub(crate) struct StarterMessage {
    pub content: String,
}

/// Gateway dispatch payload (`op 0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Event name (`MESSAGE_CREATE`, `THREAD_DELETE`, ...).
    pub t: Option<String>,
    /// Event data.
    pub d: Option<serde_json::Value>,
}

/// Custom ID of the download button.
pub(crate) const DOWNLOAD_CUSTOM_ID: &str = "download_full";

pub(crate) fn download_components() -> Vec<serde_json::Value> {
    vec![serde_json::json!({
        "type": 1,
        "components": [{
            "type": 2,
            "style": 2,
            "label": "Download full output",
            "custom_id": DOWNLOAD_CUSTOM_ID,
        }]
    })]
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &u64) -> bool {
    *v == 0
}
