//! Bot API client and wire types.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use teleclaude_core::secrets::ApiKey;

use crate::traits::AdapterError;

pub(crate) const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Thin Bot API client. Cheap to clone into the polling task.
#[derive(Clone)]
pub(crate) struct BotApi {
    client: Client,
    token: ApiKey,
    base: String,
}

impl BotApi {
    pub(crate) fn new(token: ApiKey) -> Self {
        Self {
            client: crate::http::client(),
            token,
            base: TELEGRAM_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token.expose(), method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base, self.token.expose(), file_path)
    }

    /// Call a Bot API method with a JSON body.
    pub(crate) async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<T, AdapterError> {
        let request = self.client.post(self.api_url(method)).json(params);
        self.execute(request).await
    }

    /// Long-poll a Bot API method. The request may stay open for
    /// `hold_secs` on top of the usual request timeout.
    pub(crate) async fn long_poll<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &impl Serialize,
        hold_secs: u64,
    ) -> Result<T, AdapterError> {
        let request = self
            .client
            .post(self.api_url(method))
            .timeout(crate::http::REQUEST_TIMEOUT + Duration::from_secs(hold_secs))
            .json(params);
        self.execute(request).await
    }

    /// Call a Bot API method with a multipart body.
    pub(crate) async fn call_multipart<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, AdapterError> {
        let request = self.client.post(self.api_url(method)).multipart(form);
        self.execute(request).await
    }

    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, AdapterError> {
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Network(self.token.redact(&e.to_string())))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AdapterError::RateLimited);
        }

        // Errors come back as `{ok: false, description}` with a 4xx status
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::Network(self.token.redact(&e.to_string())))?;
        let result: TelegramResponse<T> = serde_json::from_str(&text)
            .map_err(|_| AdapterError::Network(format!("{status}: {}", self.token.redact(&text))))?;

        if result.ok {
            result
                .result
                .ok_or_else(|| AdapterError::Provider("Empty response".to_string()))
        } else {
            Err(AdapterError::Provider(
                result
                    .description
                    .unwrap_or_else(|| format!("Unknown error ({status})")),
            ))
        }
    }

    /// Download a file by ID to `dest`.
    pub(crate) async fn download(&self, file_id: &str, dest: &Path) -> Result<(), AdapterError> {
        let file: TelegramFile = self
            .call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| AdapterError::Provider("File has no download path".to_string()))?;

        let bytes = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AdapterError::Network(self.token.redact(&e.to_string())))?
            .bytes()
            .await
            .map_err(|e| AdapterError::Network(self.token.redact(&e.to_string())))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

// Telegram API types

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Telegram user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    /// User ID.
    pub id: i64,
    /// Whether user is a bot.
    #[serde(default)]
    pub is_bot: bool,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: Option<String>,
    /// Username.
    pub username: Option<String>,
}

impl TelegramUser {
    /// Full display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

/// Update from `getUpdates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    /// Update ID.
    pub update_id: i64,
    /// New message.
    pub message: Option<TelegramMessage>,
    /// Inline button press.
    pub callback_query: Option<CallbackQuery>,
}

/// Telegram message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    /// Message ID.
    pub message_id: i64,
    /// Unix timestamp.
    pub date: i64,
    /// Chat.
    pub chat: TelegramChat,
    /// Sender.
    pub from: Option<TelegramUser>,
    /// Text.
    pub text: Option<String>,
    /// Media caption.
    pub caption: Option<String>,
    /// Forum topic.
    pub message_thread_id: Option<i64>,
    /// Document.
    pub document: Option<TelegramDocument>,
    /// Voice note.
    pub voice: Option<TelegramVoice>,
}

/// Telegram chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    /// Chat ID.
    pub id: i64,
    /// Chat type.
    #[serde(rename = "type")]
    pub chat_type: String,
    /// Title.
    pub title: Option<String>,
}

/// Document attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramDocument {
    /// File ID.
    pub file_id: String,
    /// Original name.
    pub file_name: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub file_size: Option<u64>,
}

/// Voice note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramVoice {
    /// File ID.
    pub file_id: String,
    /// Duration in seconds.
    pub duration: u32,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// Inline keyboard button press.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    /// Query ID.
    pub id: String,
    /// Who pressed it.
    pub from: TelegramUser,
    /// Message carrying the button.
    pub message: Option<TelegramMessage>,
    /// Button payload.
    pub data: Option<String>,
}

/// Result of `getFile`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TelegramFile {
    pub file_path: Option<String>,
}

/// Result of `createForumTopic`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ForumTopic {
    pub message_thread_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageParams {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EditMessageParams {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Callback payload of the download button.
pub(crate) const DOWNLOAD_CALLBACK: &str = "download_full";

impl InlineKeyboardMarkup {
    pub(crate) fn download_button() -> Self {
        Self {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: "📎 Download full output".to_string(),
                callback_data: DOWNLOAD_CALLBACK.to_string(),
            }]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_params_skip_defaults() {
        let params = SendMessageParams {
            chat_id: -100,
            text: "hi".to_string(),
            message_thread_id: Some(7),
            parse_mode: None,
            disable_notification: false,
            reply_markup: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["message_thread_id"], 7);
        assert!(json.get("disable_notification").is_none());
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn test_download_button() {
        let markup = serde_json::to_value(InlineKeyboardMarkup::download_button()).unwrap();
        assert_eq!(
            markup["inline_keyboard"][0][0]["callback_data"],
            DOWNLOAD_CALLBACK
        );
    }

    #[test]
    fn test_parse_update() {
        let raw = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "date": 1_700_000_000,
                "chat": { "id": -100, "type": "supergroup", "title": "Sessions" },
                "from": { "id": 1, "is_bot": false, "first_name": "Ada", "last_name": "L" },
                "text": "ls -la",
                "message_thread_id": 42
            }
        });
        let update: TelegramUpdate = serde_json::from_value(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.message_thread_id, Some(42));
        assert_eq!(message.from.unwrap().display_name(), "Ada L");
    }
}
