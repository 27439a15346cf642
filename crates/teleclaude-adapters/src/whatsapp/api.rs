//! WhatsApp Cloud API client and wire types.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use teleclaude_core::secrets::ApiKey;

use crate::traits::AdapterError;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

#[derive(Clone)]
pub(crate) struct CloudApi {
    client: Client,
    token: ApiKey,
    phone_number_id: String,
}

impl CloudApi {
    pub(crate) fn new(token: ApiKey, phone_number_id: String) -> Self {
        Self {
            client: crate::http::client(),
            token,
            phone_number_id,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.token.expose())
    }

    /// Send a message object and return the provider message ID.
    pub(crate) async fn send(&self, message: &OutboundMessage) -> Result<String, AdapterError> {
        let url = format!("{GRAPH_API_BASE}/{}/messages", self.phone_number_id);
        let response: SendResponse = self
            .execute(self.authorized(self.client.post(url)).json(message))
            .await?;

        response
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| AdapterError::Provider("no message ID in response".to_string()))
    }

    /// Upload media and return its media ID.
    pub(crate) async fn upload_media(
        &self,
        bytes: Vec<u8>,
        filename: String,
        mime: &str,
    ) -> Result<String, AdapterError> {
        let url = format!("{GRAPH_API_BASE}/{}/media", self.phone_number_id);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| AdapterError::Provider(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let media: MediaRef = self
            .execute(self.authorized(self.client.post(url)).multipart(form))
            .await?;
        Ok(media.id)
    }

    /// Download inbound media by ID.
    pub(crate) async fn download_media(&self, media_id: &str) -> Result<Vec<u8>, AdapterError> {
        let info: MediaUrl = self
            .execute(self.authorized(self.client.get(format!("{GRAPH_API_BASE}/{media_id}"))))
            .await?;

        let response = self
            .authorized(self.client.get(&info.url))
            .send()
            .await
            .map_err(|e| AdapterError::Network(self.token.redact(&e.to_string())))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
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
        if !status.is_success() {
            let body: GraphErrorBody = response.json().await.unwrap_or_default();
            return Err(AdapterError::Provider(format!(
                "{status}: ({}) {}",
                body.error.code, body.error.message
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }
}

/// Outbound message object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutboundMessage {
    pub messaging_product: &'static str,
    pub to: String,
    #[serde(flatten)]
    pub body: OutboundBody,
}

impl OutboundMessage {
    pub(crate) fn new(to: impl Into<String>, body: OutboundBody) -> Self {
        Self {
            messaging_product: "whatsapp",
            to: to.into(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum OutboundBody {
    Text {
        text: TextBody,
    },
    Template {
        template: TemplateBody,
    },
    Document {
        document: DocumentBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TextBody {
    pub body: String,
    pub preview_url: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TemplateBody {
    pub name: String,
    pub language: TemplateLanguage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TemplateLanguage {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DocumentBody {
    pub id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaUrl {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    error: GraphError,
}

#[derive(Debug, Default, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

// Webhook payload types

/// Webhook notification envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    /// Entries.
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// Webhook entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEntry {
    /// Changes.
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

/// Webhook change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookChange {
    /// Value.
    #[serde(default)]
    pub value: WebhookValue,
}

/// Webhook change value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookValue {
    /// Sender profiles.
    #[serde(default)]
    pub contacts: Vec<Contact>,
    /// Inbound messages.
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

/// Sender profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    /// WhatsApp ID (phone number).
    pub wa_id: String,
    /// Profile.
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Sender profile name.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// Display name.
    pub name: String,
}

/// Inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Sender phone number.
    pub from: String,
    /// Message ID (`wamid.…`).
    pub id: String,
    /// Unix timestamp as a string.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text body.
    #[serde(default)]
    pub text: Option<InboundText>,
    /// Document.
    #[serde(default)]
    pub document: Option<InboundMedia>,
    /// Audio or voice note.
    #[serde(default)]
    pub audio: Option<InboundMedia>,
}

/// Inbound text body.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundText {
    /// Text.
    pub body: String,
}

/// Inbound media reference.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMedia {
    /// Media ID.
    pub id: String,
    /// File name (documents only).
    #[serde(default)]
    pub filename: Option<String>,
    /// Caption.
    #[serde(default)]
    pub caption: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_shape() {
        let message = OutboundMessage::new(
            "15551234567",
            OutboundBody::Text {
                text: TextBody {
                    body: "hello".to_string(),
                    preview_url: false,
                },
            },
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["messaging_product"], "whatsapp");
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"]["body"], "hello");
    }

    #[test]
    fn test_template_message_shape() {
        let message = OutboundMessage::new(
            "15551234567",
            OutboundBody::Template {
                template: TemplateBody {
                    name: "session_update".to_string(),
                    language: TemplateLanguage {
                        code: "en_US".to_string(),
                    },
                },
            },
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "template");
        assert_eq!(json["template"]["language"]["code"], "en_US");
    }
}
