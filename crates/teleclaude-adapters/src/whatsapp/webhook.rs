//! Webhook payload normalization and signature checks.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::api::{InboundMessage, WebhookPayload};
use crate::traits::Actor;

/// Header carrying the HMAC-SHA256 of the raw request body.
pub(crate) const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check a `sha256=<hex>` signature of `body` under the app secret.
pub(crate) fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(digest) = signature.and_then(|s| s.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature header value for `body`, as the platform would send it.
#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// A customer message reduced to what the adapter acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CustomerMessage {
    pub phone_number: String,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
    pub actor: Actor,
    pub kind: CustomerMessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CustomerMessageKind {
    Text(String),
    Document {
        media_id: String,
        filename: String,
        caption: Option<String>,
    },
    Voice {
        media_id: String,
    },
}

/// Flatten a webhook notification into customer messages.
///
/// Status callbacks (sent/delivered/read) carry no messages and yield
/// nothing. Unsupported message types are skipped.
pub(crate) fn normalize(payload: WebhookPayload, now: DateTime<Utc>) -> Vec<CustomerMessage> {
    let mut out = Vec::new();

    for value in payload
        .entry
        .into_iter()
        .flat_map(|e| e.changes)
        .map(|c| c.value)
    {
        let contacts = value.contacts;
        for message in value.messages {
            let name = contacts
                .iter()
                .find(|c| c.wa_id == message.from)
                .and_then(|c| c.profile.as_ref())
                .map_or_else(|| message.from.clone(), |p| p.name.clone());

            if let Some(normalized) = customer_message(message, name, now) {
                out.push(normalized);
            }
        }
    }

    out
}

fn customer_message(
    message: InboundMessage,
    name: String,
    now: DateTime<Utc>,
) -> Option<CustomerMessage> {
    let kind = match message.kind.as_str() {
        "text" => CustomerMessageKind::Text(message.text?.body),
        "document" => {
            let doc = message.document?;
            CustomerMessageKind::Document {
                filename: doc.filename.unwrap_or_else(|| format!("{}.bin", doc.id)),
                media_id: doc.id,
                caption: doc.caption,
            }
        }
        "audio" => CustomerMessageKind::Voice {
            media_id: message.audio?.id,
        },
        other => {
            tracing::debug!(adapter = "whatsapp", kind = other, "Ignoring message type");
            return None;
        }
    };

    let received_at = message
        .timestamp
        .as_deref()
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(now);

    Some(CustomerMessage {
        actor: Actor {
            id: Some(message.from.clone()),
            name,
            avatar_url: None,
        },
        phone_number: message.from,
        message_id: message.id,
        received_at,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signature_check() {
        let body = br#"{"object":"whatsapp_business_account","entry":[]}"#;
        let signature = sign("app-secret", body);

        assert!(verify_signature("app-secret", body, Some(&signature)));
        assert!(!verify_signature("other-secret", body, Some(&signature)));
        assert!(!verify_signature("app-secret", b"{}", Some(&signature)));
        assert!(!verify_signature("app-secret", body, None));
        assert!(!verify_signature("app-secret", body, Some("sha256=zz")));
        assert!(!verify_signature("app-secret", body, Some(signature.trim_start_matches("sha256="))));
    }

    fn payload(messages: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{ "wa_id": "15551234567", "profile": { "name": "Ada" } }],
                        "messages": messages
                    }
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_text_message() {
        let now = Utc::now();
        let messages = normalize(
            payload(serde_json::json!([{
                "from": "15551234567",
                "id": "wamid.1",
                "timestamp": "1700000000",
                "type": "text",
                "text": { "body": "status?" }
            }])),
            now,
        );

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.phone_number, "15551234567");
        assert_eq!(message.actor.name, "Ada");
        assert_eq!(message.received_at.timestamp(), 1_700_000_000);
        assert_eq!(message.kind, CustomerMessageKind::Text("status?".to_string()));
    }

    #[test]
    fn test_document_and_unsupported() {
        let messages = normalize(
            payload(serde_json::json!([
                {
                    "from": "15551234567",
                    "id": "wamid.2",
                    "type": "document",
                    "document": { "id": "m1", "filename": "log.txt", "mime_type": "text/plain" }
                },
                { "from": "15551234567", "id": "wamid.3", "type": "sticker" }
            ])),
            Utc::now(),
        );

        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].kind,
            CustomerMessageKind::Document {
                media_id: "m1".to_string(),
                filename: "log.txt".to_string(),
                caption: None,
            }
        );
    }

    #[test]
    fn test_status_callback_yields_nothing() {
        let status: WebhookPayload = serde_json::from_value(serde_json::json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "wamid.9", "status": "read" }] } }] }]
        }))
        .unwrap();
        assert!(normalize(status, Utc::now()).is_empty());
    }
}
