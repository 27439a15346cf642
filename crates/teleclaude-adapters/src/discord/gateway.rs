//! Gateway event normalization.

use super::api::{DiscordMessage, FLAG_VOICE_MESSAGE, GatewayEvent};
use crate::traits::Actor;

/// What a gateway event means for a session thread.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ThreadEvent {
    Text {
        thread_id: String,
        message_id: String,
        actor: Actor,
        text: String,
    },
    Attachment {
        thread_id: String,
        message_id: String,
        actor: Actor,
        url: String,
        filename: String,
        caption: Option<String>,
        voice_duration: Option<f64>,
    },
    Deleted {
        thread_id: String,
    },
}

/// Reduce a gateway dispatch to a thread event.
///
/// Bot and webhook messages are dropped so mirrored output never loops back
/// in as user input.
pub(crate) fn normalize(event: GatewayEvent) -> Option<ThreadEvent> {
    let data = event.d?;

    match event.t.as_deref()? {
        "MESSAGE_CREATE" => {
            let message: DiscordMessage = serde_json::from_value(data).ok()?;
            message_event(message)
        }
        "THREAD_DELETE" => Some(ThreadEvent::Deleted {
            thread_id: data.get("id")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

fn message_event(message: DiscordMessage) -> Option<ThreadEvent> {
    if message.webhook_id.is_some() {
        return None;
    }
    let author = message.author?;
    if author.bot {
        return None;
    }

    let actor = Actor {
        id: Some(author.id.clone()),
        name: author
            .global_name
            .clone()
            .unwrap_or_else(|| author.username.clone()),
        avatar_url: author.avatar_url(),
    };
    let content = message.content.filter(|c| !c.trim().is_empty());

    if let Some(attachment) = message.attachments.into_iter().next() {
        let voice_duration = if message.flags & FLAG_VOICE_MESSAGE != 0 {
            Some(attachment.duration_secs.unwrap_or_default())
        } else {
            None
        };
        return Some(ThreadEvent::Attachment {
            thread_id: message.channel_id,
            message_id: message.id,
            actor,
            url: attachment.url,
            filename: attachment.filename,
            caption: content,
            voice_duration,
        });
    }

    Some(ThreadEvent::Text {
        thread_id: message.channel_id,
        message_id: message.id,
        actor,
        text: content?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(t: &str, d: serde_json::Value) -> GatewayEvent {
        GatewayEvent {
            t: Some(t.to_string()),
            d: Some(d),
        }
    }

    fn author(bot: bool) -> serde_json::Value {
        serde_json::json!({ "id": "7", "username": "ada", "global_name": "Ada", "bot": bot })
    }

    #[test]
    fn test_message_create() {
        let result = normalize(event(
            "MESSAGE_CREATE",
            serde_json::json!({
                "id": "900",
                "channel_id": "555",
                "author": author(false),
                "content": "run the tests"
            }),
        ));

        assert_eq!(
            result,
            Some(ThreadEvent::Text {
                thread_id: "555".to_string(),
                message_id: "900".to_string(),
                actor: Actor {
                    id: Some("7".to_string()),
                    name: "Ada".to_string(),
                    avatar_url: None,
                },
                text: "run the tests".to_string(),
            })
        );
    }

    #[test]
    fn test_bot_and_webhook_messages_dropped() {
        let from_bot = serde_json::json!({
            "id": "1", "channel_id": "555", "author": author(true), "content": "output"
        });
        assert!(normalize(event("MESSAGE_CREATE", from_bot)).is_none());

        let via_webhook = serde_json::json!({
            "id": "2", "channel_id": "555", "author": author(false),
            "content": "mirrored", "webhook_id": "99"
        });
        assert!(normalize(event("MESSAGE_CREATE", via_webhook)).is_none());
    }

    #[test]
    fn test_voice_message() {
        let voice = serde_json::json!({
            "id": "3",
            "channel_id": "555",
            "author": author(false),
            "content": "",
            "flags": 8192,
            "attachments": [{
                "id": "a1", "filename": "voice-message.ogg", "size": 1000,
                "url": "https://cdn.example/voice.ogg", "content_type": "audio/ogg",
                "duration_secs": 3.5
            }]
        });

        match normalize(event("MESSAGE_CREATE", voice)) {
            Some(ThreadEvent::Attachment {
                voice_duration,
                caption,
                ..
            }) => {
                assert_eq!(voice_duration, Some(3.5));
                assert!(caption.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_thread_delete() {
        let result = normalize(event(
            "THREAD_DELETE",
            serde_json::json!({ "id": "555", "parent_id": "42", "type": 11 }),
        ));
        assert_eq!(
            result,
            Some(ThreadEvent::Deleted {
                thread_id: "555".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert!(normalize(event("TYPING_START", serde_json::json!({}))).is_none());
    }
}
