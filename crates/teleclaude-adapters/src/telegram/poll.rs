//! Long-poll update loop.

use std::path::PathBuf;
use std::time::Duration;

use teleclaude_core::types::AdapterMetadata;
use teleclaude_core::validation::{limits, sanitize_filename, validate_message_content};

use super::api::{BotApi, DOWNLOAD_CALLBACK, TelegramMessage, TelegramUpdate};
use crate::traits::{Actor, AdapterContext, AdapterError, InboundEvent, InboundPayload};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// What an update asks for, before any file is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UpdateKind {
    Text(String),
    Document {
        file_id: String,
        filename: String,
        caption: Option<String>,
    },
    Voice {
        file_id: String,
        duration: u32,
    },
    Download {
        callback_id: String,
    },
}

/// A supergroup update that belongs to a session topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TopicUpdate {
    pub topic_id: i64,
    pub message_id: Option<i64>,
    pub actor: Option<Actor>,
    pub kind: UpdateKind,
}

/// Reduce a raw update to a topic update. Other chats, the General topic,
/// and bot messages are dropped.
pub(crate) fn normalize_update(update: TelegramUpdate, supergroup_id: i64) -> Option<TopicUpdate> {
    if let Some(query) = update.callback_query {
        let message = query.message?;
        if message.chat.id != supergroup_id || query.data.as_deref() != Some(DOWNLOAD_CALLBACK) {
            return None;
        }
        return Some(TopicUpdate {
            topic_id: message.message_thread_id?,
            message_id: None,
            actor: Some(actor_of(&query.from)),
            kind: UpdateKind::Download {
                callback_id: query.id,
            },
        });
    }

    let message = update.message?;
    if message.chat.id != supergroup_id {
        return None;
    }
    let topic_id = message.message_thread_id?;
    let from = message.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    let actor = Some(actor_of(from));
    let kind = message_kind(message.clone())?;

    Some(TopicUpdate {
        topic_id,
        message_id: Some(message.message_id),
        actor,
        kind,
    })
}

fn message_kind(message: TelegramMessage) -> Option<UpdateKind> {
    if let Some(voice) = message.voice {
        return Some(UpdateKind::Voice {
            file_id: voice.file_id,
            duration: voice.duration,
        });
    }
    if let Some(doc) = message.document {
        return Some(UpdateKind::Document {
            filename: doc.file_name.unwrap_or_else(|| format!("{}.bin", doc.file_id)),
            file_id: doc.file_id,
            caption: message.caption,
        });
    }
    message.text.map(UpdateKind::Text)
}

fn actor_of(user: &super::api::TelegramUser) -> Actor {
    Actor {
        id: Some(user.id.to_string()),
        name: user.display_name(),
        avatar_url: None,
    }
}

/// Turn a topic update into an inbound event, downloading media first.
async fn into_event(
    api: &BotApi,
    update: TopicUpdate,
    download_dir: &std::path::Path,
) -> Result<Option<InboundEvent>, AdapterError> {
    let payload = match update.kind {
        UpdateKind::Text(text) => match validate_message_content(&text, limits::MAX_MESSAGE_LENGTH) {
            Ok(clean) if !clean.trim().is_empty() => InboundPayload::Text(clean),
            Ok(_) => return Ok(None),
            Err(e) => {
                tracing::warn!(topic = update.topic_id, error = %e, "Dropping invalid message");
                return Ok(None);
            }
        },
        UpdateKind::Document {
            file_id,
            filename,
            caption,
        } => {
            let Ok(filename) = sanitize_filename(&filename) else {
                tracing::warn!(topic = update.topic_id, "Dropping document with invalid name");
                return Ok(None);
            };
            let path = topic_dir(download_dir, update.topic_id).join(&filename);
            api.download(&file_id, &path).await?;
            InboundPayload::File {
                path,
                filename,
                caption,
            }
        }
        UpdateKind::Voice { file_id, duration } => {
            let path = topic_dir(download_dir, update.topic_id).join(format!("voice_{file_id}.ogg"));
            api.download(&file_id, &path).await?;
            InboundPayload::Voice {
                path,
                duration_secs: Some(duration),
            }
        }
        UpdateKind::Download { callback_id } => {
            let answered: Result<bool, _> = api
                .call(
                    "answerCallbackQuery",
                    &serde_json::json!({ "callback_query_id": callback_id }),
                )
                .await;
            if let Err(e) = answered {
                tracing::debug!(error = %e, "Failed to answer download callback");
            }
            InboundPayload::DownloadRequested
        }
    };

    let mut seed = AdapterMetadata::default();
    seed.telegram_mut().topic_id = Some(update.topic_id);

    Ok(Some(InboundEvent {
        adapter: "telegram".to_string(),
        lookup_field: "topic_id",
        lookup_value: update.topic_id.to_string(),
        seed,
        message_id: update.message_id.map(|id| id.to_string()),
        actor: update.actor,
        payload,
    }))
}

fn topic_dir(download_dir: &std::path::Path, topic_id: i64) -> PathBuf {
    download_dir.join("telegram").join(topic_id.to_string())
}

/// Poll `getUpdates` until the inbound receiver goes away.
pub(crate) async fn run(api: BotApi, supergroup_id: i64, timeout_secs: u64, ctx: AdapterContext) {
    let mut offset: Option<i64> = None;

    loop {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });

        let updates: Vec<TelegramUpdate> = match api.long_poll("getUpdates", &params, timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "Telegram getUpdates failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);

            let Some(topic_update) = normalize_update(update, supergroup_id) else {
                continue;
            };

            let event = match into_event(&api, topic_update, &ctx.download_dir).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to process Telegram update");
                    continue;
                }
            };

            if ctx.inbound.send(event).await.is_err() {
                tracing::debug!("Inbound receiver closed, stopping Telegram polling");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(value: serde_json::Value) -> TelegramUpdate {
        serde_json::from_value(value).unwrap()
    }

    fn message(extra: serde_json::Value) -> serde_json::Value {
        let mut base = serde_json::json!({
            "message_id": 9,
            "date": 1_700_000_000,
            "chat": { "id": -100, "type": "supergroup" },
            "from": { "id": 1, "is_bot": false, "first_name": "Ada" },
            "message_thread_id": 42
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::json!({ "update_id": 1, "message": base })
    }

    #[test]
    fn test_text_in_topic() {
        let result = normalize_update(update(message(serde_json::json!({ "text": "hi" }))), -100)
            .unwrap();
        assert_eq!(result.topic_id, 42);
        assert_eq!(result.message_id, Some(9));
        assert_eq!(result.kind, UpdateKind::Text("hi".to_string()));
        assert_eq!(result.actor.unwrap().name, "Ada");
    }

    #[test]
    fn test_other_chat_and_general_topic_ignored() {
        let other = message(serde_json::json!({ "text": "hi", "chat": { "id": 5, "type": "private" } }));
        assert!(normalize_update(update(other), -100).is_none());

        let general = message(serde_json::json!({ "text": "hi", "message_thread_id": null }));
        assert!(normalize_update(update(general), -100).is_none());
    }

    #[test]
    fn test_bot_messages_ignored() {
        let from_bot = message(serde_json::json!({
            "text": "echo",
            "from": { "id": 2, "is_bot": true, "first_name": "TeleClaude" }
        }));
        assert!(normalize_update(update(from_bot), -100).is_none());
    }

    #[test]
    fn test_voice_and_document() {
        let voice = message(serde_json::json!({ "voice": { "file_id": "v1", "duration": 4 } }));
        assert_eq!(
            normalize_update(update(voice), -100).unwrap().kind,
            UpdateKind::Voice {
                file_id: "v1".to_string(),
                duration: 4
            }
        );

        let doc = message(serde_json::json!({
            "document": { "file_id": "d1", "file_name": "log.txt" },
            "caption": "see this"
        }));
        assert_eq!(
            normalize_update(update(doc), -100).unwrap().kind,
            UpdateKind::Document {
                file_id: "d1".to_string(),
                filename: "log.txt".to_string(),
                caption: Some("see this".to_string())
            }
        );
    }

    #[test]
    fn test_download_button() {
        let raw = serde_json::json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 1, "first_name": "Ada" },
                "data": "download_full",
                "message": {
                    "message_id": 20,
                    "date": 1_700_000_000,
                    "chat": { "id": -100, "type": "supergroup" },
                    "message_thread_id": 42
                }
            }
        });
        let result = normalize_update(update(raw), -100).unwrap();
        assert_eq!(
            result.kind,
            UpdateKind::Download {
                callback_id: "cb1".to_string()
            }
        );
    }
}
