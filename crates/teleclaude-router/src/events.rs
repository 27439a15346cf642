//! Agent event handlers.
//!
//! Hooks running next to the agent report lifecycle events as a name plus a
//! JSON payload. Each name maps to one handler in a fixed table.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use teleclaude_adapters::OutputStatus;
use teleclaude_core::SessionUpdate;

use crate::client::AdapterClient;
use crate::error::RouterError;

/// Handler for one event name.
pub(crate) type EventHandler = for<'a> fn(
    &'a AdapterClient,
    &'a str,
    &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>>;

pub(crate) fn handler_table() -> HashMap<&'static str, EventHandler> {
    HashMap::from([
        ("session_start", on_session_start as EventHandler),
        ("stop", on_stop as EventHandler),
        ("agent_output", on_agent_output as EventHandler),
        ("thinking_mode", on_thinking_mode as EventHandler),
        ("notification", on_notification as EventHandler),
    ])
}

#[derive(Debug, Deserialize)]
struct SessionStart {
    native_session_id: Option<String>,
    #[serde(alias = "agent")]
    active_agent: Option<String>,
    transcript_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Stop {
    #[serde(default)]
    output: String,
    #[serde(default)]
    exit_code: i32,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AgentOutput {
    output: String,
    started_at: Option<DateTime<Utc>>,
    last_changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ThinkingMode {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct Notification {
    message: String,
}

fn parse<T: DeserializeOwned>(event: &str, session_id: &str, payload: &Value) -> Result<T, RouterError> {
    T::deserialize(payload).map_err(|e| RouterError::invalid_payload(event, session_id, e.to_string()))
}

fn on_session_start<'a>(
    client: &'a AdapterClient,
    session_id: &'a str,
    payload: &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>> {
    Box::pin(async move {
        let start: SessionStart = parse("session_start", session_id, payload)?;
        let update = SessionUpdate {
            native_session_id: start.native_session_id,
            active_agent: start.active_agent,
            transcript_path: start.transcript_path,
            ..SessionUpdate::default()
        };
        if !update.is_empty() {
            client.store().update_session(session_id, update).await?;
        }
        Ok(())
    })
}

fn on_stop<'a>(
    client: &'a AdapterClient,
    session_id: &'a str,
    payload: &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>> {
    Box::pin(async move {
        let stop: Stop = parse("stop", session_id, payload)?;
        let session = client.session(session_id).await?;
        let status = OutputStatus::Completed {
            started_at: stop.started_at.unwrap_or(session.created_at),
            finished_at: Utc::now(),
            exit_code: stop.exit_code,
        };
        client
            .send_output_update(session_id, &stop.output, &status)
            .await?;
        client.cleanup_feedback_messages(session_id).await?;
        Ok(())
    })
}

fn on_agent_output<'a>(
    client: &'a AdapterClient,
    session_id: &'a str,
    payload: &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>> {
    Box::pin(async move {
        let output: AgentOutput = parse("agent_output", session_id, payload)?;
        let now = Utc::now();
        let status = OutputStatus::running(
            output.started_at.unwrap_or(now),
            output.last_changed_at.unwrap_or(now),
        );
        client
            .send_output_update(session_id, &output.output, &status)
            .await?;
        Ok(())
    })
}

fn on_thinking_mode<'a>(
    client: &'a AdapterClient,
    session_id: &'a str,
    payload: &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>> {
    Box::pin(async move {
        let thinking: ThinkingMode = parse("thinking_mode", session_id, payload)?;
        let update = SessionUpdate {
            thinking_mode: Some(thinking.mode),
            ..SessionUpdate::default()
        };
        client.store().update_session(session_id, update).await?;
        Ok(())
    })
}

fn on_notification<'a>(
    client: &'a AdapterClient,
    session_id: &'a str,
    payload: &'a Value,
) -> BoxFuture<'a, Result<(), RouterError>> {
    Box::pin(async move {
        let notification: Notification = parse("notification", session_id, payload)?;
        client
            .send_feedback(session_id, &notification.message)
            .await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_payload_defaults() {
        let stop: Stop = parse("stop", "abc", &json!({})).unwrap();
        assert_eq!(stop.output, "");
        assert_eq!(stop.exit_code, 0);
        assert!(stop.started_at.is_none());
    }

    #[test]
    fn test_session_start_accepts_agent_alias() {
        let start: SessionStart =
            parse("session_start", "abc", &json!({"agent": "claude"})).unwrap();
        assert_eq!(start.active_agent.as_deref(), Some("claude"));
    }

    #[test]
    fn test_malformed_payload_names_event() {
        let err = parse::<ThinkingMode>("thinking_mode", "1a2b3c4d-aaaa", &json!({"mode": 3}))
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid thinking_mode payload for session 1a2b3c4d"));
    }
}
