//! Command service used by the daemon.
//!
//! The agent pipeline (tmux, transcription) runs elsewhere. This service
//! creates sessions on first contact and records what arrived.

use async_trait::async_trait;
use std::sync::Arc;
use teleclaude_core::{NewSession, Session, SessionStore, SessionUpdate, short_id};
use teleclaude_router::{CommandError, CommandService, HandleFile, HandleVoice, ProcessMessage};

/// Records inbound commands on the session and logs them.
pub struct LoggingCommands {
    store: Arc<dyn SessionStore>,
}

impl LoggingCommands {
    /// Create the service over `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandService for LoggingCommands {
    async fn create_session(&self, new: NewSession) -> Result<Session, CommandError> {
        let session = self.store.create_session(new).await?;
        tracing::info!(
            session = %session.short_id(),
            origin = %session.origin_adapter,
            tmux = %session.tmux_session_name,
            "Session created"
        );
        Ok(session)
    }

    async fn process_message(&self, command: ProcessMessage) -> Result<(), CommandError> {
        tracing::info!(
            session = %short_id(&command.session_id),
            origin = %command.origin,
            actor = command.actor_name.as_deref().unwrap_or("-"),
            chars = command.text.chars().count(),
            "Message received"
        );
        let update = SessionUpdate {
            last_message_sent: Some(command.text),
            ..SessionUpdate::default()
        };
        self.store.update_session(&command.session_id, update).await?;
        Ok(())
    }

    async fn handle_file(&self, command: HandleFile) -> Result<(), CommandError> {
        tracing::info!(
            session = %short_id(&command.session_id),
            file = %command.file_path.display(),
            "File received"
        );
        Ok(())
    }

    async fn handle_voice(&self, command: HandleVoice) -> Result<(), CommandError> {
        tracing::info!(
            session = %short_id(&command.session_id),
            file = %command.file_path.display(),
            duration = ?command.duration,
            "Voice note received"
        );
        Ok(())
    }

    async fn session_closed(&self, session_id: &str) -> Result<(), CommandError> {
        tracing::info!(session = %short_id(session_id), "Session channel deleted");
        Ok(())
    }

    async fn keys(&self, session_id: &str, keys: &str) -> Result<(), CommandError> {
        tracing::info!(session = %short_id(session_id), keys, "Keys received");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use teleclaude_core::SledSessionStore;

    #[tokio::test]
    async fn test_message_is_recorded_on_session() {
        let store: Arc<dyn SessionStore> = Arc::new(SledSessionStore::temporary().unwrap());
        let service = LoggingCommands::new(store.clone());

        let session = service
            .create_session(NewSession {
                computer_name: "macbook".to_string(),
                tmux_session_name: "tc_rest_1".to_string(),
                origin_adapter: "rest".to_string(),
                title: "rest: 1".to_string(),
                ..NewSession::default()
            })
            .await
            .unwrap();

        service
            .process_message(ProcessMessage {
                session_id: session.session_id.clone(),
                text: "ls -la".to_string(),
                origin: "rest".to_string(),
                actor_id: None,
                actor_name: None,
                actor_avatar_url: None,
            })
            .await
            .unwrap();

        let stored = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.ux.last_message_sent.as_deref(), Some("ls -la"));
    }
}
