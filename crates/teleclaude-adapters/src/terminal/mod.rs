//! Local terminal adapter.
//!
//! Sessions started from a terminal have no chat surface of their own. Sends
//! are logged and the router broadcasts to the UI adapters instead.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use teleclaude_core::types::{PeerInfo, Session};

use crate::traits::{
    Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, MessageMetadata,
};

/// Terminal adapter.
#[derive(Debug, Default)]
pub struct TerminalAdapter {
    computer_name: Arc<RwLock<Option<String>>>,
}

impl TerminalAdapter {
    /// Create a terminal adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a terminal adapter that already knows the local computer.
    #[must_use]
    pub fn for_computer(name: impl Into<String>) -> Self {
        Self {
            computer_name: Arc::new(RwLock::new(Some(name.into()))),
        }
    }
}

#[async_trait]
impl Adapter for TerminalAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Terminal
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::headless()
    }

    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        *self.computer_name.write().await = Some(ctx.computer_name);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        tracing::debug!(
            adapter = "terminal",
            session = %session.short_id(),
            len = text.len(),
            "Terminal send dropped"
        );
        Ok(String::new())
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
        true
    }

    async fn send_file(
        &self,
        session: &Session,
        path: &Path,
        _caption: Option<&str>,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        tracing::debug!(
            adapter = "terminal",
            session = %session.short_id(),
            path = %path.display(),
            "Terminal file send dropped"
        );
        Ok(String::new())
    }

    async fn create_channel(
        &self,
        session: &mut Session,
        _title: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        Ok(session.tmux_session_name.clone())
    }

    async fn update_channel_title(&self, _session: &Session, _title: &str) -> bool {
        true
    }

    async fn close_channel(&self, _session: &mut Session) -> bool {
        true
    }

    async fn reopen_channel(&self, _session: &mut Session) -> bool {
        true
    }

    async fn delete_channel(&self, _session: &mut Session) -> bool {
        true
    }

    async fn discover_peers(&self) -> Vec<PeerInfo> {
        self.computer_name
            .read()
            .await
            .as_ref()
            .map(|name| vec![PeerInfo::online(name.clone(), AdapterKind::Terminal.as_str())])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;

    #[tokio::test]
    async fn test_sends_are_noops() {
        let adapter = TerminalAdapter::new();
        let id = adapter
            .send_message(&test_session("terminal"), "hi", &MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(id, "");
        assert!(!adapter.capabilities().has_ui);
    }

    #[tokio::test]
    async fn test_streaming_not_supported() {
        let adapter = TerminalAdapter::new();
        let result = adapter
            .poll_output_stream(&test_session("terminal"), std::time::Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(AdapterError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_reports_local_computer() {
        assert!(TerminalAdapter::new().discover_peers().await.is_empty());

        let peers = TerminalAdapter::for_computer("macbook").discover_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "macbook");
        assert_eq!(peers[0].adapter_type, "terminal");
    }
}
