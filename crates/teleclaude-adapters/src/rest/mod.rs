//! REST adapter.
//!
//! Serves the HTTP API other computers and local tools talk to. Output sent
//! to a session is published on a per-session broadcast channel that HTTP
//! clients can stream from.

mod http;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

use teleclaude_core::config::RestConfig;
use teleclaude_core::types::{PeerInfo, Session};

use crate::traits::{
    Adapter, AdapterCapabilities, AdapterContext, AdapterError, AdapterKind, MessageMetadata,
};

pub use self::http::{InputRequest, router};

/// Buffered messages per session stream. Slow readers skip ahead.
const STREAM_CAPACITY: usize = 256;

/// REST adapter.
pub struct RestAdapter {
    bind: String,
    port: u16,
    peers: Vec<String>,
    discovery_timeout: Duration,
    client: reqwest::Client,
    state: Arc<RwLock<RestState>>,
}

#[derive(Debug, Default)]
struct RestState {
    ctx: Option<AdapterContext>,
    streams: HashMap<String, broadcast::Sender<String>>,
}

impl RestAdapter {
    /// Create a REST adapter.
    #[must_use]
    pub fn new(config: &RestConfig) -> Self {
        Self {
            bind: config.bind.clone(),
            port: config.port,
            peers: config.peers.clone(),
            discovery_timeout: Duration::from_millis(config.discovery_timeout_ms),
            client: crate::http::client(),
            state: Arc::new(RwLock::new(RestState::default())),
        }
    }

    /// Address the HTTP server should listen on.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Context recorded by `start`, if running.
    async fn context(&self) -> Option<AdapterContext> {
        self.state.read().await.ctx.clone()
    }

    /// Subscribe to output published for a session.
    ///
    /// Channels nobody listens to any more are dropped first, so abandoned
    /// streams for unknown sessions do not accumulate.
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<String> {
        let mut state = self.state.write().await;
        state
            .streams
            .retain(|id, sender| id == session_id || sender.receiver_count() > 0);
        state
            .streams
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(STREAM_CAPACITY).0)
            .subscribe()
    }

    /// Publish to a session's subscribers. Returns how many received it.
    async fn publish(&self, session_id: &str, text: &str) -> usize {
        let mut state = self.state.write().await;
        let Some(sender) = state.streams.get(session_id) else {
            return 0;
        };

        match sender.send(text.to_string()) {
            Ok(receivers) => receivers,
            Err(_) => {
                // Everyone hung up
                state.streams.remove(session_id);
                0
            }
        }
    }

    /// Stream output published for `session_id` until `timeout` elapses or
    /// the session's channel is closed.
    pub async fn output_stream(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> BoxStream<'static, String> {
        let receiver = self.subscribe(session_id).await;
        let deadline = tokio::time::Instant::now() + timeout;
        let state = Arc::clone(&self.state);
        let session_id = session_id.to_string();

        futures::stream::unfold(receiver, move |mut receiver| {
            let state = Arc::clone(&state);
            let session_id = session_id.clone();
            async move {
                loop {
                    match tokio::time::timeout_at(deadline, receiver.recv()).await {
                        Ok(Ok(text)) => return Some((text, receiver)),
                        Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                            tracing::debug!(adapter = "rest", skipped, "Output stream lagged");
                        }
                        Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
                            drop(receiver);
                            prune_stream(&state, &session_id).await;
                            return None;
                        }
                    }
                }
            }
        })
        .boxed()
    }

    #[cfg(test)]
    async fn stream_count(&self) -> usize {
        self.state.read().await.streams.len()
    }

    async fn probe(&self, base_url: &str) -> Option<PeerInfo> {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .inspect_err(|e| tracing::debug!(adapter = "rest", peer = base_url, error = %e, "Peer unreachable"))
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let mut peer: PeerInfo = response.json().await.ok()?;
        peer.adapter_type = AdapterKind::Rest.as_str().to_string();
        peer.last_seen = chrono::Utc::now();
        Some(peer)
    }
}

/// Drop a session's channel once its last listener is gone.
async fn prune_stream(state: &RwLock<RestState>, session_id: &str) {
    let mut state = state.write().await;
    if state
        .streams
        .get(session_id)
        .is_some_and(|sender| sender.receiver_count() == 0)
    {
        state.streams.remove(session_id);
    }
}

#[async_trait]
impl Adapter for RestAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Rest
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::headless()
    }

    async fn start(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.state.write().await.ctx = Some(ctx);
        tracing::info!(adapter = "rest", addr = %self.listen_addr(), "REST adapter ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        state.ctx = None;
        // Dropping the senders ends every open stream
        state.streams.clear();
        Ok(())
    }

    async fn send_message(
        &self,
        session: &Session,
        text: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        let receivers = self.publish(&session.session_id, text).await;
        tracing::trace!(
            adapter = "rest",
            session = %session.short_id(),
            receivers,
            "Published output"
        );
        Ok(String::new())
    }

    async fn edit_message(
        &self,
        session: &Session,
        _message_id: &str,
        text: &str,
        _metadata: &MessageMetadata,
    ) -> bool {
        self.publish(&session.session_id, text).await;
        true
    }

    async fn delete_message(&self, _session: &Session, _message_id: &str) -> bool {
        true
    }

    async fn send_file(
        &self,
        _session: &Session,
        _path: &Path,
        _caption: Option<&str>,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        Err(AdapterError::NotSupported("file upload"))
    }

    async fn create_channel(
        &self,
        session: &mut Session,
        _title: &str,
        _metadata: &MessageMetadata,
    ) -> Result<String, AdapterError> {
        Ok(session.session_id.clone())
    }

    async fn update_channel_title(&self, _session: &Session, _title: &str) -> bool {
        true
    }

    async fn close_channel(&self, session: &mut Session) -> bool {
        self.state.write().await.streams.remove(&session.session_id);
        true
    }

    async fn reopen_channel(&self, _session: &mut Session) -> bool {
        true
    }

    async fn delete_channel(&self, session: &mut Session) -> bool {
        self.close_channel(session).await
    }

    async fn discover_peers(&self) -> Vec<PeerInfo> {
        let probes = self.peers.iter().map(|url| self.probe(url));
        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn poll_output_stream(
        &self,
        session: &Session,
        timeout: Duration,
    ) -> Result<BoxStream<'static, String>, AdapterError> {
        Ok(self.output_stream(&session.session_id, timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;

    fn adapter() -> RestAdapter {
        RestAdapter::new(&RestConfig::default())
    }

    #[test]
    fn test_no_ui() {
        let adapter = adapter();
        assert!(!adapter.capabilities().has_ui);
        assert_eq!(adapter.listen_addr(), "127.0.0.1:6666");
    }

    #[tokio::test]
    async fn test_send_returns_empty_id() {
        let adapter = adapter();
        let id = adapter
            .send_message(&test_session("rest"), "hello", &MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(id, "");
    }

    #[tokio::test]
    async fn test_stream_yields_published_output() {
        let adapter = adapter();
        let session = test_session("rest");

        let mut stream = adapter
            .poll_output_stream(&session, Duration::from_secs(5))
            .await
            .unwrap();

        adapter
            .send_message(&session, "line 1", &MessageMetadata::default())
            .await
            .unwrap();
        adapter
            .send_message(&session, "line 2", &MessageMetadata::default())
            .await
            .unwrap();

        assert_eq!(stream.next().await.as_deref(), Some("line 1"));
        assert_eq!(stream.next().await.as_deref(), Some("line 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_at_timeout() {
        let adapter = adapter();
        let session = test_session("rest");

        let mut stream = adapter
            .poll_output_stream(&session, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(adapter.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_streams_are_pruned() {
        let adapter = adapter();

        for id in ["ghost-1", "ghost-2", "ghost-3"] {
            let stream = adapter.output_stream(id, Duration::from_secs(60)).await;
            drop(stream);
        }

        let _live = adapter.output_stream("live", Duration::from_secs(60)).await;
        assert_eq!(adapter.stream_count().await, 1);
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let adapter = adapter();
        let mut session = test_session("rest");

        let mut stream = adapter
            .poll_output_stream(&session, Duration::from_secs(60))
            .await
            .unwrap();
        adapter.close_channel(&mut session).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_discover_unreachable_peer_is_omitted() {
        let adapter = RestAdapter::new(&RestConfig {
            peers: vec!["http://127.0.0.1:9".to_string()],
            discovery_timeout_ms: 200,
            ..RestConfig::default()
        });
        assert!(adapter.discover_peers().await.is_empty());
    }
}
