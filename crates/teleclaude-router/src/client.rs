//! The adapter router.
//!
//! Every session has one origin adapter whose failures are fatal. All other
//! UI adapters are observers that mirror sends best-effort.
//!
//! Metadata writes follow re-read-then-merge: the session is fetched right
//! before an adapter's sub-record is written back. This is last-writer-wins on
//! the metadata blob, not a transaction. Two inbound lanes racing on the same
//! session can lose one side's sub-record change.

use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use teleclaude_adapters::{
    Adapter, AdapterContext, AdapterError, InboundEvent, InboundPayload, MessageMetadata,
    OutputStatus, format_output,
};
use teleclaude_core::store::NewSession;
use teleclaude_core::{
    AdapterMetadata, DeletionType, LifecycleStatus, PeerInfo, PendingDeletion, Session,
    SessionStore, SessionUpdate, short_id,
};

use crate::commands::{Command, CommandService, HandleFile, HandleVoice, ProcessMessage};
use crate::error::RouterError;
use crate::events::{self, EventHandler};
use crate::registry::AdapterRegistry;

/// Adapter name of local terminal sessions.
pub const TERMINAL: &str = "terminal";

/// Upper bound on one adapter's peer discovery.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on one observer delivery.
const OBSERVER_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffered inbound events.
const INBOUND_CAPACITY: usize = 256;

/// What is being delivered to an adapter.
#[derive(Clone, Copy)]
enum Delivery<'a> {
    Message {
        text: &'a str,
        metadata: &'a MessageMetadata,
    },
    File {
        path: &'a Path,
        caption: Option<&'a str>,
        metadata: &'a MessageMetadata,
    },
    Output {
        output: &'a str,
        status: &'a OutputStatus,
        metadata: &'a MessageMetadata,
    },
}

impl<'a> Delivery<'a> {
    /// Same delivery, as an observer mirror.
    fn with_metadata(self, metadata: &'a MessageMetadata) -> Self {
        match self {
            Self::Message { text, .. } => Self::Message { text, metadata },
            Self::File { path, caption, .. } => Self::File {
                path,
                caption,
                metadata,
            },
            Self::Output { output, status, .. } => Self::Output {
                output,
                status,
                metadata,
            },
        }
    }

    const fn metadata(self) -> &'a MessageMetadata {
        match self {
            Self::Message { metadata, .. }
            | Self::File { metadata, .. }
            | Self::Output { metadata, .. } => metadata,
        }
    }
}

#[derive(Clone, Copy)]
enum ChannelOp<'a> {
    Rename(&'a str),
    Close,
    Reopen,
    Delete,
}

impl ChannelOp<'_> {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Rename(_) => "rename",
            Self::Close => "close",
            Self::Reopen => "reopen",
            Self::Delete => "delete",
        }
    }
}

/// The adapter router.
pub struct AdapterClient {
    store: Arc<dyn SessionStore>,
    registry: AdapterRegistry,
    computer_name: String,
    download_dir: PathBuf,
    observer_timeout: Duration,
    handlers: HashMap<&'static str, EventHandler>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterClient {
    /// Create a router over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, computer_name: impl Into<String>) -> Self {
        Self {
            store,
            registry: AdapterRegistry::new(),
            computer_name: computer_name.into(),
            download_dir: std::env::temp_dir().join("teleclaude"),
            observer_timeout: OBSERVER_TIMEOUT,
            handlers: events::handler_table(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Set where adapters download inbound files.
    #[must_use]
    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.download_dir = dir;
        self
    }

    /// Bound how long a single observer delivery may hold up the origin's
    /// result. Slower observers are dropped for that delivery.
    #[must_use]
    pub const fn with_observer_timeout(mut self, timeout: Duration) -> Self {
        self.observer_timeout = timeout;
        self
    }

    /// Register an adapter. Registration order is discovery priority.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        tracing::debug!(adapter = %adapter.name(), "Registered adapter");
        self.registry.register(adapter);
    }

    /// Registered adapters.
    #[must_use]
    pub const fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// This computer's name.
    #[must_use]
    pub fn computer_name(&self) -> &str {
        &self.computer_name
    }

    /// Start every adapter and the inbound dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns error if an adapter fails to start.
    pub async fn start(self: &Arc<Self>, commands: Arc<dyn CommandService>) -> Result<(), RouterError> {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(INBOUND_CAPACITY);

        for adapter in self.registry.iter() {
            let ctx = AdapterContext {
                computer_name: self.computer_name.clone(),
                download_dir: self.download_dir.clone(),
                inbound: tx.clone(),
            };
            adapter
                .start(ctx)
                .await
                .map_err(|source| RouterError::Start {
                    adapter: adapter.name().to_string(),
                    source,
                })?;
        }
        drop(tx);

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let adapter = event.adapter.clone();
                if let Err(e) = client.dispatch_inbound(event, commands.as_ref()).await {
                    tracing::warn!(adapter = %adapter, error = %e, "Inbound event failed");
                }
            }
            tracing::debug!("Inbound channel closed");
        });

        if let Some(old) = self.dispatcher.lock().await.replace(handle) {
            old.abort();
        }

        tracing::info!(adapters = ?self.registry.names(), "Adapter router started");
        Ok(())
    }

    /// Stop every adapter and the dispatch loop.
    pub async fn stop(&self) {
        for adapter in self.registry.iter() {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(adapter = %adapter.name(), error = %e, "Adapter stop failed");
            }
        }
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
        tracing::info!("Adapter router stopped");
    }

    // Outbound

    /// Send a message to the session's origin and mirror it to observers.
    ///
    /// Returns the origin's message ID. Terminal sessions broadcast to every
    /// UI adapter instead and return the first ID produced.
    ///
    /// # Errors
    ///
    /// Returns error if the origin send fails (after one recovery attempt for
    /// a missing destination), or the origin adapter is not registered.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        metadata: &MessageMetadata,
    ) -> Result<String, RouterError> {
        let session = self.session(session_id).await?;
        self.fan_out(&session, Delivery::Message { text, metadata })
            .await
            .0
    }

    /// Upload a file through the session's origin.
    ///
    /// # Errors
    ///
    /// Returns error if the origin upload fails (including a missing local
    /// file).
    pub async fn send_file(
        &self,
        session_id: &str,
        path: &Path,
        caption: Option<&str>,
        metadata: &MessageMetadata,
    ) -> Result<String, RouterError> {
        let session = self.session(session_id).await?;
        let delivery = Delivery::File {
            path,
            caption,
            metadata,
        };

        if session.origin_adapter == TERMINAL {
            let delivered = self.broadcast(&session, delivery).await;
            return Ok(first_id(&delivered));
        }

        let origin = self.origin(&session)?;
        self.with_recovery(origin, &session, delivery).await
    }

    /// Edit a message through the origin. `false` means "send a new one".
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be read.
    pub async fn edit_message(
        &self,
        session_id: &str,
        message_id: &str,
        text: &str,
        metadata: &MessageMetadata,
    ) -> Result<bool, RouterError> {
        let session = self.session(session_id).await?;
        Ok(match self.registry.get(&session.origin_adapter) {
            Some(adapter) => {
                adapter
                    .edit_message(&session, message_id, text, metadata)
                    .await
            }
            None => false,
        })
    }

    /// Delete a message through the origin.
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be read.
    pub async fn delete_message(&self, session_id: &str, message_id: &str) -> Result<bool, RouterError> {
        let session = self.session(session_id).await?;
        Ok(match self.registry.get(&session.origin_adapter) {
            Some(adapter) => adapter.delete_message(&session, message_id).await,
            None => false,
        })
    }

    /// Show agent output, editing each adapter's output message in place when
    /// it can and sending a new one otherwise.
    ///
    /// Every adapter formats for its own size limit. New output message IDs
    /// are persisted.
    ///
    /// # Errors
    ///
    /// Returns error if the origin delivery fails or the store fails.
    pub async fn send_output_update(
        &self,
        session_id: &str,
        output: &str,
        status: &OutputStatus,
    ) -> Result<String, RouterError> {
        let session = self.session(session_id).await?;
        let metadata = MessageMetadata::default();
        let delivery = Delivery::Output {
            output,
            status,
            metadata: &metadata,
        };

        // Observers keep their output message even when the origin fails
        let (result, delivered) = self.fan_out(&session, delivery).await;
        self.record_output_ids(session_id, &delivered).await?;
        result
    }

    /// Send ephemeral feedback ("Transcribing...").
    ///
    /// Goes to the adapter that delivered the last input if it has a UI,
    /// else the origin if it has a UI, else nowhere. Terminal sessions
    /// broadcast. Sent messages are tracked for [`Self::cleanup_feedback_messages`].
    ///
    /// # Errors
    ///
    /// Returns error if the store fails. Delivery failures are logged.
    pub async fn send_feedback(&self, session_id: &str, text: &str) -> Result<Option<String>, RouterError> {
        let session = self.session(session_id).await?;
        let metadata = MessageMetadata::feedback();
        let delivery = Delivery::Message {
            text,
            metadata: &metadata,
        };

        let delivered = if session.origin_adapter == TERMINAL {
            self.broadcast(&session, delivery).await
        } else {
            let target = session
                .ux
                .last_input_adapter
                .as_deref()
                .and_then(|name| self.registry.get_ui(name))
                .or_else(|| self.registry.get_ui(&session.origin_adapter));

            let Some(adapter) = target else {
                tracing::debug!(
                    session = %session.short_id(),
                    "No UI adapter for feedback"
                );
                return Ok(None);
            };
            self.observe(adapter, &session, delivery)
                .await
                .into_iter()
                .collect()
        };

        let mut first = None;
        for (adapter, message_id) in delivered {
            if message_id.is_empty() {
                continue;
            }
            self.store
                .add_pending_deletion(PendingDeletion::new(
                    session_id,
                    message_id.clone(),
                    DeletionType::Feedback,
                    adapter.name(),
                ))
                .await?;
            first.get_or_insert(message_id);
        }

        if first.is_some() {
            let update = SessionUpdate {
                last_feedback_received: Some(Utc::now()),
                ..SessionUpdate::default()
            };
            self.store.update_session(session_id, update).await?;
        }
        Ok(first)
    }

    /// Delete tracked feedback messages. Returns how many were deleted.
    ///
    /// Rows are cleared whether or not deletion succeeded, so a message that
    /// cannot be deleted is not retried forever.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn cleanup_feedback_messages(&self, session_id: &str) -> Result<usize, RouterError> {
        let session = self.session(session_id).await?;
        self.sweep(&session, DeletionType::Feedback).await
    }

    /// Bookkeeping before forwarding user input: record which adapter it
    /// came from, delete the previous input and feedback messages, and track
    /// the new input message for deletion.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn pre_handle_user_input(
        &self,
        session_id: &str,
        adapter: &str,
        message_id: Option<&str>,
    ) -> Result<(), RouterError> {
        let update = SessionUpdate {
            last_input_adapter: Some(adapter.to_string()),
            ..SessionUpdate::default()
        };
        self.store.update_session(session_id, update).await?;

        let session = self.session(session_id).await?;
        self.sweep(&session, DeletionType::UserInput).await?;
        self.sweep(&session, DeletionType::Feedback).await?;

        if let Some(message_id) = message_id {
            self.store
                .add_pending_deletion(PendingDeletion::new(
                    session_id,
                    message_id,
                    DeletionType::UserInput,
                    adapter,
                ))
                .await?;
        }
        Ok(())
    }

    // Channels

    /// Provision the session's channel on the origin, then on observers.
    ///
    /// Returns the origin's channel ID. Adapters return an existing channel
    /// instead of creating a second one.
    ///
    /// # Errors
    ///
    /// Returns error if origin provisioning or the store fails. Observer
    /// failures are logged.
    pub async fn create_channel(&self, session_id: &str, title: &str) -> Result<String, RouterError> {
        let mut session = self.session(session_id).await?;
        let origin = self.origin(&session)?;

        let channel_id = origin
            .create_channel(&mut session, title, &MessageMetadata::default())
            .await
            .map_err(|e| RouterError::channel_creation(origin.name(), session_id, e))?;

        let observers = self
            .registry
            .ui_except(&session.origin_adapter)
            .filter(|a| a.capabilities().supports_channels)
            .map(|adapter| {
                let mut copy = session.clone();
                async move {
                    match adapter
                        .create_channel(&mut copy, title, &MessageMetadata::feedback())
                        .await
                    {
                        Ok(_) => Some((adapter.name().to_string(), copy.adapter_metadata)),
                        Err(e) => {
                            log_observer_error(adapter.as_ref(), &copy, &e);
                            None
                        }
                    }
                }
            });
        let mut changes: Vec<(String, AdapterMetadata)> =
            join_all(observers).await.into_iter().flatten().collect();
        changes.push((origin.name().to_string(), session.adapter_metadata));

        self.persist_metadata(session_id, &changes).await?;
        Ok(channel_id)
    }

    /// Rename the session everywhere.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn update_channel_title(&self, session_id: &str, title: &str) -> Result<bool, RouterError> {
        self.store
            .update_session(session_id, SessionUpdate::new().with_title(title))
            .await?;
        self.channel_fanout(session_id, ChannelOp::Rename(title)).await
    }

    /// Close (archive) the session's channels.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn close_channel(&self, session_id: &str) -> Result<bool, RouterError> {
        self.channel_fanout(session_id, ChannelOp::Close).await
    }

    /// Reopen the session's channels.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn reopen_channel(&self, session_id: &str) -> Result<bool, RouterError> {
        self.channel_fanout(session_id, ChannelOp::Reopen).await
    }

    /// Delete the session's channels.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn delete_channel(&self, session_id: &str) -> Result<bool, RouterError> {
        self.channel_fanout(session_id, ChannelOp::Delete).await
    }

    /// Close a session: `closing`, feedback swept, channels closed, `closed`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn close_session(&self, session_id: &str) -> Result<(), RouterError> {
        self.store
            .update_session(
                session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Closing),
            )
            .await?;

        self.cleanup_feedback_messages(session_id).await?;
        self.close_channel(session_id).await?;

        self.store
            .update_session(
                session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Closed),
            )
            .await?;
        tracing::info!(session = %short_id(session_id), "Session closed");
        Ok(())
    }

    // Discovery and events

    /// Peers seen by every adapter, first-registered adapter wins on name.
    ///
    /// A slow or panicking adapter is dropped from the result.
    pub async fn discover_peers(&self) -> Vec<PeerInfo> {
        let probes = self.registry.iter().map(|adapter| {
            let name = adapter.name().to_string();
            let adapter = Arc::clone(adapter);
            async move {
                let task = tokio::spawn(async move { adapter.discover_peers().await });
                let abort = task.abort_handle();
                match tokio::time::timeout(DISCOVERY_TIMEOUT, task).await {
                    Ok(Ok(peers)) => peers,
                    Ok(Err(e)) => {
                        tracing::warn!(adapter = %name, error = %e, "Peer discovery failed");
                        Vec::new()
                    }
                    Err(_) => {
                        abort.abort();
                        tracing::warn!(adapter = %name, "Peer discovery timed out");
                        Vec::new()
                    }
                }
            }
        });

        let mut seen = HashSet::new();
        join_all(probes)
            .await
            .into_iter()
            .flatten()
            .filter(|peer| seen.insert(peer.name.clone()))
            .collect()
    }

    /// Handle an agent event (`session_start`, `stop`, `agent_output`,
    /// `thinking_mode`, `notification`). Unknown events are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is malformed or the handler fails.
    pub async fn handle_event(
        &self,
        session_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RouterError> {
        let Some(handler) = self.handlers.get(event) else {
            tracing::debug!(session = %short_id(session_id), event, "Ignoring unknown event");
            return Ok(());
        };
        handler(self, session_id, payload).await
    }

    /// Names of the events `handle_event` understands.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    // Inbound

    /// Resolve an inbound event to a session and hand it to `commands`.
    ///
    /// First contact on a platform creates the session through the command
    /// service.
    ///
    /// # Errors
    ///
    /// Returns error if the store or the command service fails.
    pub async fn dispatch_inbound(
        &self,
        event: InboundEvent,
        commands: &dyn CommandService,
    ) -> Result<(), RouterError> {
        let Some(session) = self.resolve_session(&event, commands).await? else {
            return Ok(());
        };
        let session_id = session.session_id.clone();

        let command = match event.payload {
            InboundPayload::Text(text) => {
                self.pre_handle_user_input(&session_id, &event.adapter, event.message_id.as_deref())
                    .await?;
                match text.strip_prefix("/keys ") {
                    Some(keys) => Command::Keys {
                        session_id,
                        keys: keys.trim().to_string(),
                    },
                    None => {
                        let actor = event.actor.unwrap_or_default();
                        Command::ProcessMessage(ProcessMessage {
                            session_id,
                            text,
                            origin: event.adapter.clone(),
                            actor_id: actor.id,
                            actor_name: Some(actor.name).filter(|n| !n.is_empty()),
                            actor_avatar_url: actor.avatar_url,
                        })
                    }
                }
            }
            InboundPayload::File {
                path,
                filename,
                caption,
            } => {
                self.pre_handle_user_input(&session_id, &event.adapter, event.message_id.as_deref())
                    .await?;
                Command::HandleFile(HandleFile {
                    session_id,
                    file_path: path,
                    filename,
                    caption,
                })
            }
            InboundPayload::Voice {
                path,
                duration_secs,
            } => {
                self.pre_handle_user_input(&session_id, &event.adapter, event.message_id.as_deref())
                    .await?;
                Command::HandleVoice(HandleVoice {
                    session_id,
                    file_path: path,
                    duration: duration_secs,
                    actor_id: event.actor.and_then(|a| a.id),
                })
            }
            InboundPayload::DownloadRequested => {
                self.send_transcript(&session, &event.adapter).await?;
                return Ok(());
            }
            InboundPayload::ChannelDeleted => {
                // The platform side is already gone; forget it before closing
                if let Some(adapter) = self.registry.get(&event.adapter) {
                    let mut copy = session.clone();
                    adapter.clear_destination(&mut copy);
                    self.persist_metadata(
                        &session_id,
                        &[(adapter.name().to_string(), copy.adapter_metadata)],
                    )
                    .await?;
                }
                self.close_session(&session_id).await?;
                Command::SessionClosed { session_id }
            }
        };

        tracing::debug!(
            adapter = %event.adapter,
            session = %short_id(command.session_id()),
            "Dispatching command"
        );
        commands.execute(command).await?;
        Ok(())
    }

    async fn resolve_session(
        &self,
        event: &InboundEvent,
        commands: &dyn CommandService,
    ) -> Result<Option<Session>, RouterError> {
        let found = if event.lookup_field == "session_id" {
            self.store.get_session(&event.lookup_value).await?
        } else {
            self.store
                .get_sessions_by_adapter_metadata(
                    &event.adapter,
                    event.lookup_field,
                    &event.lookup_value,
                    false,
                )
                .await?
                .into_iter()
                .next()
        };

        if let Some(session) = found {
            self.absorb_seed(&session, &event.seed).await?;
            return Ok(Some(session));
        }

        match event.payload {
            InboundPayload::Text(_) | InboundPayload::File { .. } | InboundPayload::Voice { .. }
                if event.lookup_field != "session_id" => {}
            _ => {
                tracing::debug!(
                    adapter = %event.adapter,
                    key = %event.lookup_value,
                    "No session for inbound event"
                );
                return Ok(None);
            }
        }

        let title = event
            .actor
            .as_ref()
            .map_or_else(|| event.lookup_value.clone(), |a| a.name.clone());
        let new = NewSession {
            computer_name: self.computer_name.clone(),
            tmux_session_name: tmux_name(&event.adapter, &event.lookup_value),
            origin_adapter: event.adapter.clone(),
            title: format!("{}: {title}", event.adapter),
            adapter_metadata: event.seed.clone(),
            ..NewSession::default()
        };

        let session = commands.create_session(new).await?;
        tracing::info!(
            adapter = %event.adapter,
            session = %session.short_id(),
            "Session created on first contact"
        );
        Ok(Some(session))
    }

    /// Fold identifiers carried by an inbound event into the stored session.
    async fn absorb_seed(&self, session: &Session, seed: &AdapterMetadata) -> Result<(), RouterError> {
        let Some(mut fresh) = self.store.get_session(&session.session_id).await? else {
            return Ok(());
        };
        let before = fresh.adapter_metadata.clone();
        fresh.adapter_metadata.absorb(seed);
        if fresh.adapter_metadata != before {
            self.store
                .update_session(
                    &session.session_id,
                    SessionUpdate::new().with_metadata(fresh.adapter_metadata),
                )
                .await?;
        }
        Ok(())
    }

    async fn send_transcript(&self, session: &Session, adapter: &str) -> Result<(), RouterError> {
        let Some(path) = session.ux.transcript_path.as_deref() else {
            self.send_feedback(&session.session_id, "No transcript available")
                .await?;
            return Ok(());
        };
        let Some(adapter) = self.registry.get(adapter) else {
            return Ok(());
        };

        if let Err(e) = adapter
            .send_file(
                session,
                Path::new(path),
                Some("Full output"),
                &MessageMetadata::default(),
            )
            .await
        {
            tracing::warn!(
                adapter = %adapter.name(),
                session = %session.short_id(),
                error = %e,
                "Transcript upload failed"
            );
        }
        Ok(())
    }

    // Internals

    pub(crate) async fn session(&self, session_id: &str) -> Result<Session, RouterError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| RouterError::SessionNotFound(short_id(session_id).to_string()))
    }

    fn origin(&self, session: &Session) -> Result<&Arc<dyn Adapter>, RouterError> {
        self.registry
            .get(&session.origin_adapter)
            .ok_or_else(|| RouterError::not_registered(&session.origin_adapter, &session.session_id))
    }

    /// Origin delivery (fatal) concurrently with observer mirrors
    /// (best-effort). Returns the origin result and everything delivered,
    /// observers included even when the origin failed.
    async fn fan_out(
        &self,
        session: &Session,
        delivery: Delivery<'_>,
    ) -> (Result<String, RouterError>, Vec<(Arc<dyn Adapter>, String)>) {
        if session.origin_adapter == TERMINAL {
            let delivered = self.broadcast(session, delivery).await;
            return (Ok(first_id(&delivered)), delivered);
        }

        let mirror = delivery.metadata().as_feedback();
        let observed = join_all(
            self.registry
                .ui_except(&session.origin_adapter)
                .map(|adapter| self.observe(adapter, session, delivery.with_metadata(&mirror))),
        );

        let origin = async {
            let adapter = self.origin(session)?;
            let id = self.with_recovery(adapter, session, delivery).await?;
            Ok::<_, RouterError>((Arc::clone(adapter), id))
        };

        let (origin, observed) = tokio::join!(origin, observed);
        let mut delivered: Vec<_> = observed.into_iter().flatten().collect();
        match origin {
            Ok((adapter, id)) => {
                delivered.push((adapter, id.clone()));
                (Ok(id), delivered)
            }
            Err(e) => (Err(e), delivered),
        }
    }

    /// Deliver to every UI adapter, none of them fatal.
    async fn broadcast(&self, session: &Session, delivery: Delivery<'_>) -> Vec<(Arc<dyn Adapter>, String)> {
        join_all(
            self.registry
                .iter()
                .filter(|a| a.capabilities().has_ui)
                .map(|adapter| self.observe(adapter, session, delivery)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    /// Best-effort delivery: failures and timeouts are logged and yield `None`.
    async fn observe(
        &self,
        adapter: &Arc<dyn Adapter>,
        session: &Session,
        delivery: Delivery<'_>,
    ) -> Option<(Arc<dyn Adapter>, String)> {
        let sent = deliver(adapter.as_ref(), session, delivery);
        match tokio::time::timeout(self.observer_timeout, sent).await {
            Ok(Ok(id)) => Some((Arc::clone(adapter), id)),
            Ok(Err(e)) => {
                log_observer_error(adapter.as_ref(), session, &e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    adapter = %adapter.name(),
                    session = %session.short_id(),
                    timeout = ?self.observer_timeout,
                    "Observer delivery timed out"
                );
                None
            }
        }
    }

    /// Deliver through `adapter`, recreating a vanished destination once.
    async fn with_recovery(
        &self,
        adapter: &Arc<dyn Adapter>,
        session: &Session,
        delivery: Delivery<'_>,
    ) -> Result<String, RouterError> {
        let error = match deliver(adapter.as_ref(), session, delivery).await {
            Ok(id) => return Ok(id),
            Err(e) if adapter.is_missing_destination_error(&e) => e,
            Err(e) => return Err(RouterError::delivery(adapter.name(), &session.session_id, e)),
        };

        tracing::warn!(
            adapter = %adapter.name(),
            session = %session.short_id(),
            error = %error,
            "Destination is gone, recreating"
        );

        let fresh = self.recreate_destination(adapter, &session.session_id).await?;
        deliver(adapter.as_ref(), &fresh, delivery)
            .await
            .map_err(|e| RouterError::delivery(adapter.name(), &session.session_id, e))
    }

    async fn recreate_destination(
        &self,
        adapter: &Arc<dyn Adapter>,
        session_id: &str,
    ) -> Result<Session, RouterError> {
        let mut session = self.session(session_id).await?;
        let name = adapter.name().to_string();

        adapter.clear_destination(&mut session);
        self.persist_metadata(session_id, &[(name.clone(), session.adapter_metadata.clone())])
            .await?;

        let title = session.title.clone();
        adapter
            .create_channel(&mut session, &title, &MessageMetadata::default())
            .await
            .map_err(|e| RouterError::channel_creation(&name, session_id, e))?;
        self.persist_metadata(session_id, &[(name, session.adapter_metadata.clone())])
            .await?;

        Ok(session)
    }

    /// Re-read the session and write back the given adapters' sub-records.
    async fn persist_metadata(
        &self,
        session_id: &str,
        changes: &[(String, AdapterMetadata)],
    ) -> Result<(), RouterError> {
        let Some(fresh) = self.store.get_session(session_id).await? else {
            tracing::debug!(session = %short_id(session_id), "Session vanished before metadata write");
            return Ok(());
        };

        let mut metadata = fresh.adapter_metadata.clone();
        for (adapter, changed) in changes {
            metadata.merge_from(adapter, changed);
        }
        if metadata == fresh.adapter_metadata {
            return Ok(());
        }

        self.store
            .update_session(session_id, SessionUpdate::new().with_metadata(metadata))
            .await?;
        Ok(())
    }

    /// Persist new output message IDs and bump `last_output_at`.
    async fn record_output_ids(
        &self,
        session_id: &str,
        delivered: &[(Arc<dyn Adapter>, String)],
    ) -> Result<(), RouterError> {
        let Some(mut fresh) = self.store.get_session(session_id).await? else {
            return Ok(());
        };

        let mut update = SessionUpdate {
            last_output_at: Some(Utc::now()),
            ..SessionUpdate::default()
        };

        let before = fresh.adapter_metadata.clone();
        for (adapter, id) in delivered {
            if !id.is_empty() {
                adapter.set_output_message_id(&mut fresh, Some(id.clone()));
            }
        }
        if fresh.adapter_metadata != before {
            update.adapter_metadata = Some(fresh.adapter_metadata);
        }

        self.store.update_session(session_id, update).await?;
        Ok(())
    }

    async fn sweep(&self, session: &Session, deletion_type: DeletionType) -> Result<usize, RouterError> {
        let pending = self
            .store
            .list_pending_deletions(&session.session_id, deletion_type)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for row in &pending {
            let adapter = self
                .registry
                .get(&row.adapter)
                .or_else(|| self.registry.get(&session.origin_adapter));
            let ok = match adapter {
                Some(adapter) => adapter.delete_message(session, &row.message_id).await,
                None => false,
            };
            if ok {
                deleted += 1;
            } else {
                tracing::debug!(
                    adapter = %row.adapter,
                    session = %session.short_id(),
                    message = %row.message_id,
                    kind = deletion_type.as_str(),
                    "Could not delete tracked message"
                );
            }
        }

        self.store
            .clear_pending_deletions(&session.session_id, deletion_type)
            .await?;
        Ok(deleted)
    }

    async fn channel_fanout(&self, session_id: &str, op: ChannelOp<'_>) -> Result<bool, RouterError> {
        let session = self.session(session_id).await?;
        let origin = session.origin_adapter.as_str();

        let targets = self
            .registry
            .iter()
            .filter(|a| a.name() == origin || (a.capabilities().has_ui && a.capabilities().supports_channels))
            .map(|adapter| {
                let mut copy = session.clone();
                async move {
                    let ok = match op {
                        ChannelOp::Rename(title) => adapter.update_channel_title(&copy, title).await,
                        ChannelOp::Close => adapter.close_channel(&mut copy).await,
                        ChannelOp::Reopen => adapter.reopen_channel(&mut copy).await,
                        ChannelOp::Delete => adapter.delete_channel(&mut copy).await,
                    };
                    if !ok {
                        tracing::debug!(
                            adapter = %adapter.name(),
                            session = %copy.short_id(),
                            op = op.as_str(),
                            "Channel operation incomplete"
                        );
                    }
                    (adapter.name().to_string(), ok, copy.adapter_metadata)
                }
            });

        let results = join_all(targets).await;
        let origin_ok = results
            .iter()
            .find(|(name, _, _)| name == origin)
            .is_some_and(|(_, ok, _)| *ok);

        let changes: Vec<_> = results
            .into_iter()
            .map(|(name, _, metadata)| (name, metadata))
            .collect();
        self.persist_metadata(session_id, &changes).await?;
        Ok(origin_ok)
    }
}

/// Run one delivery against one adapter.
async fn deliver(
    adapter: &dyn Adapter,
    session: &Session,
    delivery: Delivery<'_>,
) -> Result<String, AdapterError> {
    match delivery {
        Delivery::Message { text, metadata } => adapter.send_message(session, text, metadata).await,
        Delivery::File {
            path,
            caption,
            metadata,
        } => adapter.send_file(session, path, caption, metadata).await,
        Delivery::Output {
            output,
            status,
            metadata,
        } => {
            let caps = adapter.capabilities();
            let transcript = session.ux.transcript_path.as_deref().map(Path::new);
            let formatted = format_output(
                output,
                status,
                caps.max_message_len.unwrap_or(usize::MAX),
                transcript,
            );
            let metadata = MessageMetadata {
                download: formatted.download,
                ..metadata.clone()
            };

            if caps.supports_edit {
                if let Some(existing) = adapter.output_message_id(session) {
                    if adapter
                        .edit_message(session, &existing, &formatted.text, &metadata)
                        .await
                    {
                        return Ok(existing);
                    }
                }
            }
            adapter
                .send_message(session, &formatted.text, &metadata)
                .await
        }
    }
}

fn log_observer_error(adapter: &dyn Adapter, session: &Session, error: &AdapterError) {
    if matches!(error, AdapterError::NoDestination) {
        tracing::debug!(
            adapter = %adapter.name(),
            session = %session.short_id(),
            "Observer has no destination"
        );
    } else {
        tracing::warn!(
            adapter = %adapter.name(),
            session = %session.short_id(),
            error = %error,
            "Observer delivery failed"
        );
    }
}

fn first_id(delivered: &[(Arc<dyn Adapter>, String)]) -> String {
    delivered
        .iter()
        .map(|(_, id)| id)
        .find(|id| !id.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// tmux session name for a platform conversation.
fn tmux_name(adapter: &str, key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("tc_{adapter}_{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmux_name() {
        assert_eq!(tmux_name("telegram", "123"), "tc_telegram_123");
        assert_eq!(tmux_name("whatsapp", "+1 555"), "tc_whatsapp__1_555");
    }

    #[test]
    fn test_event_table() {
        let store = Arc::new(teleclaude_core::SledSessionStore::temporary().unwrap());
        let client = AdapterClient::new(store, "macbook");
        assert_eq!(
            client.event_names(),
            vec!["agent_output", "notification", "session_start", "stop", "thinking_mode"]
        );
    }
}
