//! Persistent session store.
//!
//! Sessions live in a sled tree as JSON records next to secondary index
//! entries, so "which session owns Discord thread 123?" is a prefix seek
//! rather than a scan.
//!
//! Key layout (single `sessions` tree):
//! - `session:{id}` -> session JSON
//! - `idx:meta:{adapter}:{field}:{value}:{id}` -> empty
//! - `idx:tmux:{computer}:{tmux_session}` -> id
//!
//! Pending deletions live in their own tree keyed `{session}:{type}:{message}`.
//!
//! Every write to the `sessions` tree is a sled transaction over the record,
//! its index entries and the tmux claim, so concurrent updates to different
//! fields never lose each other. The metadata blob itself is replaced whole:
//! callers that mutate one adapter's sub-record re-read the session first
//! and merge, and the last such writer wins.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::path::Path;
use thiserror::Error;

use crate::types::{
    AdapterMetadata, DeletionType, LifecycleStatus, PendingDeletion, Session, TerminalSize,
    UxState, short_id,
};

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A live session already uses this tmux session on this computer.
    #[error("Duplicate session: {computer}/{tmux_session} already exists")]
    DuplicateSession {
        /// Computer name.
        computer: String,
        /// tmux session name.
        tmux_session: String,
    },
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(error: TransactionError<StoreError>) -> Self {
        match error {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Self::Storage(e),
        }
    }
}

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

fn abort<T, E: Into<StoreError>>(error: E) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(error.into()))
}

/// Parameters for a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    /// Computer hosting the session.
    pub computer_name: String,
    /// tmux session name.
    pub tmux_session_name: String,
    /// Authoritative adapter.
    pub origin_adapter: String,
    /// Display title.
    pub title: String,
    /// Working directory.
    pub working_directory: String,
    /// Description.
    pub description: Option<String>,
    /// Started by an AI.
    pub initiated_by_ai: bool,
    /// Terminal size.
    pub terminal_size: TerminalSize,
    /// Agent to run.
    pub active_agent: Option<String>,
    /// Initial adapter metadata (e.g. the inbound chat's identifiers).
    pub adapter_metadata: AdapterMetadata,
}

/// Partial session update. Absent fields are left untouched.
///
/// Built from JSON with [`SessionUpdate::from_json`], unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionUpdate {
    /// New title.
    pub title: Option<String>,
    /// Replacement metadata blob.
    pub adapter_metadata: Option<AdapterMetadata>,
    /// Terminal size.
    pub terminal_size: Option<TerminalSize>,
    /// Working directory.
    pub working_directory: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Lifecycle status. `closed` stamps `closed_at`, `active` clears it.
    pub lifecycle_status: Option<LifecycleStatus>,
    /// Active agent.
    pub active_agent: Option<String>,
    /// Thinking mode.
    pub thinking_mode: Option<String>,
    /// Agent-native session ID.
    pub native_session_id: Option<String>,
    /// Last input adapter.
    pub last_input_adapter: Option<String>,
    /// Feedback timestamp.
    pub last_feedback_received: Option<chrono::DateTime<Utc>>,
    /// Last message forwarded to the agent.
    pub last_message_sent: Option<String>,
    /// Output timestamp.
    pub last_output_at: Option<chrono::DateTime<Utc>>,
    /// Transcript path.
    pub transcript_path: Option<String>,
}

impl SessionUpdate {
    /// Empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an update from a JSON object, ignoring unknown fields.
    ///
    /// # Errors
    ///
    /// Returns error if a known field has the wrong type.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Replace the metadata blob.
    #[must_use]
    pub fn with_metadata(mut self, metadata: AdapterMetadata) -> Self {
        self.adapter_metadata = Some(metadata);
        self
    }

    /// Set the lifecycle status.
    #[must_use]
    pub const fn with_status(mut self, status: LifecycleStatus) -> Self {
        self.lifecycle_status = Some(status);
        self
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this update to a session in memory.
    pub fn apply(self, session: &mut Session) {
        let now = Utc::now();

        if let Some(v) = self.title {
            session.title = v;
        }
        if let Some(v) = self.adapter_metadata {
            session.adapter_metadata = v;
        }
        if let Some(v) = self.terminal_size {
            session.terminal_size = v;
        }
        if let Some(v) = self.working_directory {
            session.working_directory = v;
        }
        if let Some(v) = self.description {
            session.description = Some(v);
        }
        if let Some(status) = self.lifecycle_status {
            session.lifecycle_status = status;
            match status {
                LifecycleStatus::Closed => {
                    session.closed_at.get_or_insert(now);
                }
                LifecycleStatus::Active => session.closed_at = None,
                LifecycleStatus::Closing => {}
            }
        }
        if let Some(v) = self.active_agent {
            session.active_agent = Some(v);
        }
        if let Some(v) = self.thinking_mode {
            session.thinking_mode = Some(v);
        }
        if let Some(v) = self.native_session_id {
            session.native_session_id = Some(v);
        }

        let ux: &mut UxState = &mut session.ux;
        if let Some(v) = self.last_input_adapter {
            ux.last_input_adapter = Some(v);
        }
        if let Some(v) = self.last_feedback_received {
            ux.last_feedback_received = Some(v);
        }
        if let Some(v) = self.last_message_sent {
            ux.last_message_sent = Some(v);
        }
        if let Some(v) = self.last_output_at {
            ux.last_output_at = Some(v);
        }
        if let Some(v) = self.transcript_path {
            ux.transcript_path = Some(v);
        }

        session.last_activity = now;
    }
}

/// Durable CRUD over sessions.
///
/// "Not found" is `None` or an empty list, never an error. I/O errors
/// propagate.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and persist a session.
    async fn create_session(&self, new: NewSession) -> Result<Session, StoreError>;

    /// Fetch a session.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Apply a partial update. A vanished session is logged and ignored.
    async fn update_session(&self, session_id: &str, update: SessionUpdate)
    -> Result<(), StoreError>;

    /// Physically delete a session. Administrative use only.
    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError>;

    /// List sessions ordered by creation time.
    async fn list_sessions(&self, include_closed: bool) -> Result<Vec<Session>, StoreError>;

    /// Sessions whose `adapter.field` equals `value`.
    async fn get_sessions_by_adapter_metadata(
        &self,
        adapter: &str,
        field: &str,
        value: &str,
        include_closed: bool,
    ) -> Result<Vec<Session>, StoreError>;

    /// Message IDs awaiting deletion.
    async fn get_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<Vec<String>, StoreError>;

    /// Full pending-deletion rows.
    async fn list_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<Vec<PendingDeletion>, StoreError>;

    /// Track a message for later deletion.
    async fn add_pending_deletion(&self, pending: PendingDeletion) -> Result<(), StoreError>;

    /// Drop all pending rows of one type.
    async fn clear_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<(), StoreError>;
}

/// Session store backed by sled.
pub struct SledSessionStore {
    db: sled::Db,
    sessions: sled::Tree,
    pending: sled::Tree,
}

impl SledSessionStore {
    /// Open or create a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_db(sled::open(path)?)
    }

    /// Open a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns error if sled fails to initialize.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::with_db(sled::Config::new().temporary(true).open()?)
    }

    /// Create a store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if trees cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        let sessions = db.open_tree("sessions")?;
        let pending = db.open_tree("pending_deletions")?;
        Ok(Self {
            db,
            sessions,
            pending,
        })
    }

    /// Flush pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns error if flush fails.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn meta_prefix(adapter: &str, field: &str, value: &str) -> String {
        format!("idx:meta:{adapter}:{field}:{value}:")
    }

    fn tmux_key(computer: &str, tmux_session: &str) -> String {
        format!("idx:tmux:{computer}:{tmux_session}")
    }

    fn pending_prefix(session_id: &str, deletion_type: DeletionType) -> String {
        format!("{session_id}:{}:", deletion_type.as_str())
    }

    fn meta_keys(session: &Session) -> Vec<String> {
        session
            .adapter_metadata
            .indexed_fields()
            .into_iter()
            .map(|(adapter, field, value)| {
                format!(
                    "{}{}",
                    Self::meta_prefix(adapter, &field, &value),
                    session.session_id
                )
            })
            .collect()
    }

    fn load(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        match self.sessions.get(Self::session_key(session_id))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn load_tx(tx: &TransactionalTree, session_id: &str) -> TxResult<Option<Session>> {
        match tx.get(Self::session_key(session_id).as_bytes())? {
            Some(data) => serde_json::from_slice(&data).map(Some).or_else(abort),
            None => Ok(None),
        }
    }

    /// Write a session and move its index entries from `old` to the new state.
    ///
    /// The tmux claim is only released by the session holding it. A live
    /// session whose name another session has claimed aborts with
    /// `DuplicateSession`.
    fn write_tx(tx: &TransactionalTree, session: &Session, old: Option<&Session>) -> TxResult<()> {
        let tmux_key = Self::tmux_key(&session.computer_name, &session.tmux_session_name);
        let owner = tx.get(tmux_key.as_bytes())?;
        let owned = owner.as_deref() == Some(session.session_id.as_bytes());

        if session.lifecycle_status == LifecycleStatus::Closed {
            if owned {
                tx.remove(tmux_key.as_bytes())?;
            }
        } else if owner.is_none() {
            tx.insert(tmux_key.as_bytes(), session.session_id.as_bytes())?;
        } else if !owned {
            return abort(StoreError::DuplicateSession {
                computer: session.computer_name.clone(),
                tmux_session: session.tmux_session_name.clone(),
            });
        }

        let new_keys = Self::meta_keys(session);
        if let Some(old) = old {
            for key in Self::meta_keys(old) {
                if !new_keys.contains(&key) {
                    tx.remove(key.as_bytes())?;
                }
            }
        }
        for key in &new_keys {
            tx.insert(key.as_bytes(), &[] as &[u8])?;
        }

        let data = serde_json::to_vec(session).or_else(abort)?;
        tx.insert(Self::session_key(&session.session_id).as_bytes(), data)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn create_session(&self, new: NewSession) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut adapter_metadata = new.adapter_metadata;
        adapter_metadata.ensure(&new.origin_adapter);

        let session = Session {
            session_id,
            computer_name: new.computer_name,
            tmux_session_name: new.tmux_session_name,
            origin_adapter: new.origin_adapter,
            title: new.title,
            adapter_metadata,
            created_at: now,
            last_activity: now,
            terminal_size: new.terminal_size,
            working_directory: new.working_directory,
            description: new.description,
            initiated_by_ai: new.initiated_by_ai,
            closed_at: None,
            lifecycle_status: LifecycleStatus::Active,
            active_agent: new.active_agent,
            thinking_mode: None,
            native_session_id: None,
            ux: UxState::default(),
        };

        // Claims the (computer, tmux) pair or aborts with DuplicateSession
        self.sessions
            .transaction(|tx| Self::write_tx(tx, &session, None))?;

        tracing::info!(
            session = %session.short_id(),
            origin = %session.origin_adapter,
            tmux = %session.tmux_session_name,
            "Session created"
        );
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.load(session_id)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<(), StoreError> {
        let updated = self.sessions.transaction(|tx| -> TxResult<bool> {
            let Some(old) = Self::load_tx(tx, session_id)? else {
                return Ok(false);
            };
            let mut session = old.clone();
            update.clone().apply(&mut session);
            Self::write_tx(tx, &session, Some(&old))?;
            Ok(true)
        })?;

        if !updated {
            tracing::warn!(
                session = %short_id(session_id),
                "Session vanished before update, assuming it was closed concurrently"
            );
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let deleted = self.sessions.transaction(|tx| -> TxResult<bool> {
            let Some(session) = Self::load_tx(tx, session_id)? else {
                return Ok(false);
            };
            for key in Self::meta_keys(&session) {
                tx.remove(key.as_bytes())?;
            }
            let tmux_key = Self::tmux_key(&session.computer_name, &session.tmux_session_name);
            if tx.get(tmux_key.as_bytes())?.as_deref() == Some(session.session_id.as_bytes()) {
                tx.remove(tmux_key.as_bytes())?;
            }
            tx.remove(Self::session_key(session_id).as_bytes())?;
            Ok(true)
        })?;
        if !deleted {
            return Ok(false);
        }

        for result in self.pending.scan_prefix(format!("{session_id}:").as_bytes()) {
            let (key, _) = result?;
            self.pending.remove(key)?;
        }

        tracing::info!(session = %short_id(session_id), "Session deleted");
        Ok(true)
    }

    async fn list_sessions(&self, include_closed: bool) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();

        for result in self.sessions.scan_prefix(b"session:") {
            let (_, value) = result?;
            let session: Session = serde_json::from_slice(&value)?;
            if include_closed || !session.is_closed() {
                sessions.push(session);
            }
        }

        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn get_sessions_by_adapter_metadata(
        &self,
        adapter: &str,
        field: &str,
        value: &str,
        include_closed: bool,
    ) -> Result<Vec<Session>, StoreError> {
        let prefix = Self::meta_prefix(adapter, field, value);
        let mut sessions = Vec::new();

        for result in self.sessions.scan_prefix(prefix.as_bytes()) {
            let (key, _) = result?;
            let Some(session_id) = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.strip_prefix(&prefix))
            else {
                continue;
            };

            let Some(session) = self.load(session_id)? else {
                continue;
            };
            if session.adapter_metadata.field(adapter, field).as_deref() != Some(value) {
                continue;
            }
            if include_closed || !session.is_closed() {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    async fn get_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_pending_deletions(session_id, deletion_type)
            .await?
            .into_iter()
            .map(|p| p.message_id)
            .collect())
    }

    async fn list_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<Vec<PendingDeletion>, StoreError> {
        let prefix = Self::pending_prefix(session_id, deletion_type);
        let mut rows = Vec::new();

        for result in self.pending.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result?;
            rows.push(serde_json::from_slice::<PendingDeletion>(&value)?);
        }

        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn add_pending_deletion(&self, pending: PendingDeletion) -> Result<(), StoreError> {
        let key = format!(
            "{}{}",
            Self::pending_prefix(&pending.session_id, pending.deletion_type),
            pending.message_id
        );
        self.pending.insert(key.as_bytes(), serde_json::to_vec(&pending)?)?;
        Ok(())
    }

    async fn clear_pending_deletions(
        &self,
        session_id: &str,
        deletion_type: DeletionType,
    ) -> Result<(), StoreError> {
        let prefix = Self::pending_prefix(session_id, deletion_type);
        let mut batch = sled::Batch::default();
        for result in self.pending.scan_prefix(prefix.as_bytes()) {
            let (key, _) = result?;
            batch.remove(key);
        }
        self.pending.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_session(tmux: &str, origin: &str) -> NewSession {
        NewSession {
            computer_name: "macbook".to_string(),
            tmux_session_name: tmux.to_string(),
            origin_adapter: origin.to_string(),
            title: "Test session".to_string(),
            working_directory: "/home/user/project".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SledSessionStore::temporary().unwrap();
        let session = store
            .create_session(new_session("tc_1", "telegram"))
            .await
            .unwrap();

        assert_eq!(session.lifecycle_status, LifecycleStatus::Active);
        assert!(session.adapter_metadata.telegram.is_some());

        let loaded = store.get_session(&session.session_id).await.unwrap();
        assert_eq!(loaded, Some(session));
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_tmux_session_rejected() {
        let store = SledSessionStore::temporary().unwrap();
        store
            .create_session(new_session("tc_dup", "telegram"))
            .await
            .unwrap();

        let result = store.create_session(new_session("tc_dup", "discord")).await;
        assert!(matches!(result, Err(StoreError::DuplicateSession { .. })));
    }

    #[tokio::test]
    async fn test_tmux_name_reusable_after_close() {
        let store = SledSessionStore::temporary().unwrap();
        let session = store
            .create_session(new_session("tc_reuse", "telegram"))
            .await
            .unwrap();

        store
            .update_session(
                &session.session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Closed),
            )
            .await
            .unwrap();

        let closed = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert!(closed.closed_at.is_some());
        assert!(store.create_session(new_session("tc_reuse", "telegram")).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_session_cannot_release_or_steal_successor_claim() {
        let store = SledSessionStore::temporary().unwrap();
        let first = store
            .create_session(new_session("tc_x", "telegram"))
            .await
            .unwrap();
        store
            .update_session(
                &first.session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Closed),
            )
            .await
            .unwrap();
        let second = store
            .create_session(new_session("tc_x", "telegram"))
            .await
            .unwrap();

        // A trailing event for the closed session leaves the live claim alone
        store
            .update_session(&first.session_id, SessionUpdate::new().with_title("late output"))
            .await
            .unwrap();
        let result = store.create_session(new_session("tc_x", "discord")).await;
        assert!(matches!(result, Err(StoreError::DuplicateSession { .. })));

        // Reactivating onto a name another session holds is refused
        let result = store
            .update_session(
                &first.session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Active),
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateSession { .. })));

        let first = store.get_session(&first.session_id).await.unwrap().unwrap();
        assert_eq!(first.lifecycle_status, LifecycleStatus::Closed);
        assert_eq!(first.title, "late output");
        let second = store.get_session(&second.session_id).await.unwrap().unwrap();
        assert_eq!(second.lifecycle_status, LifecycleStatus::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_unrelated_fields() {
        let store = Arc::new(SledSessionStore::temporary().unwrap());
        let session_id = store
            .create_session(new_session("tc_race", "telegram"))
            .await
            .unwrap()
            .session_id;

        let titles = {
            let store = Arc::clone(&store);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    let title = format!("a{i}");
                    store
                        .update_session(&session_id, SessionUpdate::new().with_title(title.clone()))
                        .await
                        .unwrap();
                    let stored = store.get_session(&session_id).await.unwrap().unwrap();
                    assert_eq!(stored.title, title);
                }
            })
        };
        let modes = {
            let store = Arc::clone(&store);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    let update = SessionUpdate {
                        thinking_mode: Some(format!("m{i}")),
                        ..SessionUpdate::default()
                    };
                    store.update_session(&session_id, update).await.unwrap();
                }
            })
        };
        let topics = {
            let store = Arc::clone(&store);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                for topic in 0..200 {
                    let mut metadata = AdapterMetadata::default();
                    metadata.telegram_mut().topic_id = Some(topic);
                    store
                        .update_session(&session_id, SessionUpdate::new().with_metadata(metadata))
                        .await
                        .unwrap();
                }
            })
        };
        titles.await.unwrap();
        modes.await.unwrap();
        topics.await.unwrap();

        let stored = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.title, "a499");
        assert_eq!(stored.thinking_mode.as_deref(), Some("m499"));
        assert_eq!(stored.adapter_metadata.telegram.unwrap().topic_id, Some(199));

        // No index entries left behind for earlier topics
        let indexed = store
            .sessions
            .scan_prefix(b"idx:meta:telegram:topic_id:")
            .count();
        assert_eq!(indexed, 1);
    }

    #[tokio::test]
    async fn test_metadata_lookup_follows_updates() {
        let store = SledSessionStore::temporary().unwrap();
        let session = store
            .create_session(new_session("tc_2", "discord"))
            .await
            .unwrap();

        let mut meta = session.adapter_metadata.clone();
        meta.discord_mut().thread_id = Some("12345".to_string());
        store
            .update_session(&session.session_id, SessionUpdate::new().with_metadata(meta.clone()))
            .await
            .unwrap();

        let found = store
            .get_sessions_by_adapter_metadata("discord", "thread_id", "12345", false)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, session.session_id);

        // Moving the thread drops the old index entry
        meta.discord_mut().thread_id = Some("67890".to_string());
        store
            .update_session(&session.session_id, SessionUpdate::new().with_metadata(meta))
            .await
            .unwrap();

        assert!(
            store
                .get_sessions_by_adapter_metadata("discord", "thread_id", "12345", false)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            store
                .get_sessions_by_adapter_metadata("discord", "thread_id", "67890", false)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_metadata_lookup_excludes_closed() {
        let store = SledSessionStore::temporary().unwrap();
        let mut new = new_session("tc_3", "telegram");
        new.adapter_metadata.telegram_mut().topic_id = Some(42);
        let session = store.create_session(new).await.unwrap();

        store
            .update_session(
                &session.session_id,
                SessionUpdate::new().with_status(LifecycleStatus::Closed),
            )
            .await
            .unwrap();

        let open = store
            .get_sessions_by_adapter_metadata("telegram", "topic_id", "42", false)
            .await
            .unwrap();
        let all = store
            .get_sessions_by_adapter_metadata("telegram", "topic_id", "42", true)
            .await
            .unwrap();
        assert!(open.is_empty());
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_update_vanished_session_is_not_an_error() {
        let store = SledSessionStore::temporary().unwrap();
        let result = store
            .update_session("gone", SessionUpdate::new().with_title("x"))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_update_from_json_ignores_unknown_fields() {
        let update = SessionUpdate::from_json(serde_json::json!({
            "title": "Renamed",
            "thinking_mode": "slow",
            "no_such_field": 12,
        }))
        .unwrap();

        assert_eq!(update.title.as_deref(), Some("Renamed"));
        assert_eq!(update.thinking_mode.as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn test_pending_deletions() {
        let store = SledSessionStore::temporary().unwrap();
        store
            .add_pending_deletion(PendingDeletion::new("s1", "100", DeletionType::Feedback, "telegram"))
            .await
            .unwrap();
        store
            .add_pending_deletion(PendingDeletion::new("s1", "101", DeletionType::Feedback, "telegram"))
            .await
            .unwrap();
        store
            .add_pending_deletion(PendingDeletion::new("s1", "7", DeletionType::UserInput, "telegram"))
            .await
            .unwrap();

        let mut feedback = store
            .get_pending_deletions("s1", DeletionType::Feedback)
            .await
            .unwrap();
        feedback.sort();
        assert_eq!(feedback, vec!["100".to_string(), "101".to_string()]);

        store
            .clear_pending_deletions("s1", DeletionType::Feedback)
            .await
            .unwrap();
        assert!(
            store
                .get_pending_deletions("s1", DeletionType::Feedback)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            store
                .get_pending_deletions("s1", DeletionType::UserInput)
                .await
                .unwrap(),
            vec!["7".to_string()]
        );
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let session_id = {
            let store = SledSessionStore::open(&temp.path().join("db")).unwrap();
            let session = store
                .create_session(new_session("tc_persist", "whatsapp"))
                .await
                .unwrap();
            store.flush().unwrap();
            session.session_id
        };

        let store = SledSessionStore::open(&temp.path().join("db")).unwrap();
        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.origin_adapter, "whatsapp");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let store = SledSessionStore::temporary().unwrap();
        let session = store
            .create_session(new_session("tc_del", "telegram"))
            .await
            .unwrap();

        assert!(store.delete_session(&session.session_id).await.unwrap());
        assert!(!store.delete_session(&session.session_id).await.unwrap());
        assert!(store.list_sessions(true).await.unwrap().is_empty());
    }
}
