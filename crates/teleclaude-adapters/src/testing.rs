//! Test fixtures.

use chrono::Utc;

use teleclaude_core::types::{AdapterMetadata, LifecycleStatus, Session, TerminalSize, UxState};

/// An active session owned by `origin`.
pub(crate) fn test_session(origin: &str) -> Session {
    Session {
        session_id: "1a2b3c4d-5e6f-4a8b-9c0d-112233445566".to_string(),
        computer_name: "macbook".to_string(),
        tmux_session_name: "tc_test".to_string(),
        origin_adapter: origin.to_string(),
        title: "Test session".to_string(),
        adapter_metadata: AdapterMetadata::default(),
        created_at: Utc::now(),
        last_activity: Utc::now(),
        terminal_size: TerminalSize::default(),
        working_directory: "/home/user/project".to_string(),
        description: None,
        initiated_by_ai: false,
        closed_at: None,
        lifecycle_status: LifecycleStatus::Active,
        active_agent: None,
        thinking_mode: None,
        native_session_id: None,
        ux: UxState::default(),
    }
}
