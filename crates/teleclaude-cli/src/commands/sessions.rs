//! Sessions command - list sessions from the store.

use crate::commands::run::open_store;
use crate::ui;
use anyhow::Result;
use teleclaude_core::{Config, SessionStore};

/// List sessions, optionally including closed ones.
pub async fn run_sessions(config: &Config, all: bool) -> Result<()> {
    let store = open_store(config)?;
    let sessions = store.list_sessions(all).await?;

    ui::header("Sessions");
    if sessions.is_empty() {
        ui::info("No sessions");
        return Ok(());
    }

    ui::table_row(&[("ID", 10), ("STATUS", 9), ("ORIGIN", 10), ("CREATED", 18), ("TITLE", 0)]);
    for session in &sessions {
        let created = session.created_at.format("%Y-%m-%d %H:%M").to_string();
        ui::table_row(&[
            (session.short_id(), 10),
            (session.lifecycle_status.as_str(), 9),
            (session.origin_adapter.as_str(), 10),
            (created.as_str(), 18),
            (session.title.as_str(), 0),
        ]);
    }
    println!();
    ui::info(&format!("{} session(s)", sessions.len()));

    Ok(())
}
