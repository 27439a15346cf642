//! CLI command implementations.

pub mod config;
pub mod peers;
pub mod run;
pub mod sessions;

pub use config::run_config;
pub use peers::run_peers;
pub use run::run_daemon;
pub use sessions::run_sessions;
