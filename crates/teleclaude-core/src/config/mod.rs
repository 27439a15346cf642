//! Configuration loading and validation.
//!
//! Config location: `~/.teleclaude/teleclaude.json` (JSON5).
//! Adapters only consume the resolved values; they never read this file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::secrets::ApiKey;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// This computer.
    #[serde(default)]
    pub computer: ComputerConfig,

    /// Session database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Telegram adapter.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Discord adapter.
    #[serde(default)]
    pub discord: Option<DiscordConfig>,

    /// WhatsApp adapter.
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,

    /// REST adapter.
    #[serde(default)]
    pub rest: RestConfig,

    /// Terminal adapter.
    #[serde(default)]
    pub terminal: TerminalConfig,

    /// Agents that may be started.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("teleclaude.json")
    }

    /// Get the state directory.
    ///
    /// Uses `TELECLAUDE_STATE_DIR` env var if set, otherwise `~/.teleclaude`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TELECLAUDE_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".teleclaude")
        } else {
            PathBuf::from(".teleclaude")
        }
    }

    /// Resolved session database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("sessions.db"))
    }

    /// Resolved computer name (config, then hostname, then "localhost").
    #[must_use]
    pub fn computer_name(&self) -> String {
        self.computer
            .name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Fill tokens from the environment where the file leaves them empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            let tg = self.telegram.get_or_insert_with(TelegramConfig::default);
            if tg.bot_token.is_none() {
                tg.bot_token = Some(token);
            }
        }
        if let Ok(token) = std::env::var("DISCORD_BOT_TOKEN") {
            let dc = self.discord.get_or_insert_with(DiscordConfig::default);
            if dc.bot_token.is_none() {
                dc.bot_token = Some(token);
            }
        }
        if let Ok(token) = std::env::var("WHATSAPP_ACCESS_TOKEN") {
            let wa = self.whatsapp.get_or_insert_with(WhatsAppConfig::default);
            if wa.access_token.is_none() {
                wa.access_token = Some(token);
            }
        }
        if let Ok(secret) = std::env::var("WHATSAPP_APP_SECRET") {
            let wa = self.whatsapp.get_or_insert_with(WhatsAppConfig::default);
            if wa.app_secret.is_none() {
                wa.app_secret = Some(secret);
            }
        }
        self
    }

    /// Validate the configuration.
    ///
    /// An enabled adapter without its credentials is a startup failure.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` or `Validation` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tg) = self.telegram.as_ref().filter(|c| c.enabled) {
            if tg.bot_token.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingField("telegram.botToken".to_string()));
            }
            if tg.supergroup_id.is_none() {
                return Err(ConfigError::MissingField(
                    "telegram.supergroupId".to_string(),
                ));
            }
        }

        if let Some(dc) = self.discord.as_ref().filter(|c| c.enabled) {
            if dc.bot_token.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingField("discord.botToken".to_string()));
            }
            if dc.default_forum_id.is_none() && dc.forums.is_empty() {
                return Err(ConfigError::MissingField(
                    "discord.defaultForumId".to_string(),
                ));
            }
        }

        if let Some(wa) = self.whatsapp.as_ref().filter(|c| c.enabled) {
            if wa.access_token.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingField(
                    "whatsapp.accessToken".to_string(),
                ));
            }
            if wa.phone_number_id.is_empty() {
                return Err(ConfigError::MissingField(
                    "whatsapp.phoneNumberId".to_string(),
                ));
            }
            // Unsigned webhook deliveries are rejected, so inbound needs it
            if wa.app_secret.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingField("whatsapp.appSecret".to_string()));
            }
        }

        if self.rest.enabled && self.rest.port == 0 {
            return Err(ConfigError::Validation("REST port cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// This computer's identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerConfig {
    /// Name shown to peers.
    #[serde(default)]
    pub name: Option<String>,
    /// Role advertised to peers.
    #[serde(default)]
    pub role: Option<String>,
}

/// Session database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Path override.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Telegram adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Enable the adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bot token.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Forum supergroup holding one topic per session.
    #[serde(default)]
    pub supergroup_id: Option<i64>,

    /// Long-poll timeout in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            supergroup_id: None,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl TelegramConfig {
    /// Bot token as a secret.
    #[must_use]
    pub fn token(&self) -> Option<ApiKey> {
        self.bot_token.clone().map(ApiKey::new)
    }
}

/// Discord adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Enable the adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bot token.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Guild holding the forums.
    #[serde(default)]
    pub guild_id: Option<String>,

    /// Owner user ID recorded on new sessions.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Forum used when no routing rule matches.
    #[serde(default)]
    pub default_forum_id: Option<String>,

    /// Trusted-directory-to-forum routing table.
    #[serde(default)]
    pub forums: Vec<ForumRouteConfig>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            guild_id: None,
            user_id: None,
            default_forum_id: None,
            forums: Vec::new(),
        }
    }
}

impl DiscordConfig {
    /// Bot token as a secret.
    #[must_use]
    pub fn token(&self) -> Option<ApiKey> {
        self.bot_token.clone().map(ApiKey::new)
    }
}

/// One Discord forum routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumRouteConfig {
    /// Forum channel ID.
    pub forum_id: String,
    /// Working-directory prefix this forum serves.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Session role ("human" or "ai").
    #[serde(default)]
    pub role: Option<String>,
    /// Priority (higher = first).
    #[serde(default)]
    pub priority: i32,
}

/// WhatsApp adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Enable the adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cloud API access token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Business phone number ID.
    #[serde(default)]
    pub phone_number_id: String,

    /// Template used outside the customer messaging window.
    #[serde(default = "default_template_name")]
    pub template_name: String,

    /// Template language code.
    #[serde(default = "default_template_language")]
    pub template_language: String,

    /// Token echoed back during webhook verification.
    #[serde(default)]
    pub verify_token: Option<String>,

    /// App secret that signs webhook deliveries (`X-Hub-Signature-256`).
    #[serde(default)]
    pub app_secret: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_token: None,
            phone_number_id: String::new(),
            template_name: default_template_name(),
            template_language: default_template_language(),
            verify_token: None,
            app_secret: None,
        }
    }
}

impl WhatsAppConfig {
    /// Access token as a secret.
    #[must_use]
    pub fn token(&self) -> Option<ApiKey> {
        self.access_token.clone().map(ApiKey::new)
    }

    /// Webhook signing secret.
    #[must_use]
    pub fn secret(&self) -> Option<ApiKey> {
        self.app_secret.clone().map(ApiKey::new)
    }
}

/// REST adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestConfig {
    /// Enable the adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Peer base URLs probed during discovery.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Per-peer discovery timeout in milliseconds.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
            peers: Vec::new(),
            discovery_timeout_ms: default_discovery_timeout(),
        }
    }
}

/// Terminal adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConfig {
    /// Enable the adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Enabled agents.
    #[serde(default = "default_agents")]
    pub enabled: Vec<String>,

    /// Agent used when none is specified.
    #[serde(default = "default_agent")]
    pub default: String,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: default_agents(),
            default: default_agent(),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

const fn default_true() -> bool {
    true
}

const fn default_poll_timeout() -> u64 {
    30
}

const fn default_port() -> u16 {
    6666
}

const fn default_discovery_timeout() -> u64 {
    2000
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_template_name() -> String {
    "session_update".to_string()
}

fn default_template_language() -> String {
    "en_US".to_string()
}

fn default_agents() -> Vec<String> {
    vec!["claude".to_string(), "gemini".to_string(), "codex".to_string()]
}

fn default_agent() -> String {
    "claude".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rest.port, 6666);
        assert!(config.telegram.is_none());
        assert_eq!(config.agents.default, "claude");
    }

    #[test]
    fn test_json5_parsing() {
        let json5_content = r#"{
            // comments are allowed
            computer: { name: "macbook" },
            telegram: {
                botToken: "123:abc",
                supergroupId: -100123,
            },
            discord: {
                botToken: "xyz",
                defaultForumId: "42",
                forums: [
                    { forumId: "77", pathPrefix: "/work", priority: 10 },
                ],
            },
        }"#;

        let config: Config = json5::from_str(json5_content).unwrap();
        assert_eq!(config.computer_name(), "macbook");
        assert_eq!(config.telegram.as_ref().unwrap().supergroup_id, Some(-100_123));
        assert_eq!(config.discord.as_ref().unwrap().forums.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let config = Config {
            telegram: Some(TelegramConfig {
                supergroup_id: Some(-1),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "telegram.botToken"));
    }

    #[test]
    fn test_whatsapp_requires_app_secret() {
        let mut wa = WhatsAppConfig {
            access_token: Some("EAAG".to_string()),
            phone_number_id: "1055".to_string(),
            ..Default::default()
        };
        let config = Config {
            whatsapp: Some(wa.clone()),
            ..Default::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "whatsapp.appSecret"));

        wa.app_secret = Some("app-secret".to_string());
        let config = Config {
            whatsapp: Some(wa),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_adapter_skips_validation() {
        let config = Config {
            whatsapp: Some(WhatsAppConfig {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("teleclaude.json");

        let config = Config {
            computer: ComputerConfig {
                name: Some("workstation".to_string()),
                role: None,
            },
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.computer.name.as_deref(), Some("workstation"));
    }

    #[test]
    fn test_state_dir() {
        let dir = Config::state_dir();
        assert!(dir.to_str().unwrap().contains("teleclaude"));
    }
}
