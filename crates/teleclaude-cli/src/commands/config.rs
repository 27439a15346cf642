//! Config inspection command.

use crate::ui;
use anyhow::Result;
use teleclaude_core::{Config, ConfigError, scrub_secrets};

/// Token fields redacted from `config show`.
const SECRET_FIELDS: &[&str] = &[
    "\"botToken\": \"",
    "\"accessToken\": \"",
    "\"verifyToken\": \"",
    "\"appSecret\": \"",
];

/// Config subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Check the configuration.
    Validate,
    /// Print the configuration file path.
    Path,
}

/// Run the config command against an already attempted load.
pub fn run_config(action: ConfigAction, loaded: Result<Config, ConfigError>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", Config::default_path().display());
            Ok(())
        }
        ConfigAction::Validate => {
            match loaded {
                Ok(config) => {
                    ui::success("Configuration is valid");
                    ui::kv("Path", &Config::default_path().display().to_string());
                    ui::kv("Computer", &config.computer_name());
                }
                Err(e) => {
                    ui::error(&format!("Invalid configuration: {e}"));
                    anyhow::bail!("configuration is invalid");
                }
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = loaded?;
            println!("{}", redacted(&config)?);
            Ok(())
        }
    }
}

fn redacted(config: &Config) -> Result<String> {
    let json = serde_json::to_string_pretty(config)?;
    Ok(scrub_secrets(&json, SECRET_FIELDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleclaude_core::config::TelegramConfig;

    #[test]
    fn test_show_redacts_tokens() {
        let config = Config {
            telegram: Some(TelegramConfig {
                bot_token: Some("123456:ABC-secret".to_string()),
                supergroup_id: Some(-100_123),
                ..TelegramConfig::default()
            }),
            ..Config::default()
        };

        let shown = redacted(&config).unwrap();
        assert!(!shown.contains("ABC-secret"));
        assert!(shown.contains("\"botToken\": \"[REDACTED]\""));
        assert!(shown.contains("-100123"));
    }
}
