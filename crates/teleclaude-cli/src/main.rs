//! TeleClaude CLI - route terminal AI sessions to chat platforms.

mod commands;
mod service;
mod ui;

use clap::{Parser, Subcommand};
use teleclaude_core::Config;
use teleclaude_core::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "teleclaude")]
#[command(about = "TeleClaude - terminal AI sessions on Telegram, Discord and WhatsApp")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all enabled adapters and route sessions until Ctrl-C
    Run,

    /// List sessions
    Sessions {
        /// Include closed sessions
        #[arg(long)]
        all: bool,
    },

    /// Show computers visible through the enabled adapters
    Peers,

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the configuration with tokens redacted
    Show,

    /// Validate the configuration
    Validate,

    /// Print the configuration file path
    Path,
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(false)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config errors are reported by the commands that need a config
    let config = Config::load_default();
    let (debug, format) = config
        .as_ref()
        .map(|c| (c.settings.debug, c.settings.log_format))
        .unwrap_or_default();
    init_logging(cli.verbose || debug, format);

    let Some(command) = cli.command else {
        ui::banner();
        ui::info("Run 'teleclaude run' to start routing, or 'teleclaude --help' for all commands.");
        return Ok(());
    };

    match command {
        Commands::Run => commands::run_daemon(config?).await?,
        Commands::Sessions { all } => commands::run_sessions(&config?, all).await?,
        Commands::Peers => commands::run_peers(&config?).await?,
        Commands::Config { action } => {
            let action = match action {
                Some(ConfigCommands::Validate) => commands::config::ConfigAction::Validate,
                Some(ConfigCommands::Path) => commands::config::ConfigAction::Path,
                Some(ConfigCommands::Show) | None => commands::config::ConfigAction::Show,
            };
            commands::run_config(action, config)?;
        }
    }

    Ok(())
}
