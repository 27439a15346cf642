//! Run command - start every enabled adapter and route until Ctrl-C.

use crate::service::LoggingCommands;
use crate::ui;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use teleclaude_adapters::{
    Adapter, DiscordAdapter, RestAdapter, TelegramAdapter, TerminalAdapter, WhatsAppAdapter, rest,
};
use teleclaude_core::{Config, SessionStore, SledSessionStore};
use teleclaude_router::AdapterClient;
use tokio::net::TcpListener;

/// Adapters built from configuration, in registration order.
pub struct Adapters {
    /// Every enabled adapter.
    pub all: Vec<Arc<dyn Adapter>>,
    /// REST adapter, when enabled.
    pub rest: Option<Arc<RestAdapter>>,
    /// WhatsApp adapter, when enabled.
    pub whatsapp: Option<Arc<WhatsAppAdapter>>,
}

impl Adapters {
    /// Build every enabled adapter.
    ///
    /// # Errors
    ///
    /// Returns error if an enabled adapter is missing credentials.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut all: Vec<Arc<dyn Adapter>> = Vec::new();

        if let Some(tg) = config.telegram.as_ref().filter(|c| c.enabled) {
            all.push(Arc::new(TelegramAdapter::from_config(tg)?));
        }
        if let Some(dc) = config.discord.as_ref().filter(|c| c.enabled) {
            all.push(Arc::new(DiscordAdapter::from_config(dc)?));
        }

        let whatsapp = match config.whatsapp.as_ref().filter(|c| c.enabled) {
            Some(wa) => {
                let adapter = Arc::new(WhatsAppAdapter::from_config(wa)?);
                all.push(adapter.clone());
                Some(adapter)
            }
            None => None,
        };

        let rest = if config.rest.enabled {
            let adapter = Arc::new(RestAdapter::new(&config.rest));
            all.push(adapter.clone());
            Some(adapter)
        } else {
            None
        };

        if config.terminal.enabled {
            all.push(Arc::new(TerminalAdapter::new()));
        }

        Ok(Self {
            all,
            rest,
            whatsapp,
        })
    }

    /// HTTP routes served by the adapters, with the address to bind.
    fn http(&self, config: &Config) -> Option<(Router, String)> {
        let addr = format!("{}:{}", config.rest.bind, config.rest.port);
        let rest = self.rest.clone().map(rest::router);
        let whatsapp = self.whatsapp.clone().map(WhatsAppAdapter::routes);

        match (rest, whatsapp) {
            (Some(rest), Some(whatsapp)) => Some((rest.merge(whatsapp), addr)),
            (Some(router), None) | (None, Some(router)) => Some((router, addr)),
            (None, None) => None,
        }
    }
}

/// Open the session store configured for this computer.
///
/// # Errors
///
/// Returns error if the database cannot be opened.
pub fn open_store(config: &Config) -> Result<Arc<SledSessionStore>> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SledSessionStore::open(&path)
        .with_context(|| format!("opening session store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Run the daemon.
pub async fn run_daemon(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let adapters = Adapters::from_config(&config)?;
    let computer = config.computer_name();

    let mut client = AdapterClient::new(store.clone(), computer.clone())
        .with_download_dir(Config::state_dir().join("downloads"));
    for adapter in &adapters.all {
        client.register(adapter.clone());
    }
    let client = Arc::new(client);

    ui::header("Starting TeleClaude");
    ui::kv("Computer", &computer);
    ui::kv("Adapters", &client.registry().names().join(", "));

    let store: Arc<dyn SessionStore> = store;
    client.start(Arc::new(LoggingCommands::new(store))).await?;

    let server = match adapters.http(&config) {
        Some((router, addr)) => {
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            ui::kv("HTTP", &addr);
            tracing::info!(addr = %addr, "HTTP server listening");
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            }))
        }
        None => None,
    };

    ui::success("Routing sessions. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    if let Some(server) = server {
        server.abort();
    }
    client.stop().await;
    ui::info("Stopped");

    Ok(())
}
