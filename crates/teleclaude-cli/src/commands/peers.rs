//! Peers command - aggregated peer discovery across adapters.

use crate::commands::run::{Adapters, open_store};
use crate::ui;
use anyhow::Result;
use teleclaude_core::Config;
use teleclaude_router::AdapterClient;

/// Discover and print peers.
///
/// Adapters are built but not started, so only transports that can probe
/// without a running listener (REST peers, the local terminal) report.
pub async fn run_peers(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let adapters = Adapters::from_config(config)?;

    let mut client = AdapterClient::new(store, config.computer_name());
    for adapter in adapters.all {
        client.register(adapter);
    }

    ui::header("Peers");
    let peers = client.discover_peers().await;
    if peers.is_empty() {
        ui::info("No peers found");
        return Ok(());
    }

    ui::table_row(&[("NAME", 20), ("VIA", 10), ("STATUS", 0)]);
    for peer in &peers {
        let status = format!("{:?}", peer.status).to_lowercase();
        ui::table_row(&[
            (peer.name.as_str(), 20),
            (peer.adapter_type.as_str(), 10),
            (status.as_str(), 0),
        ]);
    }

    Ok(())
}
