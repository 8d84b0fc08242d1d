use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use avc1394::sim::SimTapeDeck;
use avc1394::tl::sim::SimBus;
use avc1394::tl::{Bus, CommandServer, ServerConfig};
use avc1394::{AvcUnit, NodeId};
use serde::Serialize;
use tracing::info;

/// Physical id of the simulated deck when `--node` is not given.
pub const DEFAULT_DECK_PHY: u8 = 1;

/// Server settings from an optional JSON file, then command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    retries: Option<u32>,
    split_timeout_ms: Option<u64>,
) -> Result<ServerConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(retries) = retries {
        config.max_retries = retries;
    }
    if let Some(ms) = split_timeout_ms {
        config.split_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

/// A command server over an in-memory bus with a tape deck at `phy`.
pub struct Session {
    pub bus: SimBus,
    pub server: CommandServer,
    pub unit: AvcUnit,
}

impl Session {
    pub fn open(config: ServerConfig, phy: u8, deck: SimTapeDeck) -> Result<Self> {
        let node = NodeId::local(phy);
        let bus = SimBus::new();
        anyhow::ensure!(
            node != bus.local_node_id(),
            "node {node} is the local controller"
        );
        bus.add_device(node, deck);
        info!(%node, retries = config.max_retries, "opening simulated bus");
        let server = CommandServer::spawn(Arc::new(bus.clone()), config);
        let unit = AvcUnit::new(server.handle(), node);
        Ok(Self { bus, server, unit })
    }

    pub async fn close(self) {
        info!(sent = self.bus.sent().len(), "closing simulated bus");
        self.server.shutdown().await;
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}
