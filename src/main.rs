//! livechat-hub: real-time presence and message routing for customer-service chat.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────────────┐
//!                        │                      LIVECHAT HUB                      │
//!   visitor browser      │  ┌──────────┐   ┌───────────┐   ┌──────────────────┐  │
//!   ─── /ws_visitor ─────┼─▶│ security │──▶│ handshake │──▶│ registry (actor) │  │
//!   agent console        │  │ blacklist│   │   gate    │   │ visitors/agents  │  │
//!   ─── /ws_kefu ────────┼─▶│ auth, rl │   └───────────┘   └────────▲─────────┘  │
//!                        │  └──────────┘                            │            │
//!                        │        socket read loops ──▶ router ─────┘            │
//!                        │                               │   │                   │
//!                        │                        store ◀┘   └─▶ socket writers  │
//!                        │                                                       │
//!                        │  sweeper (TTL eviction)   legacy TCP tracker          │
//!                        │  config + watcher   observability   lifecycle          │
//!                        └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use livechat_hub::config::watcher::{apply_updates, ConfigWatcher};
use livechat_hub::config::{self, load_config, HubConfig};
use livechat_hub::lifecycle::{self, signals};
use livechat_hub::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "livechat-hub", version, about = "Live chat presence and routing hub")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "HUB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let hub_config = match &args.config {
        Some(path) => load_config(path)?,
        None => HubConfig::default(),
    };

    logging::init_tracing(&hub_config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "livechat-hub starting");

    tracing::info!(
        bind_address = %hub_config.listener.bind_address,
        visitor_ttl_secs = hub_config.presence.visitor_ttl_secs,
        sweep_interval_secs = hub_config.presence.sweep_interval_secs,
        agents = hub_config.agents.len(),
        legacy_tcp = hub_config.legacy_tcp.enabled,
        "Configuration loaded"
    );
    if hub_config.agents.is_empty() {
        tracing::warn!("No agents configured; every agent connection will be refused");
    }

    if hub_config.observability.metrics_enabled {
        match hub_config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %hub_config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&hub_config.listener.bind_address).await?;
    let shared = config::shared(hub_config);
    let running = lifecycle::start(shared.clone(), listener).await?;
    let shutdown = running.shutdown_handle();

    // Keep the watcher alive for the life of the process.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(apply_updates(shared.clone(), updates, shutdown.subscribe()));
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    signals::shutdown_on_signal(shutdown).await;
    running.wait(Duration::from_secs(10)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
