//! Tycoon multiplayer game server.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod protocol;
mod registry;
mod scheduler;
mod server;
mod store;

use config::ServerConfig;
use engine::Engine;
use registry::Registry;
use scheduler::{RuleBasedAdvisor, Scheduler, SchedulerConfig};
use server::{Hub, ServerState};
use store::{FileStore, GameStore, Persister};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting Tycoon server...");

    let store: Arc<dyn GameStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let catalog = Arc::new(store.load_catalog()?);

    let registry = Arc::new(Registry::new(catalog));
    match store.load_active() {
        Ok(games) => info!("Restored {} games from {}", registry.restore(games), config.data_dir.display()),
        Err(e) => warn!("Could not restore games: {}", e),
    }

    let (persister, _persist_worker) = Persister::spawn(Arc::clone(&store));
    let hub = Arc::new(Hub::new());
    let (bot_tx, bot_rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Arc::new(Engine::new(registry, persister, hub.clone(), bot_tx));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&engine),
        Arc::new(RuleBasedAdvisor),
        SchedulerConfig {
            fast_delay: config.bot_fast_delay,
            slow_delay: config.bot_slow_delay,
            advisor_retries: config.advisor_retries,
        },
    ));
    scheduler.spawn(bot_rx);
    engine::spawn_auction_sweep(Arc::clone(&engine), config.auction_sweep);
    engine.wake_all().await;

    let state = Arc::new(ServerState::new(engine, hub));

    server::run_server(config.addr, state).await
}
