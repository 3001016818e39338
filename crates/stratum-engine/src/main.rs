// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stratum Engine - Orchestrator Control Plane
//!
//! Runs the lifecycle engine standalone:
//! - Topology and instances loaded from the configured store
//! - Instances interrupted by the last shutdown moved to `Error`
//! - Task workers waiting for submitted operations

use std::sync::Arc;

use stratum_core::{MemoryPersistence, Persistence, SqlitePersistence};
use stratum_engine::blueprint::BlueprintRegistry;
use stratum_engine::config::Config;
use stratum_engine::provider::{MockProviderFactory, ProviderRegistry};
use stratum_engine::runtime::EngineRuntime;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratum_engine=info,stratum_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database = config.database_url.as_deref().unwrap_or("<memory>"),
        workers = config.workers,
        reserved_head = config.reserved_head,
        "Starting Stratum Engine"
    );

    let persistence: Arc<dyn Persistence> = match config.database_url.as_deref() {
        Some(url) if url.starts_with("sqlite:") => Arc::new(SqlitePersistence::connect(url).await?),
        Some(path) => Arc::new(SqlitePersistence::from_path(path).await?),
        None => {
            warn!("STRATUM_DATABASE_URL not set, state will not survive a restart");
            Arc::new(MemoryPersistence::new())
        }
    };

    // Only the in-memory back-end ships with the engine
    let mock = Arc::new(MockProviderFactory::new());
    let providers = ProviderRegistry::new()
        .with("mock", mock.clone())
        .with("kubernetes", mock);
    warn!(kinds = ?providers.kinds(), "Using mock providers");

    let runtime = EngineRuntime::builder()
        .persistence(persistence)
        .blueprints(BlueprintRegistry::new())
        .providers(providers)
        .config(&config)
        .build()?
        .start()
        .await?;

    info!("Stratum Engine ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Stratum Engine shut down");

    Ok(())
}
