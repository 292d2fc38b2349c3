// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quantforge Orchestrator - task reaper
//!
//! Connects to the configured execution backend and keeps it tidy:
//! - stops tasks that exceed the configured run-time limit
//! - deletes the resources of finished tasks after the retention period

use tracing::{info, warn};

use quantforge_orchestrator::config::Config;
use quantforge_orchestrator::reaper::Reaper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantforge_orchestrator=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        backend = ?config.backend,
        namespace = %config.namespace,
        product = %config.product,
        image = %config.workload.image,
        "Starting Quantforge Orchestrator"
    );

    let backend = quantforge_orchestrator::connect(&config).await?;
    info!(backend = backend.name(), "Backend ready");

    let reaper = Reaper::new(backend, config.reaper.clone());
    let shutdown = reaper.shutdown_handle();
    let reaper_task = tokio::spawn(async move {
        reaper.run().await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.notify_one();
    if let Err(e) = reaper_task.await {
        warn!(error = %e, "Reaper task ended abnormally");
    }

    info!("Quantforge Orchestrator stopped");
    Ok(())
}
