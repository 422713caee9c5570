// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node entry point.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pinroute_core::config::Config;
use pinroute_core::migrations;
use pinroute_core::registry::{LocationRegistry, MemoryRegistry, PostgresRegistry};
use pinroute_core::sweeper::{SweepConfig, SweepWorker};

use pinroute_server::forwarder::Forwarder;
use pinroute_server::http;
use pinroute_server::state::AppState;
use pinroute_server::store::SessionStore;
use pinroute_server::strategy::{DEFAULT_STRATEGY, FanoutStrategy, RouteStrategy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pinroute=info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let node = config.node_address();
    info!(node = %node, "Starting pinroute node");

    let registry: Arc<dyn LocationRegistry> = match &config.registry_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to registry database")?;
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .context("Registry database health check failed")?;
            migrations::run_postgres(&pool)
                .await
                .context("Failed to run registry migrations")?;
            info!("Using PostgreSQL location registry");
            Arc::new(PostgresRegistry::new(pool))
        }
        None => {
            warn!("No registry URL configured, using in-memory registry (single-node only)");
            Arc::new(MemoryRegistry::new())
        }
    };

    let fanout: Arc<dyn RouteStrategy> = Arc::new(FanoutStrategy);
    let strategies: HashMap<&'static str, Arc<dyn RouteStrategy>> = HashMap::from([
        (DEFAULT_STRATEGY, fanout.clone()),
        ("session-close", fanout),
    ]);

    let state = AppState::new(
        node,
        registry.clone(),
        Arc::new(SessionStore::new()),
        Forwarder::new(config.forward_timeout),
        strategies,
        config.lease,
        config.registry_timeout,
    );

    let sweeper = SweepWorker::new(
        registry,
        SweepConfig {
            interval: config.sweep_interval,
        },
    );
    let sweeper_shutdown = sweeper.shutdown_handle();
    let sweeper_task = tokio::spawn(async move { sweeper.run().await });

    let app = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    sweeper_shutdown.notify_one();
    sweeper_task.await.ok();
    info!("Node stopped");

    Ok(())
}
