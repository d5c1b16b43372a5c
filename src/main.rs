//! Retro Trivia · question supply backend
//!
//! - Axum HTTP + WebSocket API over the question pool
//! - Fallback chain: cloud store, public trivia API, local cache, bundled set
//! - Preferences and cache persisted in one JSON file under the data dir
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   TRIVIA_CONFIG_PATH   : path to TOML config (pool, cache, remote sources, bundle)
//!   CLOUD_API_TOKEN      : enables the cloud source if present
//!   CLOUD_BASE_URL       : default "https://api.apple-cloudkit.com"
//!   OPEN_TRIVIA_BASE_URL : default "https://opentdb.com"
//!   TRIVIA_DATA_DIR      : where store.json lives (default platform data dir)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default), "compact", or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod store;
mod cache;
mod sources;
mod cloud;
mod opentdb;
mod bundled;
mod settings;
mod manager;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::load_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  telemetry::init_tracing();

  let cfg = load_config_from_env();
  info!(target: "trivia_backend", min = cfg.pool.min_size, target = cfg.pool.target_size, max = cfg.pool.max_size, "Pool limits");

  // Refuses to start on an empty bundle.
  let state = match AppState::new(&cfg) {
    Ok(s) => Arc::new(s),
    Err(e) => {
      error!(target: "trivia_backend", error = %format!("{e:#}"), "Startup failed");
      return Err(e);
    }
  };

  // Warm the pool without holding up the listener.
  let manager = state.manager.clone();
  tokio::spawn(async move { manager.load_questions().await });

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
  info!(target: "trivia_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "trivia_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "trivia_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
