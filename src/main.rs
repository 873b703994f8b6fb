//! flagwired server binary: opens the SQLite store, wires the broadcaster
//! into the API router, and serves until interrupted.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpListener;

use flagwire::api::{self, AppState};
use flagwire::{Broadcaster, Config, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = Config::load();
    log::info!("starting flagwired on {} (db {})", cfg.addr, cfg.db_path);

    let store = SqliteStore::open(&cfg.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", cfg.db_path))?;

    if cfg.master_key.is_none() {
        log::warn!("FLAGWIRE_MASTER_KEY not set - auth disabled (dev mode)");
    }

    let broadcaster = Broadcaster::new();
    let state = AppState {
        store: Arc::new(store),
        broadcaster: Arc::clone(&broadcaster),
        master_key: cfg.master_key.clone(),
    };

    let app = api::router(state, cfg.cors_enabled);

    let listener = TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.addr))?;
    log::info!("listening on http://{}", cfg.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    broadcaster.close();
    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("shutting down...");
    }
}
