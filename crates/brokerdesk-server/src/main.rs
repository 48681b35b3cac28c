//! brokerdesk Server
//!
//! HTTP backend that holds one live MQTT broker session, keeps the
//! subscription and favourite ledgers in step with it, and records every
//! message the broker delivers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use brokerdesk_core::config::{database_path, load_config};
use brokerdesk_core::tracing_init::init_tracing;
use brokerdesk_server::api::{AppState, build_router};
use brokerdesk_server::link::MqttConnector;
use brokerdesk_server::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "brokerdesk-server")]
#[command(version, about = "brokerdesk server - MQTT broker dashboard backend")]
struct Args {
    /// Address to listen on. Overrides the config file.
    #[arg(long, env = "BROKERDESK_LISTEN_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long, env = "BROKERDESK_DATABASE_PATH")]
    db_path: Option<PathBuf>,

    /// Path to a JSON config file used instead of the global one.
    #[arg(long, env = "BROKERDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("brokerdesk_server=info", args.log_json)?;

    let config = load_config(args.config.as_deref())?;
    let addr = args.addr.unwrap_or(config.server.listen_addr);

    info!(version = env!("CARGO_PKG_VERSION"), addr = %addr, "Starting brokerdesk-server");

    let db_path = args
        .db_path
        .clone()
        .or_else(|| config.server.database_path.clone())
        .or_else(database_path)
        .context("Cannot determine a database path; pass --db-path")?;
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let connector = Arc::new(MqttConnector::new(config.mqtt.clone()));
    let state = AppState::new(db, connector, config);
    let grace = state.config.mqtt.disconnect_grace();
    let sessions = state.sessions.clone();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");

    tokio::select! {
        result = axum::serve(listener, build_router(state)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(session) = sessions.take().await {
        session.shutdown(grace).await;
    }

    info!("Server stopped");
    Ok(())
}
