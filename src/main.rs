//! status-responder: A server-list status responder
//!
//! Answers the handshake of game clients pinging the server list:
//! - Status requests get a configurable status document and a pong
//! - Login attempts get a disconnect message
//!
//! Features:
//! - Online player count optionally reflected from another server
//! - Configuration via CLI arguments, environment variables or TOML file

mod config;
mod connection;
mod protocol;
mod reflector;
mod server;
mod status;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        protocol_version = config.protocol_version,
        protocol_name = %config.protocol_name,
        max_players = config.max_players,
        reflected_server = ?config.reflected_server.as_ref().map(ToString::to_string),
        "Starting status responder"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async { Server::new(config).run().await })
}
