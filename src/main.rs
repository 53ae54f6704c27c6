//! edge-echo server entry point.

use edge_echo::config::Config;
use edge_echo::runtime;
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
        wait_timeout = ?config.wait_timeout,
        nodelay = config.nodelay,
        "Starting edge-echo server"
    );

    let stats = runtime::run(&config)?;

    info!(
        accepted = stats.accepted,
        peer_closed = stats.peer_closed,
        errored = stats.errored,
        stale_events = stats.stale_events,
        "Server stopped"
    );
    Ok(())
}
