//! identd: a minimal RFC 1413 identification protocol server
//!
//! Every well-formed query (`<server-port> , <client-port>`) is answered
//! with the same operator-configured identity. Without an identity the
//! server answers NO-USER; malformed queries get UNKNOWN-ERROR.
//!
//! Features:
//! - One request/response cycle per connection
//! - Bounded wait for the query line (10 seconds by default)
//! - Optional cap on concurrent connections
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod server;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
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
        listen = %config.listen,
        timeout_secs = config.timeout.as_secs(),
        workers = ?config.workers,
        max_connections = ?config.max_connections,
        "Starting {} {}",
        NAME,
        VERSION
    );

    if config.identity.is_empty() {
        info!("No response specified");
    } else {
        info!(identity = %config.identity, "Responding with configured identity");
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let server = Server::bind(&config).await?;
        server.run().await
    })
}
