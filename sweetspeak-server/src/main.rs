//! `SweetSpeak` server: pairs terminal chat clients and relays their text.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin sweetspeak-server
//!
//! # Run on a custom address
//! cargo run --bin sweetspeak-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! SWEETSPEAK_ADDR=127.0.0.1:8080 cargo run --bin sweetspeak-server
//! ```

use clap::Parser;
use sweetspeak_server::config::{ServerCliArgs, ServerConfig};
use sweetspeak_server::server;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting sweetspeak server");

    match server::start_server_with_config(&config).await {
        Ok(handle) => handle.wait().await,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
