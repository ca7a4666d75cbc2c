//! Command line configuration for the `sweetspeak` client.

use std::path::PathBuf;
use std::time::Duration;

use sweetspeak_proto::message::Identity;
use sweetspeak_proto::retry::RetryPolicy;

/// Default server endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:9000/ws";

/// CLI arguments for the client.
#[derive(clap::Parser, Debug)]
#[command(version, about = "SweetSpeak terminal chat client")]
pub struct ClientCliArgs {
    /// Display name to introduce yourself as.
    pub name: String,

    /// Hex color code your name is shown in, without the `#`.
    #[arg(default_value = "4287f5")]
    pub color: String,

    /// WebSocket URL of the server.
    #[arg(short, long, env = "SWEETSPEAK_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    /// Request a chat with this user right after connecting.
    #[arg(long)]
    pub chat_with: Option<String>,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    /// Delay between connection attempts, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub retry_delay_ms: u64,

    /// Log file path (default: `<tmp>/sweetspeak-client-<name>.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SWEETSPEAK_LOG")]
    pub log_level: String,
}

impl ClientCliArgs {
    /// Fixed-delay reconnect policy from `--max-attempts` and `--retry-delay-ms`.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// A fresh identity for this process under the requested name and color.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(uuid::Uuid::now_v7().to_string(), &self.name, &self.color)
    }

    /// Where to write logs.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("sweetspeak-client-{}.log", self.name))
        })
    }
}
