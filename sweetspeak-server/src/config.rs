//! Configuration for the `SweetSpeak` server.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/sweetspeak-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerSection,
}

/// `[server]` section. Durations are whole seconds or milliseconds as named.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    handshake_timeout_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    write_timeout_secs: Option<u64>,
    queue_capacity: Option<usize>,
    max_session_log: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "SweetSpeak chat pairing server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "SWEETSPEAK_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/sweetspeak-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds a new connection has to introduce itself.
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,

    /// Milliseconds between sweeps of disconnected clients.
    #[arg(long)]
    pub sweep_interval_ms: Option<u64>,

    /// Seconds a forwarded write may take before it is abandoned.
    #[arg(long)]
    pub write_timeout_secs: Option<u64>,

    /// Capacity of the shared inbound queue.
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SWEETSPEAK_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0:9000`).
    pub bind_addr: String,
    /// How long a new connection may take to send its Introduction.
    pub handshake_timeout: Duration,
    /// Interval of the disconnected-client sweep.
    pub sweep_interval: Duration,
    /// Upper bound on one forwarded write.
    pub write_timeout: Duration,
    /// Capacity of the shared inbound queue; producers wait when it is full.
    pub queue_capacity: usize,
    /// Messages kept per session before the oldest are dropped.
    pub max_session_log: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            handshake_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            queue_capacity: 1000,
            max_session_log: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` path must exist. Without one, the default path
    /// is tried and a missing file counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file cannot be read or parsed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Configuration for in-process tests: loopback address, OS-assigned port.
    #[must_use]
    pub fn local() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();
        let section = &file.server;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| section.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            handshake_timeout: cli
                .handshake_timeout_secs
                .or(section.handshake_timeout_secs)
                .map_or(defaults.handshake_timeout, Duration::from_secs),
            sweep_interval: cli
                .sweep_interval_ms
                .or(section.sweep_interval_ms)
                .map_or(defaults.sweep_interval, Duration::from_millis),
            write_timeout: cli
                .write_timeout_secs
                .or(section.write_timeout_secs)
                .map_or(defaults.write_timeout, Duration::from_secs),
            queue_capacity: cli
                .queue_capacity
                .or(section.queue_capacity)
                .unwrap_or(defaults.queue_capacity),
            max_session_log: section.max_session_log.unwrap_or(defaults.max_session_log),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ServerConfigFile::default());
    };
    let path = config_dir.join("sweetspeak-server").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
