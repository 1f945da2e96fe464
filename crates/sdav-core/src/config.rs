use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 200;
const DEFAULT_ECHO_WINDOW_MS: u64 = 2_000;
const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 100;
const DEFAULT_METRICS_LOG_MS: u64 = 30_000;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// The single shared credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "password".to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server configuration, usually read from `sdav.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (0 picks a free port).
    pub port: u16,
    /// Directory exposed over WebDAV.
    pub root: PathBuf,
    /// Shared credential for HTTP and WebSocket clients.
    pub credentials: Credentials,
    /// Restrict change notifications to these directories (empty = whole root).
    pub watch_paths: Vec<PathBuf>,
    /// Run the OS file watcher in addition to the WebDAV write hooks.
    pub watch_enabled: bool,
    /// Interval between WebSocket liveness probes.
    pub heartbeat_interval_ms: u64,
    /// Wait after a completed write before notifying.
    pub settle_delay_ms: u64,
    /// How long a WebDAV-originated change suppresses the watcher's echo.
    pub echo_window_ms: u64,
    /// Watcher events for one path within this window collapse into one.
    pub watch_debounce_ms: u64,
    /// Interval of the periodic metrics log line (0 disables it).
    pub metrics_log_interval_ms: u64,
    /// Per-observer outbound queue capacity.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("./uploads"),
            credentials: Credentials::default(),
            watch_paths: Vec::new(),
            watch_enabled: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            echo_window_ms: DEFAULT_ECHO_WINDOW_MS,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            metrics_log_interval_ms: DEFAULT_METRICS_LOG_MS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(Error::Config(
                "outbound_buffer must be greater than zero".to_string(),
            ));
        }
        if self.credentials.username.is_empty() {
            return Err(Error::Config("credentials.username is empty".to_string()));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// `None` when periodic metrics logging is disabled.
    pub fn metrics_log_interval(&self) -> Option<Duration> {
        (self.metrics_log_interval_ms > 0)
            .then(|| Duration::from_millis(self.metrics_log_interval_ms))
    }
}
