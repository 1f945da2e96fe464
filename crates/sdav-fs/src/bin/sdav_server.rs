//! sdav-server: WebDAV file server with real-time change notifications.
//!
//! # Usage
//!
//! ```bash
//! # Serve ./uploads on port 3000 with the default credential
//! sdav-server
//!
//! # Custom root and credential, notifications limited to two directories
//! sdav-server --root /srv/files --username alice --password s3cret \
//!     --watch-path docs --watch-path shared
//!
//! # Everything from a file
//! sdav-server --config sdav.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use sdav_core::ServerConfig;
use std::path::PathBuf;
use std::process;

/// WebDAV file server with real-time WebSocket change notifications.
#[derive(Parser, Debug)]
#[command(name = "sdav-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on (default: 3000)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Directory to serve (default: ./uploads)
    #[arg(short, long, env = "UPLOAD_DIR", value_name = "DIR")]
    root: Option<PathBuf>,

    /// Shared username
    #[arg(long, env = "SDAV_USERNAME")]
    username: Option<String>,

    /// Shared password
    #[arg(long, env = "SDAV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Only notify about changes under this directory (repeatable)
    #[arg(long = "watch-path", env = "WATCH_PATHS", value_delimiter = ',', value_name = "DIR")]
    watch_paths: Vec<PathBuf>,

    /// Do not run the filesystem watcher; only WebDAV writes are notified
    #[arg(long)]
    no_watch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(username) = self.username {
            config.credentials.username = username;
        }
        if let Some(password) = self.password {
            config.credentials.password = password;
        }
        if !self.watch_paths.is_empty() {
            config.watch_paths = self.watch_paths;
        }
        if self.no_watch {
            config.watch_enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    };

    info!("Root directory: {}", config.root.display());
    if !config.watch_paths.is_empty() {
        info!("Watch paths: {:?}", config.watch_paths);
    }
    info!("Press Ctrl+C to stop the server");

    tokio::select! {
        result = sdav_fs::serve(config) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
