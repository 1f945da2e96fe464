//! # sdav-core
//!
//! Shared building blocks for the sdav file server.
//!
//! This crate provides:
//! - The path sandbox that maps request paths onto a fixed root directory
//! - The change event model consumed by the notification engine
//! - A small extension-based MIME table
//! - Server configuration (`sdav.toml`)
//! - The shared-credential validator used by both HTTP and WebSocket clients
//!
//! ## Example
//!
//! ```ignore
//! use sdav_core::{SandboxRoot, ServerConfig};
//!
//! let config = ServerConfig::load("sdav.toml")?;
//! let sandbox = SandboxRoot::new(&config.root)?;
//!
//! // Percent-encoded traversal is rejected after decoding.
//! assert!(sandbox.resolve_uri("/%2e%2e/etc/passwd").is_err());
//! let report = sandbox.resolve_uri("/docs/report.txt?download=1")?;
//! ```

mod auth;
mod config;
mod error;
mod event;
mod mime;
mod sandbox;

pub use auth::{encode_basic_auth, parse_basic_auth, CredentialValidator, StaticCredentials};
pub use config::{Credentials, ServerConfig};
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use mime::{guess_mime, BINARY_MIME};
pub use sandbox::{decode_request_path, normalize_path, SandboxRoot};
