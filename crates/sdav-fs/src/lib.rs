//! # sdav-fs
//!
//! WebDAV file server over a sandboxed directory, with real-time change
//! notifications over WebSocket.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sdav_core::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 0,
//!     root: "/srv/files".into(),
//!     ..ServerConfig::default()
//! };
//! let server = sdav_fs::serve_background(config).await?;
//!
//! // WebDAV: PUT/GET/DELETE/MKCOL/PROPFIND with Basic auth
//! println!("WebDAV at {}", server.url());
//! // Notifications: {"type":"subscribe","path":"/docs/**"}
//! println!("WebSocket at {}", server.ws_url());
//!
//! server.shutdown();
//! ```

pub mod body;
pub mod dav;
pub mod resource;
mod server;

pub use dav::{DavHandler, DavMethod, DavOutcome};
pub use server::{serve, serve_background, SdavServer, ServerError, ServerResult};
