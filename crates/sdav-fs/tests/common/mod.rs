//! Shared harness: a background server on a temp root plus HTTP and
//! WebSocket clients.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use sdav_core::{encode_basic_auth, ServerConfig};
use sdav_fs::{serve_background, SdavServer};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "password";

/// How long to wait for a message that should arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding a message will not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

pub struct TestServer {
    pub server: SdavServer,
    pub client: reqwest::Client,
    pub root: PathBuf,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Server with the filesystem watcher running on the whole root.
    pub async fn watching() -> Self {
        Self::with_config(|config| config.watch_enabled = true).await
    }

    /// Watcher off, no settle delay, no metrics logging; `tweak` may
    /// override any of it.
    pub async fn with_config(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            root: dir.path().to_path_buf(),
            watch_enabled: false,
            settle_delay_ms: 0,
            metrics_log_interval_ms: 0,
            ..ServerConfig::default()
        };
        tweak(&mut config);
        let root = config.root.clone();
        let server = serve_background(config).await.unwrap();
        Self {
            server,
            client: reqwest::Client::new(),
            root,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.url(), path)
    }

    /// Authenticated request.
    pub fn request(&self, method: &str, path: &str) -> RequestBuilder {
        self.client
            .request(Method::from_bytes(method.as_bytes()).unwrap(), self.url(path))
            .basic_auth(USERNAME, Some(PASSWORD))
    }

    pub async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> Response {
        self.request("PUT", path).body(body).send().await.unwrap()
    }

    pub async fn put_ok(&self, path: &str, body: impl Into<reqwest::Body>) {
        let resp = self.put(path, body).await;
        assert_eq!(resp.status(), StatusCode::CREATED, "PUT {path}");
    }

    pub async fn mkcol(&self, path: &str) -> Response {
        self.request("MKCOL", path).send().await.unwrap()
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.request("DELETE", path).send().await.unwrap()
    }

    pub async fn get(&self, path: &str) -> Response {
        self.request("GET", path).send().await.unwrap()
    }

    pub async fn get_range(&self, path: &str, range: &str) -> Response {
        self.request("GET", path)
            .header("Range", range)
            .send()
            .await
            .unwrap()
    }

    pub async fn propfind(&self, path: &str, depth: Option<&str>) -> Response {
        let mut builder = self.request("PROPFIND", path);
        if let Some(depth) = depth {
            builder = builder.header("Depth", depth);
        }
        builder.send().await.unwrap()
    }

    /// Connect a notification client, optionally with a Basic auth header.
    pub async fn connect(&self, with_header: bool) -> WsClient {
        let mut request = self.server.ws_url().into_client_request().unwrap();
        if with_header {
            let header = encode_basic_auth(USERNAME, PASSWORD);
            request
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_str(&header).unwrap());
        }
        let (stream, _) = connect_async(request).await.unwrap();
        WsClient { stream }
    }

    /// Connected, authenticated client whose greeting has been consumed.
    pub async fn observer(&self) -> WsClient {
        let mut ws = self.connect(true).await;
        assert_eq!(ws.recv().await["type"], "connected");
        ws
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, value: Value) {
        self.stream
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next JSON message, skipping control frames.
    pub async fn recv(&mut self) -> Value {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("timed out waiting for a message")
    }

    /// Next JSON message, or `None` if nothing arrives in time or the
    /// connection ends.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .ok()??;
            match frame {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Whether the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.stream.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn subscribe(&mut self, path: &str) -> Value {
        self.send(json!({ "type": "subscribe", "path": path })).await;
        self.recv().await
    }

    /// Next `fileChange` notification.
    pub async fn next_change(&mut self) -> Value {
        let msg = self.recv().await;
        assert_eq!(msg["type"], "fileChange", "unexpected message {msg}");
        msg
    }

    /// Assert nothing arrives during the quiet period.
    pub async fn assert_quiet(&mut self) {
        self.assert_quiet_for(QUIET_PERIOD).await;
    }

    pub async fn assert_quiet_for(&mut self, wait: Duration) {
        if let Some(msg) = self.recv_within(wait).await {
            panic!("expected no message, got {msg}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
