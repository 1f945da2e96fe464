//! HTTP server hosting the WebDAV handler and the notification WebSocket.
//!
//! Every accepted connection is served by hyper's HTTP/1.1 connection with
//! upgrades enabled. A request carrying `Upgrade: websocket` (on any path) is
//! switched to the notification protocol; everything else must present the
//! shared credential via HTTP Basic auth and is offered to the
//! [`DavHandler`].

use crate::body::{self, ResponseBody};
use crate::dav::{DavHandler, DavOutcome};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ALLOW, AUTHORIZATION, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    UPGRADE, WWW_AUTHENTICATE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use sdav_core::{CredentialValidator, SandboxRoot, ServerConfig, StaticCredentials};
use sdav_notify::{
    run_session, ChangeNotifier, FsWatcher, SessionContext, SessionRegistry, SourceAdapter,
    SubscriptionEngine, WatchError,
};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

const REALM: &str = r#"Basic realm="SDAV File Server""#;
const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND";
/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Core(#[from] sdav_core::Error),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Handle to a server started with [`serve_background`].
pub struct SdavServer {
    addr: SocketAddr,
    engine: Arc<SubscriptionEngine>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SdavServer {
    /// Get the server's listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for WebDAV requests.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL for notification clients.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// The subscription engine, for introspection.
    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Stop accepting connections. Open connections finish on their own.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct AppState {
    dav: DavHandler,
    validator: Arc<dyn CredentialValidator>,
    sessions: SessionContext,
}

/// Everything built from a configuration before the accept loop starts.
struct Running {
    listener: TcpListener,
    state: Arc<AppState>,
    engine: Arc<SubscriptionEngine>,
    watcher: Option<FsWatcher>,
    metrics_task: Option<JoinHandle<()>>,
}

impl Running {
    fn stop_background_tasks(&mut self) {
        if let Some(task) = self.metrics_task.take() {
            task.abort();
        }
        self.watcher.take();
    }
}

async fn start(config: &ServerConfig) -> ServerResult<Running> {
    config.validate()?;
    tokio::fs::create_dir_all(&config.root).await?;
    let sandbox = SandboxRoot::new(&config.root)?;
    info!("Serving {}", sandbox.path().display());

    let registry = Arc::new(SessionRegistry::new());
    let engine = Arc::new(SubscriptionEngine::new(registry.clone()));
    let adapter = Arc::new(SourceAdapter::new(sandbox.clone(), &config.watch_paths));
    let notifier = Arc::new(ChangeNotifier::new(
        adapter.clone(),
        engine.clone(),
        config.settle_delay(),
        config.echo_window(),
    ));

    let watcher = if config.watch_enabled {
        Some(FsWatcher::start(
            adapter.watch_roots(),
            notifier.clone(),
            config.watch_debounce(),
        )?)
    } else {
        debug!("Filesystem watcher disabled");
        None
    };

    let validator: Arc<dyn CredentialValidator> =
        Arc::new(StaticCredentials::new(config.credentials.clone()));

    let state = Arc::new(AppState {
        dav: DavHandler::new(sandbox, Some(notifier)),
        validator: validator.clone(),
        sessions: SessionContext {
            engine: engine.clone(),
            registry,
            validator,
            heartbeat_interval: config.heartbeat_interval(),
            outbound_buffer: config.outbound_buffer,
        },
    });

    let metrics_task = config
        .metrics_log_interval()
        .map(|every| spawn_metrics_log(engine.clone(), every));

    let listener = TcpListener::bind(config.bind_addr()).await?;

    Ok(Running {
        listener,
        state,
        engine,
        watcher,
        metrics_task,
    })
}

/// Start the server and block until the listener fails.
///
/// # Example
///
/// ```ignore
/// use sdav_core::ServerConfig;
///
/// #[tokio::main]
/// async fn main() {
///     let config = ServerConfig::load("sdav.toml").unwrap();
///     sdav_fs::serve(config).await.unwrap();
/// }
/// ```
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let mut running = start(&config).await?;
    let local_addr = running.listener.local_addr()?;

    info!("WebDAV server listening on http://{}", local_addr);
    info!("Notifications available at ws://{}", local_addr);

    let result = loop {
        match running.listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!("Connection from {}", remote_addr);
                spawn_connection(stream, running.state.clone());
            }
            Err(e) => break Err(ServerError::from(e)),
        }
    };
    running.stop_background_tasks();
    result
}

/// Start the server in the background.
///
/// Returns a handle that can be used to get the server address and shut it
/// down. Bind to port 0 to pick a free port.
pub async fn serve_background(config: ServerConfig) -> ServerResult<SdavServer> {
    let mut running = start(&config).await?;
    let local_addr = running.listener.local_addr()?;
    let engine = running.engine.clone();

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    info!("WebDAV server started on http://{}", local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = running.listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            debug!("Connection from {}", remote_addr);
                            spawn_connection(stream, running.state.clone());
                        }
                        Err(e) => back_off_after_accept_error(&e).await,
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("Server shutting down");
                    break;
                }
            }
        }
        running.stop_background_tasks();
    });

    Ok(SdavServer {
        addr: local_addr,
        engine,
        shutdown_tx: Some(shutdown_tx),
    })
}

/// Log a failed accept and pause, so a persistent failure does not spin.
async fn back_off_after_accept_error(err: &io::Error) {
    error!("Accept error: {:?}", err);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn spawn_connection(stream: TcpStream, state: Arc<AppState>) {
    let io = TokioIo::new(stream);
    tokio::spawn(async move {
        let service = service_fn(move |req| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(route(state, req).await) }
        });
        if let Err(err) = http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            debug!("Connection error: {:?}", err);
        }
    });
}

async fn route(state: Arc<AppState>, req: Request<Incoming>) -> Response<ResponseBody> {
    if is_websocket_upgrade(&req) {
        return upgrade(state, req);
    }

    if !authorized(state.validator.as_ref(), &req) {
        debug!("Rejected unauthenticated {} {}", req.method(), req.uri().path());
        return unauthorized();
    }

    match state.dav.handle(req).await {
        DavOutcome::Handled(response) => response,
        DavOutcome::PassThrough(req) => fallback(&req),
    }
}

fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn authorized<B>(validator: &dyn CredentialValidator, req: &Request<B>) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|header| validator.validate_header(header))
}

fn unauthorized() -> Response<ResponseBody> {
    let mut response = body::json(
        StatusCode::UNAUTHORIZED,
        r#"{"error":"Authentication required"}"#.to_string(),
    );
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

/// Requests the WebDAV handler did not claim.
fn fallback<B>(req: &Request<B>) -> Response<ResponseBody> {
    if req.method() == Method::OPTIONS {
        let mut response = body::response(StatusCode::OK, body::empty());
        let headers = response.headers_mut();
        headers.insert("dav", HeaderValue::from_static("1"));
        headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert("ms-author-via", HeaderValue::from_static("DAV"));
        return response;
    }
    body::text(StatusCode::NOT_FOUND, "Not Found")
}

/// Complete the WebSocket handshake and hand the connection to a session.
fn upgrade(state: Arc<AppState>, mut req: Request<Incoming>) -> Response<ResponseBody> {
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return body::text(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };
    let accept = derive_accept_key(key.as_bytes());
    let pre_authenticated = authorized(state.validator.as_ref(), &req);

    let on_upgrade = hyper::upgrade::on(&mut req);
    let ctx = state.sessions.clone();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                run_session(ws, ctx, pre_authenticated).await;
            }
            Err(e) => warn!("WebSocket upgrade failed: {}", e),
        }
    });

    let mut response = body::response(StatusCode::SWITCHING_PROTOCOLS, body::empty());
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    body::set_header(&mut response, SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn spawn_metrics_log(engine: Arc<SubscriptionEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let m = engine.metrics_snapshot();
            info!(
                "Metrics: {} file events, {} notifications sent, {} matches, {} active clients, {} subscriptions",
                m.total_file_events,
                m.total_notifications_sent,
                m.total_matches_found,
                m.active_clients,
                m.active_subscriptions
            );
        }
    })
}
