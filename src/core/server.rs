//! The server: handler registry, lifecycle and accept loop.
//!
//! A [`Server`] is always used through an `Arc`. `start` binds the listener
//! and spawns the accept loop; every accepted connection runs on its own task
//! (see [`Server::handle_connection`]). `stop` stops accepting, waits for
//! in-flight connections and then closes the listener.

use crate::app::handlers::NotImplementedHandler;
use crate::config::ServerConfig;
use crate::domain::model::{LoggingLevel, RequestInfo, ServerState};
use crate::domain::ports::{Handler, ServerDelegate};
use crate::http::headers::DEFAULT_PORT;
use crate::http::{Request, Response};
use crate::utils::error::{HttpError, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use url::Url;

static SHARED: OnceLock<Arc<Server>> = OnceLock::new();

struct RunningServer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    root_url: Url,
}

pub struct Server {
    config: ServerConfig,
    port: AtomicU16,
    state: watch::Sender<ServerState>,
    logging_level: RwLock<LoggingLevel>,
    last_error: Mutex<Option<String>>,
    // Bottom of the stack first; lookups walk it in reverse.
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    active: Mutex<HashMap<u64, RequestInfo>>,
    delegate: RwLock<Option<Arc<dyn ServerDelegate>>>,
    running: Mutex<Option<RunningServer>>,
    next_request_id: AtomicU64,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.port())
            .field("state", &self.state())
            .field("logging_level", &self.logging_level())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Server {
    pub fn with_config(config: ServerConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ServerState::Idle);
        let server = Self {
            port: AtomicU16::new(config.server.port),
            logging_level: RwLock::new(config.server.logging_level),
            config,
            state,
            last_error: Mutex::new(None),
            handlers: RwLock::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            delegate: RwLock::new(None),
            running: Mutex::new(None),
            next_request_id: AtomicU64::new(0),
        };
        server.reset_prototypes();
        Arc::new(server)
    }

    pub fn on_port(port: u16) -> Arc<Self> {
        Self::with_config(ServerConfig::on_port(port))
    }

    /// Process-wide server on the default port.
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Self::on_port(DEFAULT_PORT)))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The configured port, or the bound one while running.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Receives every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn logging_level(&self) -> LoggingLevel {
        *read(&self.logging_level)
    }

    pub fn set_logging_level(&self, level: LoggingLevel) {
        *write(&self.logging_level) = level;
    }

    pub(crate) fn logs(&self, level: LoggingLevel) -> bool {
        self.logging_level().includes(level)
    }

    /// The last error met while processing requests.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub(crate) fn record_error(&self, error: &HttpError) {
        *lock(&self.last_error) = Some(error.to_string());
    }

    /// Registered handlers, most recently registered first.
    pub fn handler_prototypes(&self) -> Vec<Arc<dyn Handler>> {
        read(&self.handlers).iter().rev().cloned().collect()
    }

    /// Requests currently being handled, oldest first.
    pub fn active_requests(&self) -> Vec<RequestInfo> {
        let mut requests: Vec<RequestInfo> = lock(&self.active).values().cloned().collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    pub fn root_url(&self) -> Option<Url> {
        lock(&self.running).as_ref().map(|r| r.root_url.clone())
    }

    pub fn set_delegate(&self, delegate: Arc<dyn ServerDelegate>) {
        *write(&self.delegate) = Some(delegate);
    }

    pub fn clear_delegate(&self) {
        *write(&self.delegate) = None;
    }

    pub(crate) fn delegate(&self) -> Option<Arc<dyn ServerDelegate>> {
        read(&self.delegate).clone()
    }

    /// Puts `handler` on top of the stack so it is asked first.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        if self.logs(LoggingLevel::Debug) {
            tracing::debug!("registered handler '{}'", handler.name());
        }
        write(&self.handlers).push(Arc::clone(&handler));
        if let Some(delegate) = self.delegate() {
            delegate.did_register(&handler);
        }
    }

    /// Drops every handler and registers the 501 fallback.
    pub fn reset_prototypes(&self) {
        {
            let mut handlers = write(&self.handlers);
            handlers.clear();
            handlers.push(Arc::new(NotImplementedHandler));
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_reset();
        }
    }

    /// First handler, from the top of the stack, that accepts the request.
    pub fn handler_for(&self, request: &Request) -> Arc<dyn Handler> {
        read(&self.handlers)
            .iter()
            .rev()
            .find(|h| h.can_handle(request))
            .cloned()
            .unwrap_or_else(|| Arc::new(NotImplementedHandler) as Arc<dyn Handler>)
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.transition(ServerState::Idle, ServerState::Starting)?;

        let address = listen_address(&self.config.server.bind_address, self.port());
        let bound = match TcpListener::bind(&address).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                let err = HttpError::BindError { address, source };
                if self.logs(LoggingLevel::Errors) {
                    tracing::error!("❌ {}", err);
                }
                self.record_error(&err);
                self.set_state(ServerState::Idle);
                return Err(err);
            }
        };

        self.port.store(local_addr.port(), Ordering::SeqCst);
        let root_url = match root_url_for(local_addr) {
            Ok(url) => url,
            Err(err) => {
                self.set_state(ServerState::Idle);
                return Err(err);
            }
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = Arc::clone(self);
        let task = tokio::spawn(async move { server.accept_loop(listener, shutdown_rx).await });

        *lock(&self.running) = Some(RunningServer {
            shutdown,
            task,
            root_url: root_url.clone(),
        });
        self.set_state(ServerState::Running);

        if self.logs(LoggingLevel::Warnings) {
            tracing::info!("🚀 Listening on {}", root_url);
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_start(&root_url);
        }
        Ok(())
    }

    /// Stops accepting, waits for running handlers, then closes the listener.
    pub async fn stop(&self) -> Result<()> {
        if self.state() == ServerState::Idle {
            return Ok(());
        }
        self.transition(ServerState::Running, ServerState::Stopping)?;

        let running = lock(&self.running).take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.task.await {
                if self.logs(LoggingLevel::Errors) {
                    tracing::error!("❌ Accept loop ended abnormally: {}", e);
                }
            }
        }

        self.port.store(self.config.server.port, Ordering::SeqCst);
        self.set_state(ServerState::Idle);
        if self.logs(LoggingLevel::Warnings) {
            tracing::info!("🛑 Server stopped");
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_stop();
        }
        Ok(())
    }

    fn transition(&self, from: ServerState, to: ServerState) -> Result<()> {
        let mut actual = from;
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                actual = *state;
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(HttpError::ServerState {
                expected: from.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    fn set_state(&self, state: ServerState) {
        self.state.send_replace(state);
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        connections.spawn(async move { server.serve_stream(stream, peer).await });
                    }
                    Err(e) => {
                        let err = HttpError::IoError(e);
                        if self.logs(LoggingLevel::Warnings) {
                            tracing::warn!("⚠️ Accept failed: {}", err);
                        }
                        self.record_error(&err);
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    self.reap(finished);
                }
            }
        }

        if self.logs(LoggingLevel::Debug) {
            tracing::debug!("waiting for {} connection(s) to finish", connections.len());
        }
        while let Some(finished) = connections.join_next().await {
            self.reap(finished);
        }
        drop(listener);
    }

    fn reap(&self, finished: std::result::Result<(), JoinError>) {
        if let Err(e) = finished {
            let err = HttpError::handler("connection", e.to_string());
            if self.logs(LoggingLevel::Errors) {
                tracing::error!("❌ Connection task failed: {}", e);
            }
            self.record_error(&err);
        }
    }

    async fn serve_stream(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let default_host = self
            .root_url()
            .and_then(|u| {
                u.host_str()
                    .map(|h| format!("{}:{}", h, u.port_or_known_default().unwrap_or(80)))
            })
            .unwrap_or_else(|| format!("localhost:{}", self.port()));

        let (input, output) = stream.into_split();
        let mut request = Request::new(input)
            .with_peer(id, Some(peer))
            .with_limits(self.config.request_limits())
            .with_default_host(default_host);
        let mut response = Response::new(output).with_server_name(self.config.server_name());

        self.handle_connection(&mut request, &mut response).await;
    }

    pub(crate) fn track(&self, info: RequestInfo) -> ActiveRequest<'_> {
        let id = info.id;
        lock(&self.active).insert(id, info);
        ActiveRequest { server: self, id }
    }
}

/// Removes a request from the active set when dropped, even if its handler panics.
pub(crate) struct ActiveRequest<'a> {
    server: &'a Server,
    id: u64,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        lock(&self.server.active).remove(&self.id);
    }
}

fn listen_address(bind_address: &str, port: u16) -> String {
    match bind_address.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]:{}", v6, port),
        _ => format!("{}:{}", bind_address, port),
    }
}

fn root_url_for(addr: SocketAddr) -> Result<Url> {
    let host = match addr.ip() {
        ip if ip.is_unspecified() => "localhost".to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
        ip => ip.to_string(),
    };
    Ok(Url::parse(&format!("http://{}:{}/", host, addr.port()))?)
}
