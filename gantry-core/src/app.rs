// Application bootstrapper, HTTP listener, and shutdown orchestration

use crate::config::ServerConfig;
use crate::container::Container;
use crate::devroutes::{self, DevState};
use crate::error::Error;
use crate::http::{HttpMethod, HttpRequest};
use crate::middleware::{Trace, Tracer};
use crate::registrar::{DocProvider, HandlerGroup, Registrar};
use crate::router::Router;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// A user-supplied termination hook. Hooks run concurrently during
/// shutdown; each gets its own task.
pub type ShutdownHook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Wrap an async closure into a [`ShutdownHook`].
pub fn shutdown_hook<F, Fut>(f: F) -> ShutdownHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Something that can shed its clients within a deadline — the WebSocket
/// hub implements this so the lifecycle can drain it after the listener.
#[async_trait]
pub trait Drainable: Send + Sync {
    async fn drain(&self, timeout: Duration) -> Result<(), Error>;
}

/// Assembles an [`App`]. Every option is validated at [`AppBuilder::build`];
/// violations are [`Error::Config`] and fail startup, never requests.
pub struct AppBuilder {
    config: Option<ServerConfig>,
    container: Arc<Container>,
    tracer: Option<Arc<dyn Tracer>>,
    doc_provider: Option<Arc<dyn DocProvider>>,
    hub: Option<Arc<dyn Drainable>>,
    shutdown_timeout: Option<Duration>,
    hooks: Vec<ShutdownHook>,
    root: Option<Arc<dyn HandlerGroup>>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            config: None,
            container: Arc::new(Container::new()),
            tracer: None,
            doc_provider: None,
            hub: None,
            shutdown_timeout: None,
            hooks: Vec::new(),
            root: None,
        }
    }
}

impl AppBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Install request tracing. The tracing middleware wraps every route
    /// registered after this point, so set it before `handlers`.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn doc_provider(mut self, provider: Arc<dyn DocProvider>) -> Self {
        self.doc_provider = Some(provider);
        self
    }

    pub fn hub(mut self, hub: Arc<dyn Drainable>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Override the config's shutdown budget. Must be positive.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn hook(mut self, hook: ShutdownHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Root of the handler tree walked at build time.
    pub fn handlers(mut self, root: Arc<dyn HandlerGroup>) -> Self {
        self.root = Some(root);
        self
    }

    /// Register a provider in the DI container.
    pub fn provide<T: Send + Sync + 'static>(self, instance: T) -> Self {
        self.container.register(instance);
        self
    }

    pub fn build(self) -> Result<App, Error> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("server config is required".into()))?;

        let shutdown_timeout = self
            .shutdown_timeout
            .unwrap_or_else(|| config.shutdown_timeout());
        if shutdown_timeout.is_zero() {
            return Err(Error::Config("shutdown timeout must be positive".into()));
        }

        let router = Arc::new(Router::new());
        router.set_development(config.development());

        if let Some(tracer) = self.tracer {
            router.use_middleware(Arc::new(Trace::new(tracer)));
        }

        let mut registrar = Registrar::new(&router, &self.container);
        if let Some(root) = &self.root {
            registrar.register(root.as_ref())?;
        }
        let descriptors = registrar.into_descriptors();

        if config.development() {
            devroutes::install(&router);
        }

        if let Some(provider) = &self.doc_provider {
            provider.publish(&descriptors);
        }

        if config.development() {
            self.container.register(DevState {
                config: config.clone(),
                started: std::time::Instant::now(),
                routes: router.routes(),
            });
        }

        router.attach_container(self.container.clone());

        info!(
            address = %config.address,
            routes = router.route_count(),
            development = config.development(),
            "application assembled"
        );

        Ok(App {
            config,
            container: self.container,
            router,
            hub: self.hub,
            hooks: Mutex::new(self.hooks),
            shutdown_timeout,
            scope: CancellationToken::new(),
            connections: TaskTracker::new(),
            bound: Mutex::new(None),
        })
    }
}

/// The application: router, container, listener, hub handle, and the
/// graceful-shutdown machinery.
pub struct App {
    config: ServerConfig,
    container: Arc<Container>,
    router: Arc<Router>,
    hub: Option<Arc<dyn Drainable>>,
    hooks: Mutex<Vec<ShutdownHook>>,
    shutdown_timeout: Duration,
    scope: CancellationToken,
    connections: TaskTracker,
    bound: Mutex<Option<SocketAddr>>,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Root cancellation scope; child tokens are handed to every request.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// The address the listener actually bound, once [`App::run`] has
    /// started. Useful when the config asked for port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    /// Register a termination hook. Safe under concurrent callers; hooks
    /// appended after shutdown snapshots the list are ignored.
    pub fn add_shutdown_hook(&self, hook: ShutdownHook) {
        self.hooks.lock().push(hook);
    }

    /// Bind the configured address and serve until the scope is
    /// cancelled. Each accepted connection runs on its own task.
    pub async fn run(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.config.address).await?;
        let local = listener.local_addr()?;
        *self.bound.lock() = Some(local);
        info!(address = %local, "listening");

        loop {
            tokio::select! {
                _ = self.scope.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, remote) = accepted?;
                    let router = self.router.clone();
                    let scope = self.scope.clone();
                    self.connections.spawn(async move {
                        serve_connection(stream, remote, router, scope).await;
                    });
                }
            }
        }

        info!("listener stopped accepting");
        Ok(())
    }

    /// Graceful shutdown using the configured budget.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.shutdown_within(self.shutdown_timeout).await
    }

    /// Graceful shutdown with an explicit deadline:
    ///
    /// 1. snapshot the hook list,
    /// 2. run every hook on its own task, collecting errors,
    /// 3. wait for all hooks or the deadline (deadline ⇒ timeout error,
    ///    stragglers abandoned),
    /// 4. stop the listener and drain in-flight connections, then the hub
    ///    (an infrastructure error supersedes hook errors),
    /// 5. report the first hook failure, if any.
    pub async fn shutdown_within(&self, timeout: Duration) -> Result<(), Error> {
        info!(timeout_ms = timeout.as_millis() as u64, "shutting down");
        let deadline = tokio::time::Instant::now() + timeout;

        // Snapshot under the lock; concurrent appenders from here on are
        // ignored by this shutdown.
        let hooks: Vec<ShutdownHook> = self.hooks.lock().clone();
        let hook_count = hooks.len();

        let (tx, mut rx) = mpsc::channel::<(usize, Result<(), Error>)>(hook_count.max(1));
        for (index, hook) in hooks.into_iter().enumerate() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = hook().await;
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        let mut failures: Vec<(usize, String)> = Vec::new();
        let mut received = 0usize;
        while received < hook_count {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((index, result))) => {
                    received += 1;
                    if let Err(e) = result {
                        error!(hook = index, error = %e, "shutdown hook failed");
                        failures.push((index, e.to_string()));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let outstanding = hook_count - received;
                    warn!(outstanding, "shutdown deadline elapsed, abandoning hooks");
                    // Still stop the listener so the process can exit.
                    self.scope.cancel();
                    self.connections.close();
                    return Err(Error::Timeout(format!(
                        "shutdown deadline of {timeout:?} elapsed with {outstanding} hooks outstanding"
                    )));
                }
            }
        }

        self.scope.cancel();
        self.connections.close();

        let mut infra_error: Option<Error> = None;
        if tokio::time::timeout_at(deadline, self.connections.wait())
            .await
            .is_err()
        {
            infra_error = Some(Error::Timeout(
                "listener drain deadline elapsed".to_string(),
            ));
        }

        if infra_error.is_none() {
            if let Some(hub) = &self.hub {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if let Err(e) = hub.drain(remaining).await {
                    infra_error = Some(e);
                }
            }
        }

        if let Some(err) = infra_error {
            error!(error = %err, "shutdown failed draining infrastructure");
            return Err(err);
        }

        failures.sort_by_key(|(index, _)| *index);
        if let Some((index, message)) = failures.into_iter().next() {
            let err = Error::ShutdownHook { index, message };
            error!(error = %err, "shutdown completed with hook failures");
            return Err(err);
        }

        info!("shutdown complete");
        Ok(())
    }
}

// One task per accepted connection. On cancellation the connection is
// asked to finish its in-flight exchange and close.
async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    router: Arc<Router>,
    scope: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let conn_scope = scope.clone();

    let service = service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        let scope = scope.clone();
        async move { Ok::<_, Infallible>(handle_request(req, remote, router, scope).await) }
    });

    let conn = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(client = %remote, error = %e, "connection error");
            }
        }
        _ = conn_scope.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(client = %remote, error = %e, "connection error during drain");
            }
        }
    }
}

// Convert hyper's request into ours, dispatch, convert back.
async fn handle_request(
    req: Request<Incoming>,
    remote: SocketAddr,
    router: Arc<Router>,
    scope: CancellationToken,
) -> Response<Full<Bytes>> {
    let method = match HttpMethod::parse(req.method().as_str()) {
        Some(m) => m,
        None => {
            return plain_response(404, r#"{"message":"Not Found"}"#);
        }
    };

    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let (mut parts, body) = req.into_parts();
    let upgrade = parts.extensions.remove::<OnUpgrade>();

    let mut request = HttpRequest::new(method, &target);
    request.remote_addr = Some(remote);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            request.set_header(name.as_str(), value);
        }
    }

    match body.collect().await {
        Ok(collected) => request.set_body(collected.to_bytes()),
        Err(e) => {
            debug!(client = %remote, error = %e, "failed reading request body");
            return plain_response(400, r#"{"message":"malformed request body"}"#);
        }
    }

    if let Some(upgrade) = upgrade {
        request.set_upgrade(upgrade);
    }

    let response = router.dispatch_scoped(request, scope.child_token()).await;

    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(response.body().clone()))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed assembling response");
            plain_response(500, r#"{"message":"Internal Server Error"}"#)
        })
}

fn plain_response(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .expect("static response must build")
}
