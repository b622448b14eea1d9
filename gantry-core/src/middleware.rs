// Middleware system for request/response processing

use crate::context::Context;
use crate::error::Error;
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, Instrument};

/// Boxed future returned by handlers, borrowing the context it works on.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// Plain handler function: borrows the context, returns a boxed future.
///
/// ```ignore
/// fn home(ctx: &mut Context) -> HandlerFuture<'_> {
///     Box::pin(async move { ctx.json(200, &serde_json::json!({"message": "Home"})) })
/// }
/// ```
pub type HandlerFn = for<'a> fn(&'a mut Context) -> HandlerFuture<'a>;

/// A terminal request handler. Stateless handlers are plain [`HandlerFn`]s;
/// handlers that carry injected services implement this trait directly.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> Result<(), Error>;
}

#[async_trait]
impl RequestHandler for HandlerFn {
    async fn call(&self, ctx: &mut Context) -> Result<(), Error> {
        (self)(ctx).await
    }
}

/// Shared, type-erased terminal handler.
pub type Handler = Arc<dyn RequestHandler>;

/// Erase a plain handler function into a [`Handler`].
pub fn handler(f: HandlerFn) -> Handler {
    Arc::new(f)
}

/// A middleware wraps the rest of the chain: run code before `next`,
/// decide whether to call it, and run code after it returns.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error>;
}

/// Cursor over the remaining middleware slice, ending at the terminal
/// handler. Entry order follows the slice; exit order is the reverse.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: &'a Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], terminal: &'a Handler) -> Self {
        Self { chain, terminal }
    }

    /// Advance to the next middleware, or the terminal handler when the
    /// chain is exhausted.
    pub async fn run(mut self, ctx: &mut Context) -> Result<(), Error> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                self.chain = rest;
                current.handle(ctx, self).await
            }
            None => self.terminal.call(ctx).await,
        }
    }
}

// ============================================================================
// Built-in middleware
// ============================================================================

/// Store key under which the request id is kept.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Header carrying the trace id.
pub const TRACE_ID_HEADER: &str = "X-Trace-ID";

/// Reads `X-Request-ID` from the request, minting a fresh token when
/// absent, and propagates it through the context store and the response.
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let request_id = ctx
            .request()
            .header(REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        ctx.set(REQUEST_ID_KEY, request_id.clone());
        ctx.response_mut().set_header(REQUEST_ID_HEADER, request_id);

        next.run(ctx).await
    }
}

/// Catches handler panics and turns them into 500 responses.
///
/// Without this middleware a panic kills the serving task, not the
/// process. In development mode the panic text is included in the body.
pub struct Recover {
    development: bool,
}

impl Recover {
    pub fn new(development: bool) -> Self {
        Self { development }
    }
}

impl Default for Recover {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl Middleware for Recover {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let outcome = AssertUnwindSafe(next.run(ctx)).catch_unwind().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let text = panic_text(&panic);
                error!(panic = %text, "recovered from handler panic");

                let message = if self.development {
                    format!("panic: {text}")
                } else {
                    "Internal Server Error".to_string()
                };
                ctx.json(500, &serde_json::json!({ "message": message }))
            }
        }
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Hook for span reporting. The framework opens a `tracing` span around
/// every traced request; implementations own id minting and export.
pub trait Tracer: Send + Sync {
    /// Open a span for the request, returning its trace id.
    fn start(&self, method: &str, path: &str) -> String;

    /// Close the span with the response status.
    fn finish(&self, trace_id: &str, status: u16);
}

/// Spans the handler, tags method/path/status, and propagates
/// `X-Trace-ID` to the response.
pub struct Trace {
    tracer: Arc<dyn Tracer>,
}

impl Trace {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let method = ctx
            .request()
            .method
            .map(|m| m.as_str())
            .unwrap_or("UNKNOWN");
        let path = ctx.request().path.clone();

        let trace_id = match ctx.request().header(TRACE_ID_HEADER) {
            Some(incoming) => incoming.to_string(),
            None => self.tracer.start(method, &path),
        };

        let span = tracing::info_span!("request", %method, %path, trace_id = %trace_id);
        let result = next.run(ctx).instrument(span).await;

        let status = match &result {
            Err(e) => e.status_code(),
            Ok(()) => ctx.response().status(),
        };
        self.tracer.finish(&trace_id, status);
        ctx.response_mut().set_header(TRACE_ID_HEADER, trace_id);

        result
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token-bucket rate limiter keyed by client address.
///
/// Loopback clients are never limited, so local development and health
/// probes pass through.
pub struct RateLimit {
    rate: f64,
    burst: u32,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimit {
    /// `rate` is tokens per second; `burst` caps the bucket.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Parse a `N/sec|second|min|minute|hour` spec into a limiter.
    pub fn from_spec(spec: &str) -> Result<Self, Error> {
        let (rate, burst) = parse_rate_spec(spec)?;
        Ok(Self::new(rate, burst))
    }

    fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst as f64,
            last: now,
        });

        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst as f64);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        match ctx.request().remote_addr {
            Some(addr) if !addr.ip().is_loopback() => {
                if self.allow(addr.ip()) {
                    next.run(ctx).await
                } else {
                    Err(Error::too_many_requests("rate limit exceeded"))
                }
            }
            _ => next.run(ctx).await,
        }
    }
}

/// Parse `N/sec|second|min|minute|hour` into (tokens per second, burst).
pub fn parse_rate_spec(spec: &str) -> Result<(f64, u32), Error> {
    let (count, unit) = spec
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid rate limit spec: {spec:?}")))?;

    let n: u64 = count
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid rate limit count: {spec:?}")))?;
    if n == 0 {
        return Err(Error::Config(format!(
            "rate limit must be positive: {spec:?}"
        )));
    }

    match unit.trim() {
        "sec" | "second" => Ok((n as f64, n as u32)),
        "min" | "minute" => Ok((n as f64 / 60.0, (n / 60).max(1) as u32)),
        "hour" => Ok((n as f64 / 3600.0, (n / 3600).max(1) as u32)),
        other => Err(Error::Config(format!(
            "unknown rate limit unit: {other:?}"
        ))),
    }
}

// ============================================================================
// Name registry
// ============================================================================

/// Name → middleware registry consulted by the registrar, stored in the
/// DI container like any other provider.
#[derive(Default)]
pub struct MiddlewareRegistry {
    by_name: RwLock<HashMap<String, Arc<dyn Middleware>>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.by_name.write().insert(name.into(), middleware);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.by_name.read().get(name).cloned()
    }
}

/// Built-in fallbacks for middleware names not found in the registry.
pub fn builtin(name: &str, development: bool) -> Option<Arc<dyn Middleware>> {
    match name {
        "request-id" => Some(Arc::new(RequestId)),
        "recover" => Some(Arc::new(Recover::new(development))),
        _ => None,
    }
}
