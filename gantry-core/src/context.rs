// Per-request context and its pool

use crate::container::Container;
use crate::error::Error;
use crate::http::{HttpRequest, HttpResponse};
use crate::params::PathParams;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upper bound on recycled contexts kept by the pool.
const POOL_LIMIT: usize = 256;

/// Per-request state handed to handlers and middleware.
///
/// Contexts are pooled: every field is reset when one is acquired, and a
/// context must never be referenced after the dispatcher releases it.
/// Handlers that retain values beyond the response must copy them out.
#[derive(Default)]
pub struct Context {
    request: HttpRequest,
    response: HttpResponse,
    pattern: String,
    params: PathParams,
    store: HashMap<String, Value>,
    scope: CancellationToken,
    container: Option<Arc<Container>>,
}

impl Context {
    #[inline]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    #[inline]
    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    #[inline]
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    #[inline]
    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// The route pattern this request matched, e.g. `/users/:id`.
    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Path parameter by name.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    #[inline]
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// The request's cancellation scope, a child of the application token.
    /// Long-running handlers should observe it in their own loops.
    #[inline]
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// The application's DI container, when dispatched through an [`crate::App`].
    #[inline]
    pub fn container(&self) -> Option<&Arc<Container>> {
        self.container.as_ref()
    }

    // ── Request-scoped store ─────────────────────────────────────────────

    /// Stash a value under a string key for later middleware or the handler.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.store.get(key).and_then(|v| v.as_str())
    }

    // ── Response helpers ─────────────────────────────────────────────────

    /// Write a JSON body with `application/json; charset=utf-8`.
    pub fn json<T: Serialize>(&mut self, status: u16, value: &T) -> Result<(), Error> {
        self.response.write_json(status, value)
    }

    /// Write a plain-text body.
    pub fn string(&mut self, status: u16, body: impl Into<String>) -> Result<(), Error> {
        self.response.set_status(status);
        self.response
            .set_header("Content-Type", "text/plain; charset=utf-8");
        self.response.write(Bytes::from(body.into()));
        Ok(())
    }

    /// Write an HTML body.
    pub fn html(&mut self, status: u16, body: impl Into<String>) -> Result<(), Error> {
        self.response.set_status(status);
        self.response
            .set_header("Content-Type", "text/html; charset=utf-8");
        self.response.write(Bytes::from(body.into()));
        Ok(())
    }

    /// Write a pre-rendered XML body.
    pub fn xml(&mut self, status: u16, body: impl Into<String>) -> Result<(), Error> {
        self.response.set_status(status);
        self.response
            .set_header("Content-Type", "application/xml; charset=utf-8");
        self.response.write(Bytes::from(body.into()));
        Ok(())
    }

    /// Respond with 204 and no body.
    pub fn no_content(&mut self) -> Result<(), Error> {
        self.response.set_status(204);
        Ok(())
    }

    // ── Request binding ──────────────────────────────────────────────────

    /// Bind the request into `T`, merging sources with path parameters
    /// taking precedence over query parameters over the JSON body.
    ///
    /// Scalar-looking path and query values (numbers, booleans) are
    /// coerced so numeric fields bind from `/users/:id`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let mut map = serde_json::Map::new();

        let body = self.request.body_ref();
        if !body.is_empty() {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(fields)) => map.extend(fields),
                Ok(_) => {
                    return Err(Error::bad_request("request body must be a JSON object"));
                }
                Err(e) => {
                    return Err(Error::bad_request(format!("malformed request body: {e}")));
                }
            }
        }

        for (name, value) in self.request.query_params() {
            map.insert(name, coerce_scalar(&value));
        }

        for (name, value) in self.params.iter() {
            map.insert(name.to_string(), coerce_scalar(value));
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| Error::bad_request(format!("parameter binding failed: {e}")))
    }

    pub(crate) fn take_response(&mut self) -> HttpResponse {
        self.response.take()
    }
}

// Parse a captured string as a JSON scalar where possible so typed fields
// bind without a string round-trip.
fn coerce_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Free list of recycled contexts.
///
/// Acquire pops and fully resets a boxed context (or allocates one);
/// release pushes it back up to [`POOL_LIMIT`].
#[derive(Default)]
pub(crate) struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl ContextPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire(
        &self,
        request: HttpRequest,
        pattern: String,
        params: PathParams,
        scope: CancellationToken,
        container: Option<Arc<Container>>,
    ) -> Box<Context> {
        let mut ctx = self.free.lock().pop().unwrap_or_default();
        ctx.request = request;
        ctx.response.reset();
        ctx.pattern = pattern;
        ctx.params = params;
        ctx.store.clear();
        ctx.scope = scope;
        ctx.container = container;
        ctx
    }

    pub(crate) fn release(&self, mut ctx: Box<Context>) {
        // Drop request-scoped state eagerly; the pool must not alias it.
        ctx.request.reset();
        ctx.response.reset();
        ctx.pattern.clear();
        ctx.params.reset();
        ctx.store.clear();
        ctx.container = None;
        ctx.scope = CancellationToken::new();

        let mut free = self.free.lock();
        if free.len() < POOL_LIMIT {
            free.push(ctx);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
