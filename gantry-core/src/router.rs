// Trie-based request routing

use crate::container::Container;
use crate::context::{Context, ContextPool};
use crate::error::Error;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, METHOD_COUNT};
use crate::middleware::{Handler, Middleware, Next};
use crate::params::PathParams;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A registered (method, pattern) pair, as exposed by [`Router::routes`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: &'static str,
    pub path: String,
}

// A terminal entry: the handler plus the composed middleware list that
// produced it, snapshotted at registration time.
#[derive(Clone)]
struct Terminal {
    pattern: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Handler,
}

struct ParamChild {
    name: String,
    node: Node,
}

struct WildcardChild {
    name: String,
    node: Node,
}

// One trie node. Static children match before the parameter child, which
// matches before the wildcard child; the wildcard consumes the remainder
// of the path and terminates the search.
#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    param: Option<Box<ParamChild>>,
    wildcard: Option<Box<WildcardChild>>,
    terminals: [Option<Terminal>; METHOD_COUNT],
}

#[derive(Default)]
struct Table {
    root: Node,
    routes: Vec<RouteInfo>,
}

/// HTTP request router.
///
/// The trie is built during startup and read-only afterwards; dispatch
/// takes the reader side of the lock, clones the matched terminal's
/// shared handles, and runs the chain outside the lock.
pub struct Router {
    table: RwLock<Table>,
    global: RwLock<Vec<Arc<dyn Middleware>>>,
    pool: ContextPool,
    container: RwLock<Option<Arc<Container>>>,
    development: AtomicBool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            global: RwLock::new(Vec::new()),
            pool: ContextPool::new(),
            container: RwLock::new(None),
            development: AtomicBool::new(false),
        }
    }

    /// Install a middleware that wraps every route registered afterwards.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.global.write().push(middleware);
    }

    /// Toggle development-mode error rendering (500 bodies carry the
    /// error text instead of a generic message).
    pub fn set_development(&self, development: bool) {
        self.development.store(development, Ordering::Relaxed);
    }

    pub fn development(&self) -> bool {
        self.development.load(Ordering::Relaxed)
    }

    /// Attach the application container so handlers can reach providers
    /// through [`Context::container`].
    pub fn attach_container(&self, container: Arc<Container>) {
        *self.container.write() = Some(container);
    }

    /// Register `handler` for `method` at `path`, wrapped by `middlewares`
    /// (earliest-listed runs first). Re-registering the same (method,
    /// path) replaces the terminal rather than duplicating it.
    pub fn register(
        &self,
        method: HttpMethod,
        path: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: Handler,
    ) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let pattern = if segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segments.join("/"))
        };

        let mut composed = self.global.read().clone();
        composed.extend(middlewares);

        let mut table = self.table.write();
        let mut node = &mut table.root;

        for segment in &segments {
            if let Some(name) = segment.strip_prefix(':') {
                let param = node.param.get_or_insert_with(|| {
                    Box::new(ParamChild {
                        name: name.to_string(),
                        node: Node::default(),
                    })
                });
                node = &mut param.node;
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "*" } else { name };
                let wildcard = node.wildcard.get_or_insert_with(|| {
                    Box::new(WildcardChild {
                        name: name.to_string(),
                        node: Node::default(),
                    })
                });
                node = &mut wildcard.node;
                // The wildcard consumes the remainder; nothing nests below.
                break;
            } else {
                node = node.children.entry(segment.to_string()).or_default();
            }
        }

        node.terminals[method.index()] = Some(Terminal {
            pattern: pattern.clone(),
            middlewares: composed,
            handler,
        });

        let info = RouteInfo {
            method: method.as_str(),
            path: pattern.clone(),
        };
        if !table.routes.contains(&info) {
            table.routes.push(info);
        }

        debug!(method = %method, pattern = %pattern, "route registered");
    }

    /// Open a sub-group that prefixes registrations and prepends a
    /// middleware list to every route registered through it.
    pub fn group(&self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> Group<'_> {
        Group {
            router: self,
            prefix: prefix.to_string(),
            middlewares,
        }
    }

    /// Snapshot of the registered route table.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.table.read().routes.clone()
    }

    pub fn route_count(&self) -> usize {
        self.table.read().routes.len()
    }

    /// Dispatch with a fresh cancellation scope. Mostly for tests and
    /// embedding; the server loop uses [`Router::dispatch_scoped`].
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        self.dispatch_scoped(request, CancellationToken::new()).await
    }

    /// Dispatch `request`, binding path parameters and running the
    /// composed chain on a pooled context. Returns the final response;
    /// 404 when no terminal matches.
    pub async fn dispatch_scoped(
        &self,
        request: HttpRequest,
        scope: CancellationToken,
    ) -> HttpResponse {
        let method = match request.method {
            Some(m) => m,
            None => return not_found_response(),
        };

        let mut params = PathParams::new();
        let matched = {
            let segments: Vec<&str> =
                request.path.split('/').filter(|s| !s.is_empty()).collect();
            let table = self.table.read();
            find(&table.root, &segments, method.index(), &mut params).cloned()
        };

        let terminal = match matched {
            Some(t) => t,
            None => {
                trace!(method = %method, path = %request.path, "no terminal matched");
                return not_found_response();
            }
        };

        let container = self.container.read().clone();
        let mut ctx = self
            .pool
            .acquire(request, terminal.pattern.clone(), params, scope, container);

        let result = Next::new(&terminal.middlewares, &terminal.handler)
            .run(&mut ctx)
            .await;

        if let Err(err) = result {
            render_error(&mut ctx, &err, self.development());
        }

        let response = ctx.take_response();
        self.pool.release(ctx);
        response
    }
}

/// A routing scope that prefixes a path and prepends a middleware list
/// to every descendant registration.
pub struct Group<'r> {
    router: &'r Router,
    prefix: String,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Group<'_> {
    /// Open a nested group under this one.
    pub fn group(&self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> Group<'_> {
        let mut combined = self.middlewares.clone();
        combined.extend(middlewares);
        Group {
            router: self.router,
            prefix: join_paths(&self.prefix, prefix),
            middlewares: combined,
        }
    }

    pub fn register(
        &self,
        method: HttpMethod,
        path: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: Handler,
    ) {
        let mut combined = self.middlewares.clone();
        combined.extend(middlewares);
        self.router
            .register(method, &join_paths(&self.prefix, path), combined, handler);
    }
}

/// Join two path fragments with exactly one slash between them.
pub fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

// Recursive matcher. Probe order: static, then parameter (binding the
// segment, undone on backtrack), then wildcard (binding the joined
// remainder and ending the search).
fn find<'n>(
    node: &'n Node,
    segments: &[&str],
    method: usize,
    params: &mut PathParams,
) -> Option<&'n Terminal> {
    let (segment, rest) = match segments.split_first() {
        None => return node.terminals[method].as_ref(),
        Some(parts) => parts,
    };

    if let Some(child) = node.children.get(*segment) {
        if let Some(terminal) = find(child, rest, method, params) {
            return Some(terminal);
        }
    }

    if let Some(param) = node.param.as_deref() {
        let mark = params.len();
        params.push(param.name.as_str(), *segment);
        if let Some(terminal) = find(&param.node, rest, method, params) {
            return Some(terminal);
        }
        params.truncate(mark);
    }

    if let Some(wildcard) = node.wildcard.as_deref() {
        if let Some(terminal) = wildcard.node.terminals[method].as_ref() {
            let remainder = segments.join("/");
            if wildcard.name != "*" {
                params.push(wildcard.name.as_str(), remainder.clone());
            }
            params.push("*", remainder);
            return Some(terminal);
        }
    }

    None
}

fn not_found_response() -> HttpResponse {
    let mut response = HttpResponse::new();
    let _ = response.write_json(404, &serde_json::json!({ "message": "Not Found" }));
    response
}

// Write the error's status and JSON body onto the context. Typed HTTP
// errors keep their message; untyped 5xx bodies carry the error text
// only in development mode.
fn render_error(ctx: &mut Context, err: &Error, development: bool) {
    let code = err.status_code();
    let message = match err {
        Error::Http { message, .. } => message.clone(),
        Error::NotFound(_) => "Not Found".to_string(),
        _ if development => err.to_string(),
        _ => "Internal Server Error".to_string(),
    };
    let _ = ctx.json(code, &serde_json::json!({ "message": message }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler, HandlerFuture};
    use async_trait::async_trait;

    fn echo_pattern(ctx: &mut Context) -> HandlerFuture<'_> {
        Box::pin(async move {
            let pattern = ctx.pattern().to_string();
            ctx.string(200, pattern)
        })
    }

    fn echo_params(ctx: &mut Context) -> HandlerFuture<'_> {
        Box::pin(async move {
            let rendered: Vec<String> = ctx
                .params()
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            ctx.string(200, rendered.join(";"))
        })
    }

    fn failing(_ctx: &mut Context) -> HandlerFuture<'_> {
        Box::pin(async { Err(Error::Internal("kaboom".into())) })
    }

    async fn body_of(router: &Router, method: HttpMethod, path: &str) -> (u16, String) {
        let response = router.dispatch(HttpRequest::new(method, path)).await;
        let body = String::from_utf8_lossy(response.body()).to_string();
        (response.status(), body)
    }

    #[tokio::test]
    async fn test_static_route_matches() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/users", Vec::new(), handler(echo_pattern));

        let (status, body) = body_of(&router, HttpMethod::GET, "/users").await;
        assert_eq!(status, 200);
        assert_eq!(body, "/users");
    }

    #[tokio::test]
    async fn test_root_route() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/", Vec::new(), handler(echo_pattern));

        let (status, body) = body_of(&router, HttpMethod::GET, "/").await;
        assert_eq!(status, 200);
        assert_eq!(body, "/");
    }

    #[tokio::test]
    async fn test_unmatched_is_404_json() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/users", Vec::new(), handler(echo_pattern));

        let (status, body) = body_of(&router, HttpMethod::GET, "/missing").await;
        assert_eq!(status, 404);
        assert!(body.contains("Not Found"));
    }

    #[tokio::test]
    async fn test_method_mismatch_is_404() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/users", Vec::new(), handler(echo_pattern));

        let (status, _) = body_of(&router, HttpMethod::POST, "/users").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_param_binding() {
        let router = Router::new();
        router.register(
            HttpMethod::GET,
            "/users/:id",
            Vec::new(),
            handler(echo_params),
        );

        let (_, body) = body_of(&router, HttpMethod::GET, "/users/42").await;
        assert_eq!(body, "id=42");
    }

    #[tokio::test]
    async fn test_params_and_wildcard_fidelity() {
        let router = Router::new();
        router.register(
            HttpMethod::GET,
            "/a/:x/b/:y/*rest",
            Vec::new(),
            handler(echo_params),
        );

        let (_, body) = body_of(&router, HttpMethod::GET, "/a/1/b/2/c/d/e").await;
        assert_eq!(body, "x=1;y=2;rest=c/d/e;*=c/d/e");
    }

    #[tokio::test]
    async fn test_wildcard_capture_has_no_leading_slash() {
        let router = Router::new();
        router.register(
            HttpMethod::GET,
            "/static/*",
            Vec::new(),
            handler(echo_params),
        );

        let (_, body) = body_of(&router, HttpMethod::GET, "/static/css/x.css").await;
        assert_eq!(body, "*=css/x.css");
    }

    #[tokio::test]
    async fn test_static_beats_param_beats_wildcard() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/v/special", Vec::new(), handler(echo_pattern));
        router.register(HttpMethod::GET, "/v/:name", Vec::new(), handler(echo_pattern));
        router.register(HttpMethod::GET, "/v/*", Vec::new(), handler(echo_pattern));

        let (_, body) = body_of(&router, HttpMethod::GET, "/v/special").await;
        assert_eq!(body, "/v/special");

        let (_, body) = body_of(&router, HttpMethod::GET, "/v/other").await;
        assert_eq!(body, "/v/:name");

        let (_, body) = body_of(&router, HttpMethod::GET, "/v/a/b").await;
        assert_eq!(body, "/v/*");
    }

    #[tokio::test]
    async fn test_param_binding_undone_before_wildcard() {
        // /files/:name/meta exists, but /files/a/b/c only matches the
        // wildcard; the :name binding from the failed branch must be gone.
        let router = Router::new();
        router.register(
            HttpMethod::GET,
            "/files/:name/meta",
            Vec::new(),
            handler(echo_params),
        );
        router.register(HttpMethod::GET, "/files/*", Vec::new(), handler(echo_params));

        let (_, body) = body_of(&router, HttpMethod::GET, "/files/a/b/c").await;
        assert_eq!(body, "*=a/b/c");
    }

    #[tokio::test]
    async fn test_handler_error_renders_json() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/boom", Vec::new(), handler(failing));

        let (status, body) = body_of(&router, HttpMethod::GET, "/boom").await;
        assert_eq!(status, 500);
        assert!(body.contains("Internal Server Error"));
        assert!(!body.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_handler_error_verbose_in_development() {
        let router = Router::new();
        router.set_development(true);
        router.register(HttpMethod::GET, "/boom", Vec::new(), handler(failing));

        let (status, body) = body_of(&router, HttpMethod::GET, "/boom").await;
        assert_eq!(status, 500);
        assert!(body.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_typed_http_error_keeps_message() {
        fn unauthorized(_ctx: &mut Context) -> HandlerFuture<'_> {
            Box::pin(async { Err(Error::unauthorized("token expired")) })
        }

        let router = Router::new();
        router.register(HttpMethod::GET, "/auth", Vec::new(), handler(unauthorized));

        let (status, body) = body_of(&router, HttpMethod::GET, "/auth").await;
        assert_eq!(status, 401);
        assert!(body.contains("token expired"));
    }

    struct Tag {
        label: &'static str,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
            let trail = ctx.get_str("trail").unwrap_or("").to_string();
            ctx.set("trail", trail + self.label);
            next.run(ctx).await
        }
    }

    fn echo_trail(ctx: &mut Context) -> HandlerFuture<'_> {
        Box::pin(async move {
            let trail = ctx.get_str("trail").unwrap_or("").to_string();
            ctx.string(200, trail)
        })
    }

    #[tokio::test]
    async fn test_group_prefixes_and_prepends_middleware() {
        let router = Router::new();
        let api = router.group("/api", vec![Arc::new(Tag { label: "api." })]);
        let v1 = api.group("/v1", vec![Arc::new(Tag { label: "v1." })]);
        v1.register(
            HttpMethod::GET,
            "/ping",
            vec![Arc::new(Tag { label: "route." })],
            handler(echo_trail),
        );

        let (status, body) = body_of(&router, HttpMethod::GET, "/api/v1/ping").await;
        assert_eq!(status, 200);
        assert_eq!(body, "api.v1.route.");
    }

    #[tokio::test]
    async fn test_reregistration_replaces_terminal() {
        let router = Router::new();
        router.register(HttpMethod::GET, "/dup", Vec::new(), handler(echo_pattern));
        router.register(HttpMethod::GET, "/dup", Vec::new(), handler(echo_params));

        assert_eq!(router.route_count(), 1);
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/api", ""), "/api");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "users"), "/api/users");
    }
}
