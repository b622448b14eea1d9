// Development-only introspection routes

use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::Error;
use crate::http::HttpMethod;
use crate::middleware::{handler, HandlerFuture, Middleware, Recover, RequestId};
use crate::router::{RouteInfo, Router};
use std::sync::Arc;
use std::time::Instant;

/// Snapshot consulted by the dev endpoints, registered in the container
/// by the application when development mode is on.
pub struct DevState {
    pub config: ServerConfig,
    pub started: Instant,
    pub routes: Vec<RouteInfo>,
}

/// Install `/_routes`, `/_config`, `/_monitor` and `/_error`.
///
/// The synthetic error route gets the recovery middleware so its panics
/// render as responses; everything else only carries request ids.
pub fn install(router: &Router) {
    let base: Vec<Arc<dyn Middleware>> = vec![Arc::new(RequestId)];
    router.register(HttpMethod::GET, "/_routes", base.clone(), handler(routes));
    router.register(HttpMethod::GET, "/_config", base.clone(), handler(config));
    router.register(HttpMethod::GET, "/_monitor", base, handler(monitor));
    router.register(
        HttpMethod::GET,
        "/_error",
        vec![
            Arc::new(RequestId) as Arc<dyn Middleware>,
            Arc::new(Recover::new(true)),
        ],
        handler(error_menu),
    );
}

fn state(ctx: &Context) -> Result<Arc<DevState>, Error> {
    ctx.container()
        .and_then(|c| c.get::<DevState>())
        .ok_or_else(|| Error::Internal("dev state not registered".into()))
}

fn routes(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        let state = state(ctx)?;
        ctx.json(
            200,
            &serde_json::json!({
                "total_routes": state.routes.len(),
                "routes": &state.routes,
                "framework": "gantry",
            }),
        )
    })
}

fn config(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        let state = state(ctx)?;
        ctx.json(200, &state.config.masked())
    })
}

fn monitor(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        let state = state(ctx)?;
        let uptime = state.started.elapsed();
        ctx.json(
            200,
            &serde_json::json!({
                "system": {
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                    "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
                },
                "memory": {
                    "resident_kb": resident_kb(),
                },
                "gc_stats": {},
                "routes": state.routes.len(),
                "compression": &state.config.compression,
                "server_info": {
                    "framework": "gantry",
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_secs": uptime.as_secs(),
                },
            }),
        )
    })
}

fn error_menu(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.request().query_value("type").as_deref() {
            Some("panic") => panic!("synthetic panic from /_error"),
            Some("internal") => Err(Error::Internal("synthetic internal error".into())),
            Some("timeout") => Err(Error::Timeout("synthetic timeout".into())),
            Some("bad-request") => Err(Error::bad_request("synthetic client error")),
            _ => ctx.json(
                200,
                &serde_json::json!({
                    "message": "pick an error type",
                    "types": ["panic", "internal", "timeout", "bad-request"],
                }),
            ),
        }
    })
}

// Resident set size from /proc, where available.
fn resident_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}
