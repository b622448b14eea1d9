//! # gantry-core
//!
//! The Gantry framework core: a trie-based HTTP router with pooled
//! request contexts, a declarative handler-group registrar with
//! dependency injection, composable middleware, and an application
//! lifecycle with parallel-hook graceful shutdown.
//!
//! ```rust,no_run
//! use gantry_core::{App, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry_core::Error> {
//!     let app = App::builder()
//!         .config(ServerConfig::default())
//!         .build()?;
//!     app.run().await
//! }
//! ```

pub mod app;
pub mod config;
pub mod container;
pub mod context;
pub mod devroutes;
pub mod error;
pub mod http;
pub mod middleware;
pub mod params;
pub mod registrar;
pub mod router;

pub use app::{shutdown_hook, App, AppBuilder, Drainable, ShutdownHook};
pub use config::{CompressionConfig, LogLevel, ServerConfig};
pub use container::Container;
pub use context::Context;
pub use error::Error;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use middleware::{
    handler, Handler, HandlerFn, HandlerFuture, Middleware, MiddlewareRegistry, Next, RateLimit,
    Recover, RequestHandler, RequestId, Trace, Tracer,
};
pub use params::PathParams;
pub use registrar::{
    ApiMeta, DocProvider, GroupSpec, HandlerGroup, Registrar, RouteDescriptor, RouteSpec,
};
pub use router::{Group, RouteInfo, Router};
