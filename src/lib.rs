// Gantry - a composable HTTP framework for Rust
//
// This library provides declarative handler-group routing with
// dependency injection, a trie-based dispatcher over pooled request
// contexts, a WebSocket broadcast hub, and graceful lifecycle
// management.

// Re-export core functionality
pub use gantry_core::*;

// Re-export WebSocket support
pub use gantry_websocket;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        handler,
        shutdown_hook,
        ApiMeta,
        App,
        AppBuilder,
        Container,
        Context,
        Error,
        GroupSpec,
        Handler,
        HandlerFuture,
        HandlerGroup,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        Middleware,
        MiddlewareRegistry,
        Next,
        Registrar,
        RequestHandler,
        RouteSpec,
        Router,
        ServerConfig,
    };
    pub use gantry_websocket::{Envelope, Hub, HubHandler};
}
