//! # gantry-websocket
//!
//! WebSocket support for the Gantry framework: a broadcast [`Hub`] run
//! as a single supervisory task, per-connection reader/writer tasks with
//! bounded send queues, targeted user sends, metrics, and a draining
//! shutdown that the application lifecycle drives through
//! [`gantry_core::Drainable`].
//!
//! ```rust,no_run
//! use gantry_websocket::{Envelope, Hub};
//!
//! # async fn example() {
//! let hub = Hub::new();
//! hub.broadcast(Envelope::new("chat", serde_json::json!({"t": "hi"}))).await;
//! hub.shutdown_with_timeout(std::time::Duration::from_secs(5)).await.ok();
//! # }
//! ```

mod client;
mod error;
mod handler;
mod hub;
mod message;
mod metrics;

pub use client::{ClientHandle, ClientState, SEND_QUEUE_CAPACITY};
pub use error::{WebSocketError, WebSocketResult};
pub use handler::{HubHandler, LoggingHandler};
pub use hub::{socket_terminal, Hub, SocketTerminal};
pub use message::Envelope;
pub use metrics::HubMetrics;
