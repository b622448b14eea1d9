//! Application callbacks for hub connection events.

use crate::message::Envelope;
use async_trait::async_trait;
use tracing::info;

/// Observer for client lifecycle and inbound messages. All methods are
/// optional.
#[async_trait]
pub trait HubHandler: Send + Sync {
    async fn on_connect(&self, _client_id: &str, _user_id: &str) {}

    async fn on_message(&self, _client_id: &str, _envelope: Envelope) {}

    async fn on_disconnect(&self, _client_id: &str) {}
}

/// Default handler that logs connection events.
pub struct LoggingHandler;

#[async_trait]
impl HubHandler for LoggingHandler {
    async fn on_connect(&self, client_id: &str, user_id: &str) {
        info!(client = client_id, user = user_id, "client connected");
    }

    async fn on_message(&self, client_id: &str, envelope: Envelope) {
        info!(client = client_id, kind = %envelope.kind, "message received");
    }

    async fn on_disconnect(&self, client_id: &str) {
        info!(client = client_id, "client disconnected");
    }
}
