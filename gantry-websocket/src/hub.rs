//! The broadcast hub.
//!
//! A single supervisory task owns the client indices and selects over
//! the command channel and the shutdown token. Everything that mutates
//! the indices happens on that task; pollers read the atomic metrics.

use crate::client::{self, ClientHandle, ClientState};
use crate::error::{WebSocketError, WebSocketResult};
use crate::handler::{HubHandler, LoggingHandler};
use crate::message::Envelope;
use crate::metrics::HubMetrics;
use async_trait::async_trait;
use futures_util::StreamExt;
use gantry_core::{Context, Drainable, Error, RequestHandler};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Supervisor commands. `Unregister` is also sent by reader tasks when a
/// connection ends.
pub(crate) enum Command {
    Register(ClientHandle),
    Unregister(String),
    Broadcast(Envelope),
    SendToUser { user_id: String, envelope: Envelope },
}

/// The WebSocket broadcast coordinator.
pub struct Hub {
    commands: mpsc::Sender<Command>,
    metrics: Arc<HubMetrics>,
    handler: Arc<dyn HubHandler>,
    shutdown: CancellationToken,
    writers: TaskTracker,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Start a hub with the default logging handler.
    pub fn new() -> Arc<Self> {
        Self::with_handler(Arc::new(LoggingHandler))
    }

    /// Start a hub; the supervisor task runs until shutdown.
    pub fn with_handler(handler: Arc<dyn HubHandler>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let metrics = Arc::new(HubMetrics::new());
        let shutdown = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(rx, metrics.clone(), shutdown.clone()));

        Arc::new(Self {
            commands: tx,
            metrics,
            handler,
            shutdown,
            writers: TaskTracker::new(),
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    /// Currently registered clients.
    pub fn connected_clients(&self) -> u64 {
        self.metrics.current_connections()
    }

    /// Register a prepared client handle.
    pub async fn register(&self, handle: ClientHandle) {
        let _ = self.commands.send(Command::Register(handle)).await;
    }

    /// Remove a client and close its send queue.
    pub async fn unregister(&self, client_id: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Unregister(client_id.into()))
            .await;
    }

    /// Fan a message out to every registered client. Clients whose send
    /// queue is full are unregistered instead of blocking the hub.
    pub async fn broadcast(&self, envelope: Envelope) {
        let _ = self.commands.send(Command::Broadcast(envelope)).await;
    }

    /// Send to every connection of one user. Unknown users are a silent
    /// miss.
    pub async fn send_to_user(&self, user_id: impl Into<String>, envelope: Envelope) {
        let _ = self
            .commands
            .send(Command::SendToUser {
                user_id: user_id.into(),
                envelope,
            })
            .await;
    }

    /// Adopt an accepted WebSocket stream: split it, spawn the reader and
    /// writer tasks, and register the client. Returns the client id.
    pub async fn attach<S>(&self, stream: WebSocketStream<S>, user_id: impl Into<String>) -> String
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let user_id = user_id.into();
        let client_id = uuid::Uuid::new_v4().to_string();
        let (handle, queue) = ClientHandle::channel(client_id.clone(), user_id.clone());

        let (sink, source) = stream.split();
        self.writers
            .spawn(client::run_writer(sink, queue, client_id.clone()));
        tokio::spawn(client::run_reader(
            source,
            self.commands.clone(),
            client_id.clone(),
            self.handler.clone(),
        ));

        self.handler.on_connect(&client_id, &user_id).await;
        self.register(handle).await;
        client_id
    }

    /// Drain the hub: stop the supervisor (closing every client's send
    /// queue) and wait for all writer tasks or the deadline.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> WebSocketResult<()> {
        info!(
            clients = self.connected_clients(),
            timeout_ms = timeout.as_millis() as u64,
            "hub shutting down"
        );
        self.shutdown.cancel();

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }

        self.writers.close();
        tokio::time::timeout(timeout, self.writers.wait())
            .await
            .map_err(|_| WebSocketError::Timeout)?;

        info!("hub drained");
        Ok(())
    }
}

#[async_trait]
impl Drainable for Hub {
    async fn drain(&self, timeout: Duration) -> Result<(), Error> {
        self.shutdown_with_timeout(timeout)
            .await
            .map_err(|e| match e {
                WebSocketError::Timeout => Error::Timeout("hub drain deadline elapsed".into()),
                other => Error::Internal(other.to_string()),
            })
    }
}

// The supervisory task. Sole owner of the client and user indices.
async fn supervise(
    mut commands: mpsc::Receiver<Command>,
    metrics: Arc<HubMetrics>,
    shutdown: CancellationToken,
) {
    let mut clients: HashMap<String, ClientHandle> = HashMap::new();
    let mut users: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        apply(command, &mut clients, &mut users, &metrics);
                    }
                    None => break,
                }
            }
        }
    }

    // Shed every client; dropping the handles closes their send queues
    // and lets the writer tasks finish.
    for (_, handle) in clients.drain() {
        handle.set_state(ClientState::Closing);
        metrics.connection_closed();
    }
    users.clear();
    debug!("hub supervisor stopped");
}

fn apply(
    command: Command,
    clients: &mut HashMap<String, ClientHandle>,
    users: &mut HashMap<String, Vec<String>>,
    metrics: &HubMetrics,
) {
    match command {
        Command::Register(handle) => {
            let client_id = handle.id.clone();
            handle.set_state(ClientState::Active);

            if handle.try_enqueue(Envelope::welcome(&client_id)).is_ok() {
                metrics.message_sent();
                metrics.count_type("welcome");
            }

            users
                .entry(handle.user_id.clone())
                .or_default()
                .push(client_id.clone());
            clients.insert(client_id.clone(), handle);
            metrics.connection_opened();
            debug!(client = %client_id, "client registered");
        }

        Command::Unregister(client_id) => {
            remove_client(&client_id, clients, users, metrics);
        }

        Command::Broadcast(envelope) => {
            metrics.message_received();
            metrics.count_type(&envelope.kind);

            let mut overflowed = Vec::new();
            for (client_id, handle) in clients.iter() {
                match handle.try_enqueue(envelope.clone()) {
                    Ok(()) => metrics.message_sent(),
                    Err(TrySendError::Full(_)) => {
                        warn!(client = %client_id, "send queue full, marking for removal");
                        overflowed.push(client_id.clone());
                    }
                    Err(TrySendError::Closed(_)) => overflowed.push(client_id.clone()),
                }
            }
            for client_id in overflowed {
                remove_client(&client_id, clients, users, metrics);
            }
        }

        Command::SendToUser { user_id, envelope } => {
            let envelope = envelope.with_target(user_id.clone());
            let Some(client_ids) = users.get(&user_id) else {
                return;
            };

            let mut dead = Vec::new();
            for client_id in client_ids {
                if let Some(handle) = clients.get(client_id) {
                    match handle.try_enqueue(envelope.clone()) {
                        Ok(()) => metrics.message_sent(),
                        Err(_) => dead.push(client_id.clone()),
                    }
                }
            }
            for client_id in dead {
                remove_client(&client_id, clients, users, metrics);
            }
        }
    }
}

fn remove_client(
    client_id: &str,
    clients: &mut HashMap<String, ClientHandle>,
    users: &mut HashMap<String, Vec<String>>,
    metrics: &HubMetrics,
) {
    let Some(handle) = clients.remove(client_id) else {
        return;
    };
    handle.set_state(ClientState::Closing);

    if let Some(ids) = users.get_mut(&handle.user_id) {
        ids.retain(|id| id != client_id);
        if ids.is_empty() {
            users.remove(&handle.user_id);
        }
    }

    metrics.connection_closed();
    debug!(client = %client_id, "client unregistered");
    // `handle` drops here, closing the send queue.
}

// ============================================================================
// HTTP upgrade terminal
// ============================================================================

/// GET terminal that completes the WebSocket handshake and hands the
/// connection to the hub. Registered by handler groups as their socket
/// terminal; the user id is taken from the `user_id` query parameter.
pub struct SocketTerminal {
    hub: Arc<Hub>,
}

#[async_trait]
impl RequestHandler for SocketTerminal {
    async fn call(&self, ctx: &mut Context) -> Result<(), Error> {
        let key = ctx
            .request()
            .header("sec-websocket-key")
            .map(str::to_string)
            .ok_or_else(|| Error::bad_request("not a websocket handshake"))?;
        let accept = derive_accept_key(key.as_bytes());

        let user_id = ctx
            .request()
            .query_value("user_id")
            .unwrap_or_else(|| "anonymous".to_string());

        let upgrade = ctx
            .request_mut()
            .take_upgrade()
            .ok_or_else(|| Error::bad_request("connection cannot be upgraded"))?;

        let hub = self.hub.clone();
        tokio::spawn(async move {
            match upgrade.await {
                Ok(upgraded) => {
                    let io = TokioIo::new(upgraded);
                    let stream = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                    hub.attach(stream, user_id).await;
                }
                Err(e) => debug!(error = %e, "websocket upgrade failed"),
            }
        });

        let response = ctx.response_mut();
        response.set_status(101);
        response.set_header("Upgrade", "websocket");
        response.set_header("Connection", "Upgrade");
        response.set_header("Sec-WebSocket-Accept", accept);
        Ok(())
    }
}

/// Build the upgrade terminal for a hub.
pub fn socket_terminal(hub: Arc<Hub>) -> gantry_core::Handler {
    Arc::new(SocketTerminal { hub })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    async fn eventually<F: Fn() -> bool>(check: F) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_register_sends_welcome_and_counts() {
        let hub = Hub::new();
        let (handle, mut queue) = ClientHandle::channel("c1", "u1");
        hub.register(handle).await;

        let welcome = timeout(Duration::from_secs(1), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(welcome.kind, "welcome");

        eventually(|| hub.connected_clients() == 1).await;
        assert_eq!(hub.metrics().messages_sent(), 1);
        assert_eq!(hub.metrics().type_count("welcome"), 1);
    }

    #[tokio::test]
    async fn test_broadcast_metrics_match_chat_scenario() {
        let hub = Hub::new();
        let (handle, mut queue) = ClientHandle::channel("c1", "u1");
        hub.register(handle).await;
        eventually(|| hub.connected_clients() == 1).await;

        hub.broadcast(Envelope::new("chat", serde_json::json!({"t": "hi"})))
            .await;

        let welcome = queue.recv().await.unwrap();
        assert_eq!(welcome.kind, "welcome");
        let chat = timeout(Duration::from_secs(1), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chat.kind, "chat");

        let metrics = hub.metrics();
        eventually(|| metrics.messages_sent() == 2).await;
        assert_eq!(metrics.messages_received(), 1);
        assert_eq!(metrics.type_count("chat"), 1);
        assert_eq!(metrics.type_count("welcome"), 1);
    }

    #[tokio::test]
    async fn test_every_drained_client_sees_every_broadcast() {
        let hub = Hub::new();
        let mut queues = Vec::new();
        for i in 0..3 {
            let (handle, queue) = ClientHandle::channel(format!("c{i}"), format!("u{i}"));
            hub.register(handle).await;
            queues.push(queue);
        }
        eventually(|| hub.connected_clients() == 3).await;

        for n in 0..5 {
            hub.broadcast(Envelope::new("tick", serde_json::json!({"n": n})))
                .await;
        }

        for queue in queues.iter_mut() {
            let welcome = timeout(Duration::from_secs(1), queue.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(welcome.kind, "welcome");
            for n in 0..5 {
                let tick = timeout(Duration::from_secs(1), queue.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(tick.data["n"], n);
            }
        }
    }

    #[tokio::test]
    async fn test_overflowing_client_is_unregistered() {
        let hub = Hub::new();
        // Queue is never drained; welcome takes one slot.
        let (handle, _queue) = ClientHandle::channel("slow", "u1");
        hub.register(handle).await;
        eventually(|| hub.connected_clients() == 1).await;

        for _ in 0..client::SEND_QUEUE_CAPACITY + 4 {
            hub.broadcast(Envelope::new("flood", serde_json::Value::Null))
                .await;
        }

        eventually(|| hub.connected_clients() == 0).await;
        assert_eq!(hub.metrics().total_connections(), 1);
    }

    #[tokio::test]
    async fn test_targeted_send_hits_only_user() {
        let hub = Hub::new();
        let (alice, mut alice_queue) = ClientHandle::channel("a", "alice");
        let (bob, mut bob_queue) = ClientHandle::channel("b", "bob");
        hub.register(alice).await;
        hub.register(bob).await;
        eventually(|| hub.connected_clients() == 2).await;

        hub.send_to_user("alice", Envelope::new("dm", serde_json::json!({"t": "psst"})))
            .await;

        assert_eq!(alice_queue.recv().await.unwrap().kind, "welcome");
        let dm = timeout(Duration::from_secs(1), alice_queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dm.kind, "dm");
        assert_eq!(dm.target.as_deref(), Some("alice"));

        assert_eq!(bob_queue.recv().await.unwrap().kind, "welcome");
        assert!(bob_queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_send_to_unknown_user_is_silent() {
        let hub = Hub::new();
        hub.send_to_user("ghost", Envelope::new("dm", serde_json::Value::Null))
            .await;
        // Nothing to assert beyond "no panic, no deadlock".
        sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.metrics().messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_within_deadline() {
        let hub = Hub::new();
        let (handle, mut queue) = ClientHandle::channel("c1", "u1");
        hub.register(handle).await;
        eventually(|| hub.connected_clients() == 1).await;

        hub.shutdown_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();

        // Welcome was enqueued before shutdown; after it the queue closes.
        assert_eq!(queue.recv().await.unwrap().kind, "welcome");
        assert!(queue.recv().await.is_none());
        assert_eq!(hub.connected_clients(), 0);
    }
}
