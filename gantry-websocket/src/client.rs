//! Client-side plumbing: the hub's handle to a connection and the
//! per-connection reader/writer tasks.

use crate::handler::HubHandler;
use crate::hub::Command;
use crate::message::Envelope;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

/// Bounded send-queue depth per client. A client whose queue is full
/// during a broadcast is unregistered instead of blocking the hub.
pub const SEND_QUEUE_CAPACITY: usize = 32;

/// Registration state of a client, advanced by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Pending,
    Active,
    Closing,
}

/// The hub's handle to one connected client.
///
/// The handle owns the only sender of the client's bounded send queue:
/// dropping it (on deregistration) closes the queue exactly once, which
/// ends the writer task.
pub struct ClientHandle {
    pub id: String,
    pub user_id: String,
    queue: mpsc::Sender<Envelope>,
    state: Arc<AtomicU8>,
}

impl ClientHandle {
    /// Build a handle plus the receiving end of its send queue.
    pub fn channel(
        id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let handle = Self {
            id: id.into(),
            user_id: user_id.into(),
            queue: tx,
            state: Arc::new(AtomicU8::new(ClientState::Pending as u8)),
        };
        (handle, rx)
    }

    pub fn state(&self) -> ClientState {
        match self.state.load(Ordering::Acquire) {
            0 => ClientState::Pending,
            1 => ClientState::Active,
            _ => ClientState::Closing,
        }
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Non-blocking enqueue onto the client's send queue.
    pub(crate) fn try_enqueue(&self, envelope: Envelope) -> Result<(), TrySendError<Envelope>> {
        self.queue.try_send(envelope)
    }
}

/// Writer task: drains the send queue into the socket. Ends when the
/// queue closes (deregistration or hub shutdown) or the peer goes away.
pub(crate) async fn run_writer<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut queue: mpsc::Receiver<Envelope>,
    client_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(envelope) = queue.recv().await {
        match envelope.to_ws_message() {
            Ok(frame) => {
                if let Err(e) = sink.send(frame).await {
                    debug!(client = %client_id, error = %e, "write failed, stopping writer");
                    break;
                }
            }
            Err(e) => {
                debug!(client = %client_id, error = %e, "dropping unserializable envelope");
            }
        }
    }

    let _ = sink.close().await;
    trace!(client = %client_id, "writer finished");
}

/// Reader task: parses incoming text frames into envelopes for the
/// handler and deregisters the client when the stream ends.
pub(crate) async fn run_reader<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    commands: mpsc::Sender<Command>,
    client_id: String,
    handler: Arc<dyn HubHandler>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(frame) if frame.is_close() => break,
            Ok(frame) => {
                if let Some(parsed) = Envelope::from_ws_message(&frame) {
                    match parsed {
                        Ok(envelope) => handler.on_message(&client_id, envelope).await,
                        Err(e) => {
                            debug!(client = %client_id, error = %e, "ignoring malformed envelope")
                        }
                    }
                }
            }
            Err(e) => {
                debug!(client = %client_id, error = %e, "read failed, stopping reader");
                break;
            }
        }
    }

    handler.on_disconnect(&client_id).await;
    let _ = commands.send(Command::Unregister(client_id)).await;
}
