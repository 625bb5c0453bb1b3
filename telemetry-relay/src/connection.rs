//! Per-connection lifecycle: accept, welcome and replay, receive loop,
//! cleanup.
//!
//! Each socket is driven by one task. The read half feeds decoded messages
//! to the [`Hub`]; the write half drains the connection's outbound queue.
//! Both halves are polled by the same `select!`. Whichever half finishes
//! first ends the connection.

use std::{net::SocketAddr, sync::Arc};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{select, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    hub::Hub,
    message::Inbound,
    registry::ConnectionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// WebSocket handshake in progress; not yet registered.
    Connecting,
    Active,
    Closed,
}

struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: ConnectionState,
}

impl Connection {
    fn advance(&mut self, next: ConnectionState) {
        debug!(conn = %self.id, from = ?self.state, to = ?next, "connection state change");
        self.state = next;
    }
}

/// Runs one upgraded socket until the peer leaves or a write fails, then
/// unregisters it.
pub async fn serve(socket: WebSocket, peer: Option<SocketAddr>, hub: Arc<Hub>) {
    let (id, inbox) = hub.accept(peer).await;
    let mut connection = Connection {
        id,
        peer,
        state: ConnectionState::Connecting,
    };
    connection.advance(ConnectionState::Active);
    info!(conn = %id, ?peer, "client connected");

    let (sink, stream) = socket.split();
    let result = select! {
        result = receive_loop(&hub, id, stream) => result,
        result = write_loop(id, sink, inbox) => result,
    };

    let role = hub.disconnect(id).await;
    connection.advance(ConnectionState::Closed);
    log_close(&connection, role.is_some(), result);
}

async fn receive_loop<S>(hub: &Hub, id: ConnectionId, mut stream: S) -> Result<(), RelayError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => handle_text(hub, id, text).await,
            Message::Binary(bytes) => {
                debug!(conn = %id, len = bytes.len(), "ignoring binary frame");
            }
            Message::Close(frame) => {
                debug!(conn = %id, ?frame, "peer sent close frame");
                return Ok(());
            }
            // Pongs are answered by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    Ok(())
}

async fn handle_text(hub: &Hub, id: ConnectionId, text: String) {
    match Inbound::decode(text) {
        Ok(message) => {
            let kind = message.kind().to_string();
            let outcome = hub.handle(id, message).await;
            debug!(conn = %id, kind, ?outcome, "message handled");
        }
        Err(err) => {
            let err = RelayError::from(err);
            warn!(conn = %id, error = %err, "dropping malformed message");
        }
    }
}

/// Drains the outbound queue into the socket. The queue closes when the hub
/// unregisters this connection, which ends the loop with `ChannelClosed`.
async fn write_loop<S>(
    id: ConnectionId,
    mut sink: S,
    mut inbox: mpsc::Receiver<String>,
) -> Result<(), RelayError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(text) = inbox.recv().await {
        sink.send(Message::Text(text)).await?;
    }

    if let Err(err) = sink.close().await {
        debug!(conn = %id, error = ?err, "failed to close evicted socket");
    }
    Err(RelayError::ChannelClosed)
}

fn log_close(connection: &Connection, was_registered: bool, result: Result<(), RelayError>) {
    let Connection { id, peer, .. } = connection;
    match result {
        Ok(()) => info!(conn = %id, ?peer, "client disconnected"),
        Err(RelayError::ChannelClosed) => {
            info!(conn = %id, ?peer, was_registered, "connection evicted by relay");
        }
        Err(err) => warn!(conn = %id, ?peer, error = ?err, "client connection closed with error"),
    }
}
