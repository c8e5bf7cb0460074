//! Per-connection relay loop.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inkbridge_core::protocol::{ClientMessage, ServerMessage, base64_decode, base64_encode};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::{AppState, RelayError, RoomMessage};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Room membership of one connection.
pub struct Connection {
    pub peer_id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<RoomMessage>>,
    /// Awareness peer id this connection publishes for, fixed by its first message.
    presence_peer: Option<u64>,
}

impl Connection {
    pub fn new(peer_id: String) -> Self {
        Self {
            peer_id,
            room: None,
            rx: None,
            presence_peer: None,
        }
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Apply one client message. Returns the direct reply, if any.
    pub fn handle(&mut self, state: &AppState, msg: ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Join { room, token } => {
                if let Err(e) = state.authorize(token.as_deref()) {
                    warn!("Peer {} refused from room {}: {}", self.peer_id, room, e);
                    return Some(error_message(e));
                }
                self.leave(state);
                match state.join_room(&room, &self.peer_id) {
                    Ok(joined) => {
                        self.rx = Some(joined.rx);
                        self.room = Some(room.clone());
                        state.broadcast(
                            &room,
                            &self.peer_id,
                            ServerMessage::PeerJoined {
                                peer_id: self.peer_id.clone(),
                            },
                        );
                        info!("Peer {} joined room {}", self.peer_id, room);
                        Some(ServerMessage::Joined {
                            room,
                            peer_count: joined.peer_count,
                            initial_sync: joined.initial_sync,
                        })
                    }
                    Err(e) => Some(error_message(e)),
                }
            }
            ClientMessage::Leave => {
                self.leave(state);
                None
            }
            ClientMessage::Sync { data } => match base64_decode(&data) {
                Ok(bytes) => self.sync(state, &bytes, data),
                Err(e) => Some(error_message(e.into())),
            },
            ClientMessage::Awareness { peer_id, presence } => {
                if let Some(ref room) = self.room {
                    match self.presence_peer {
                        Some(bound) if bound != peer_id => {
                            warn!("Peer {} sent presence for {} (bound to {})", self.peer_id, peer_id, bound);
                            return Some(error_message(RelayError::PeerMismatch { bound, claimed: peer_id }));
                        }
                        Some(_) => {}
                        None => self.presence_peer = Some(peer_id),
                    }
                    state.broadcast(
                        room,
                        &self.peer_id,
                        ServerMessage::Awareness {
                            from: self.peer_id.clone(),
                            peer_id,
                            presence,
                        },
                    );
                }
                None
            }
        }
    }

    /// Raw update bytes sent as a binary frame.
    pub fn handle_binary(&mut self, state: &AppState, bytes: &[u8]) -> Option<ServerMessage> {
        self.sync(state, bytes, base64_encode(bytes))
    }

    fn sync(&self, state: &AppState, bytes: &[u8], data: String) -> Option<ServerMessage> {
        let room = self.room.as_ref()?;
        if let Err(e) = state.apply_sync(room, bytes) {
            warn!("Rejected update from {}: {}", self.peer_id, e);
            return Some(error_message(e));
        }
        state.broadcast(
            room,
            &self.peer_id,
            ServerMessage::Sync {
                from: self.peer_id.clone(),
                data,
            },
        );
        None
    }

    /// Leave the current room, notifying the remaining peers.
    pub fn leave(&mut self, state: &AppState) {
        self.rx = None;
        self.presence_peer = None;
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.peer_id);
            state.broadcast(
                &room,
                &self.peer_id,
                ServerMessage::PeerLeft {
                    peer_id: self.peer_id.clone(),
                },
            );
            info!("Peer {} left room {}", self.peer_id, room);
        }
    }

    /// Next message from the room, skipping this connection's own.
    async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return std::future::pending().await;
            };
            match rx.recv().await {
                Ok((from, msg)) if from != self.peer_id => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Peer {} lagged, skipped {} messages", self.peer_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn error_message(e: RelayError) -> ServerMessage {
    ServerMessage::Error { message: e.to_string() }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let json = match msg.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut conn = Connection::new(Uuid::new_v4().to_string());
    info!("New connection: {}", conn.peer_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => conn.handle(&state, client_msg),
                        Err(e) => {
                            warn!("Invalid message from {}: {}", conn.peer_id, e);
                            Some(ServerMessage::Error { message: format!("Invalid message: {}", e) })
                        }
                    },
                    Some(Ok(Message::Binary(data))) => conn.handle_binary(&state, &data),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.peer_id, e);
                        break;
                    }
                };
                if let Some(reply) = reply {
                    if !send(&mut sender, &reply).await {
                        break;
                    }
                }
            }

            msg = conn.recv() => {
                match msg {
                    Some(server_msg) => {
                        if !send(&mut sender, &server_msg).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    conn.leave(&state);
    info!("Connection closed: {}", conn.peer_id);
}
