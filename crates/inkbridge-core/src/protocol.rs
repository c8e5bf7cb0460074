//! Relay wire protocol.
//!
//! Messages are JSON objects tagged by `type`:
//! ```json
//! { "type": "join", "room": "playground:1", "token": "secret" }
//! { "type": "sync", "data": "<base64-encoded-loro-update>" }
//! { "type": "awareness", "peer_id": 123, "presence": { "user_id": "...", "point": {"x": 1, "y": 2}, ... } }
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::presence::{ConnectionId, PresencePayload};

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Leave current room
    Leave,
    /// Loro update bytes, base64 encoded
    Sync { data: String },
    /// Presence of the sending peer; `None` clears it
    Awareness {
        peer_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presence: Option<PresencePayload>,
    },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Snapshot of the room document, if it has any history
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    /// Peer joined the room
    PeerJoined { peer_id: String },
    /// Peer left the room
    PeerLeft { peer_id: String },
    /// Update from another peer
    Sync { from: String, data: String },
    /// Presence from another peer
    Awareness {
        from: String,
        peer_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presence: Option<PresencePayload>,
    },
    /// Error message
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// A sync message carrying raw update bytes.
    pub fn sync(bytes: &[u8]) -> Self {
        ClientMessage::Sync {
            data: base64_encode(bytes),
        }
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Decoded events delivered to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected to server
    Connected,
    /// Disconnected from server
    Disconnected,
    /// Joined a room
    JoinedRoom {
        room: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
    },
    /// A peer joined the room
    PeerJoined { peer_id: String },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// Received update bytes from a peer
    SyncReceived { from: String, data: Vec<u8> },
    /// Received presence from a peer
    AwarenessReceived {
        from: String,
        peer_id: ConnectionId,
        presence: Option<PresencePayload>,
    },
    /// Error occurred
    Error { message: String },
}

impl SyncEvent {
    /// Decode a relay message. Undecodable base64 payloads become errors.
    pub fn from_server_message(msg: ServerMessage) -> SyncResult<Self> {
        Ok(match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                initial_sync,
            } => SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync: initial_sync.as_deref().map(base64_decode).transpose()?,
            },
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Sync { from, data } => SyncEvent::SyncReceived {
                from,
                data: base64_decode(&data)?,
            },
            ServerMessage::Awareness {
                from,
                peer_id,
                presence,
            } => SyncEvent::AwarenessReceived {
                from,
                peer_id,
                presence,
            },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        })
    }
}

/// Base64 encoding
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64 decoding
pub fn base64_decode(input: &str) -> SyncResult<Vec<u8>> {
    STANDARD
        .decode(input)
        .map_err(|e| SyncError::Payload(format!("invalid base64: {}", e)))
}
