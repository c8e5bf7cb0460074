//! Room state shared by every connection.

use std::collections::HashSet;
use std::sync::Mutex;

use dashmap::DashMap;
use inkbridge_core::protocol::{ServerMessage, base64_encode};
use inkbridge_core::{CrdtDocument, SyncError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ServerConfig;

/// A broadcast entry: sending connection id and the message.
pub type RoomMessage = (String, ServerMessage);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid room token")]
    Unauthorized,
    #[error("Not in a room")]
    NotInRoom,
    #[error("Presence for peer {claimed} refused, connection speaks for peer {bound}")]
    PeerMismatch { bound: u64, claimed: u64 },
    #[error("Room document lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Room state
struct Room {
    tx: broadcast::Sender<RoomMessage>,
    peers: HashSet<String>,
    /// Every update relayed in this room, merged.
    doc: Mutex<CrdtDocument>,
    has_history: bool,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashSet::new(),
            doc: Mutex::new(CrdtDocument::new()),
            has_history: false,
        }
    }

    fn snapshot(&self) -> Result<Option<String>, RelayError> {
        if !self.has_history {
            return Ok(None);
        }
        let doc = self.doc.lock().map_err(|_| RelayError::Poisoned)?;
        Ok(Some(base64_encode(&doc.export_snapshot()?)))
    }
}

/// What a connection gets back from a successful join.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomMessage>,
    pub peer_count: usize,
    pub initial_sync: Option<String>,
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    token: Option<String>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            token: config.token.clone(),
            channel_capacity: config.channel_capacity,
        }
    }

    pub fn authorize(&self, token: Option<&str>) -> Result<(), RelayError> {
        match &self.token {
            Some(expected) if token != Some(expected.as_str()) => Err(RelayError::Unauthorized),
            _ => Ok(()),
        }
    }

    /// Add a peer to a room, creating the room on first join.
    pub fn join_room(&self, room_id: &str, peer_id: &str) -> Result<Joined, RelayError> {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.channel_capacity));
        let initial_sync = room.snapshot()?;
        room.peers.insert(peer_id.to_string());
        Ok(Joined {
            rx: room.tx.subscribe(),
            peer_count: room.peers.len(),
            initial_sync,
        })
    }

    /// Remove a peer; the room is dropped once empty.
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        let emptied = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.peers.remove(peer_id);
                room.peers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.close_if_empty(room_id);
        }
    }

    /// Drop the room unless someone joined since it was seen empty.
    fn close_if_empty(&self, room_id: &str) -> bool {
        let closed = self.rooms.remove_if(room_id, |_, room| room.peers.is_empty()).is_some();
        if closed {
            debug!("Room {} closed", room_id);
        }
        closed
    }

    /// Merge an update into the room document. Malformed updates are rejected
    /// and must not be relayed.
    pub fn apply_sync(&self, room_id: &str, bytes: &[u8]) -> Result<(), RelayError> {
        let mut room = self.rooms.get_mut(room_id).ok_or(RelayError::NotInRoom)?;
        {
            let doc = room.doc.lock().map_err(|_| RelayError::Poisoned)?;
            doc.import(bytes).map_err(SyncError::from)?;
        }
        room.has_history = true;
        Ok(())
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }
}
