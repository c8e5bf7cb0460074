//! Awareness bridge between peer presence broadcasts and canvas users.
//!
//! ```text
//! local cursor/selection change
//!       │
//!       ▼
//! AwarenessBridge::publish()   (color + timestamp attached)
//!       │
//!       ▼   (relay broadcast, fire-and-forget)
//! remote AwarenessBridge::receive()
//!       │  (throttled by the session)
//!       ▼
//! AwarenessBridge::apply()  →  CanvasEngine::update_users / remove_user
//! ```
//!
//! Presence never enters the shared document.

use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::canvas::CanvasEngine;
use crate::drawable::DrawableId;
use crate::error::CanvasResult;

/// Awareness connection id of a peer (its Loro peer id).
pub type ConnectionId = u64;

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Status of a user as shown by the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Connected,
    Idle,
    Disconnected,
}

/// A remote user in the canvas's user-presence model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub id: String,
    pub point: Point,
    pub selected_ids: Vec<DrawableId>,
    pub color: String,
    pub status: UserStatus,
    pub active_shapes: Vec<DrawableId>,
    pub session: bool,
}

/// Presence the canvas reports for the local user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalPresence {
    pub user_id: String,
    pub point: Point,
    pub selected_ids: Vec<DrawableId>,
    /// Whether the user is in the middle of an interaction (drag, draw).
    pub session: bool,
}

/// Presence payload published by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// The user's id inside its own canvas.
    pub user_id: String,
    pub point: Point,
    #[serde(default)]
    pub selected_ids: Vec<DrawableId>,
    pub color: String,
    #[serde(default)]
    pub session: bool,
    /// Sender's clock when published, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Ephemeral per-peer state, bound to the peer's live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresence {
    pub peer_id: ConnectionId,
    /// Relay connection the state arrived on.
    pub connection: String,
    pub presence: Option<PresencePayload>,
    /// Local receive time, milliseconds since the Unix epoch.
    pub last_seen: u64,
}

impl PeerPresence {
    /// Canvas user id for this peer.
    pub fn user_id(&self) -> String {
        self.peer_id.to_string()
    }

    fn to_user(&self, payload: &PresencePayload) -> UserPresence {
        UserPresence {
            id: self.user_id(),
            point: payload.point,
            selected_ids: payload.selected_ids.clone(),
            color: payload.color.clone(),
            status: UserStatus::Connected,
            active_shapes: Vec::new(),
            session: payload.session,
        }
    }
}

/// Policy for dropping peers whose presence has not been refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PeerPruning {
    Disabled,
    StaleAfter { millis: u64 },
}

impl Default for PeerPruning {
    fn default() -> Self {
        PeerPruning::StaleAfter { millis: 2000 }
    }
}

impl PeerPruning {
    /// Whether a peer last seen at `last_seen` is stale at `now_ms`.
    pub fn is_stale(&self, last_seen: u64, now_ms: u64) -> bool {
        match self {
            PeerPruning::Disabled => false,
            PeerPruning::StaleAfter { millis } => now_ms.saturating_sub(last_seen) > *millis,
        }
    }

    /// How often an idle peer re-sends its presence to stay visible.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self {
            PeerPruning::Disabled => None,
            PeerPruning::StaleAfter { millis } => Some(Duration::from_millis((*millis / 2).max(1))),
        }
    }
}

/// Cursor color chosen once per session (RGB8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PresenceColor {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pick a light, saturated-enough color from a UUID.
    /// Each channel falls in `100..228`.
    pub fn from_uuid(id: Uuid) -> Self {
        let bytes = id.as_bytes();
        let channel = |b: u8| 100 + (b % 128);
        Self::new(channel(bytes[0]), channel(bytes[7]), channel(bytes[15]))
    }

    /// A fresh random session color.
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Hex form, e.g. `#a0c4e2`.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for PresenceColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b)
    }
}

impl From<PresenceColor> for Color {
    fn from(color: PresenceColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, 255)
    }
}

/// Outcome of one inbound presence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceReport {
    pub updated: usize,
    pub removed: usize,
}

impl PresenceReport {
    pub fn is_empty(&self) -> bool {
        self.updated == 0 && self.removed == 0
    }
}

/// Translates peer presence into canvas users and local changes into
/// outbound payloads.
pub struct AwarenessBridge {
    local_peer: ConnectionId,
    color: PresenceColor,
    pruning: PeerPruning,
    peers: HashMap<ConnectionId, PeerPresence>,
    /// Canvas user ids queued for removal.
    pending_removals: Vec<String>,
}

impl AwarenessBridge {
    pub fn new(local_peer: ConnectionId, pruning: PeerPruning) -> Self {
        Self::with_color(local_peer, pruning, PresenceColor::random())
    }

    pub fn with_color(local_peer: ConnectionId, pruning: PeerPruning, color: PresenceColor) -> Self {
        Self {
            local_peer,
            color,
            pruning,
            peers: HashMap::new(),
            pending_removals: Vec::new(),
        }
    }

    pub fn local_peer(&self) -> ConnectionId {
        self.local_peer
    }

    pub fn set_local_peer(&mut self, peer: ConnectionId) {
        self.local_peer = peer;
    }

    pub fn color(&self) -> PresenceColor {
        self.color
    }

    pub fn pruning(&self) -> PeerPruning {
        self.pruning
    }

    /// Known peers, local entry excluded.
    pub fn peers(&self) -> impl Iterator<Item = &PeerPresence> {
        self.peers.values().filter(move |p| p.peer_id != self.local_peer)
    }

    /// Record a presence broadcast from a peer, received at `now_ms`.
    pub fn receive(&mut self, connection: String, peer_id: ConnectionId, presence: Option<PresencePayload>, now_ms: u64) {
        self.peers.insert(
            peer_id,
            PeerPresence {
                peer_id,
                connection,
                presence,
                last_seen: now_ms,
            },
        );
    }

    /// Drop every peer that arrived on a relay connection that has closed.
    pub fn peer_left(&mut self, connection: &str) {
        let gone: Vec<ConnectionId> = self
            .peers
            .values()
            .filter(|p| p.connection == connection)
            .map(|p| p.peer_id)
            .collect();
        for peer_id in gone {
            if let Some(peer) = self.peers.remove(&peer_id) {
                log::debug!("Peer {} left (connection {})", peer_id, connection);
                self.pending_removals.push(peer.user_id());
            }
        }
    }

    /// Forget every peer; used when the local connection goes away.
    pub fn clear(&mut self) {
        for (_, peer) in self.peers.drain() {
            self.pending_removals.push(peer.user_id());
        }
    }

    pub fn has_pending_removals(&self) -> bool {
        !self.pending_removals.is_empty()
    }

    /// Build the outbound payload for a local presence change.
    pub fn publish(&self, local: LocalPresence, now_ms: u64) -> PresencePayload {
        PresencePayload {
            user_id: local.user_id,
            point: local.point,
            selected_ids: local.selected_ids,
            color: self.color.to_hex(),
            session: local.session,
            timestamp: now_ms,
        }
    }

    /// Push the peer table into the canvas as one batched update.
    ///
    /// Queued removals go first. The local peer and peers without a payload
    /// are skipped; stale peers are removed per the pruning policy.
    pub fn apply<C: CanvasEngine + ?Sized>(&mut self, canvas: &mut C, now_ms: u64) -> CanvasResult<PresenceReport> {
        let mut report = PresenceReport::default();

        while let Some(id) = self.pending_removals.last().cloned() {
            canvas.remove_user(&id)?;
            self.pending_removals.pop();
            report.removed += 1;
        }

        let mut ordered: Vec<&PeerPresence> = self.peers.values().collect();
        ordered.sort_by_key(|p| p.peer_id);

        let mut users = Vec::new();
        let mut stale = Vec::new();
        for peer in ordered {
            if peer.peer_id == self.local_peer {
                continue;
            }
            let Some(payload) = &peer.presence else {
                continue;
            };
            if self.pruning.is_stale(peer.last_seen, now_ms) {
                stale.push(peer.peer_id);
            } else {
                users.push(peer.to_user(payload));
            }
        }

        for peer_id in stale {
            canvas.remove_user(&peer_id.to_string())?;
            self.peers.remove(&peer_id);
            report.removed += 1;
        }

        if !users.is_empty() {
            report.updated = users.len();
            canvas.update_users(users)?;
        }

        Ok(report)
    }
}
