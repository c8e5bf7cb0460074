//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::presence::PeerPruning;
use crate::reconcile::AssetDeletion;
use crate::throttle::{
    DEFAULT_DOCUMENT_THROTTLE_MS, DEFAULT_PERSIST_THROTTLE_MS, DEFAULT_PRESENCE_THROTTLE_MS,
};

/// Where to connect and which room to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3030/ws".to_string(),
            room: "playground:1".to_string(),
            token: None,
        }
    }
}

/// Settings for a [`CollaborationSession`](crate::session::CollaborationSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Window for applying shared-document updates to the canvas.
    pub document_throttle_ms: u64,
    /// Window for applying peer presence to the canvas.
    pub presence_throttle_ms: u64,
    /// Window for persisting local canvas changes.
    pub persist_throttle_ms: u64,
    pub asset_deletion: AssetDeletion,
    pub peer_pruning: PeerPruning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            document_throttle_ms: DEFAULT_DOCUMENT_THROTTLE_MS,
            presence_throttle_ms: DEFAULT_PRESENCE_THROTTLE_MS,
            persist_throttle_ms: DEFAULT_PERSIST_THROTTLE_MS,
            asset_deletion: AssetDeletion::default(),
            peer_pruning: PeerPruning::default(),
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; omitted fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.endpoint.room.is_empty() {
            return Err(SyncError::Config("room name must not be empty".to_string()));
        }
        if self.endpoint.url.is_empty() {
            return Err(SyncError::Config("endpoint url must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.document_throttle_ms, 200);
        assert_eq!(config.presence_throttle_ms, 100);
        assert_eq!(config.peer_pruning, PeerPruning::StaleAfter { millis: 2000 });
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "endpoint": { "url": "ws://relay:1235/ws", "room": "board", "token": "super-secret-token" },
            "asset_deletion": "propagate",
            "peer_pruning": { "mode": "disabled" }
        }"#;
        let config = SessionConfig::from_json(json).unwrap();
        assert_eq!(config.endpoint.token.as_deref(), Some("super-secret-token"));
        assert_eq!(config.asset_deletion, AssetDeletion::Propagate);
        assert_eq!(config.peer_pruning, PeerPruning::Disabled);
        assert_eq!(config.persist_throttle_ms, 100);
    }

    #[test]
    fn test_empty_room_is_rejected() {
        let json = r#"{ "endpoint": { "url": "ws://x/ws", "room": "" } }"#;
        assert!(matches!(SessionConfig::from_json(json), Err(SyncError::Config(_))));
    }
}
