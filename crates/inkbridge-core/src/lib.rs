//! InkBridge Core Library
//!
//! Keeps a drawing canvas and a shared Loro document in step, and carries
//! peer cursors and selections between canvases.

pub mod canvas;
pub mod client;
pub mod config;
pub mod crdt;
pub mod drawable;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod throttle;

pub use canvas::{CanvasDocument, CanvasEngine};
#[cfg(not(target_arch = "wasm32"))]
pub use client::{NativeWebSocket, PlatformWebSocket};
pub use config::{Endpoint, SessionConfig};
pub use crdt::CrdtDocument;
pub use drawable::{Drawable, DrawableId, RecordKind};
pub use error::{CanvasError, CanvasResult, SyncError, SyncResult};
pub use presence::{AwarenessBridge, LocalPresence, PeerPruning, PresenceColor, PresencePayload, UserPresence};
pub use protocol::{ClientMessage, ConnectionState, ServerMessage, SyncEvent};
pub use reconcile::{AssetDeletion, InboundReport, OutboundReconciler, OutboundReport, PersistOutcome};
pub use session::{CollaborationSession, TickReport};
pub use throttle::Throttle;
