//! Error types shared across the crate.

use loro::LoroError;
use thiserror::Error;

/// Errors reported by a canvas engine while applying operations.
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Canvas is not mounted")]
    NotMounted,
    #[error("Unknown drawable: {0}")]
    UnknownDrawable(String),
    #[error("Canvas rejected operation: {0}")]
    Rejected(String),
}

/// Result type for canvas operations.
pub type CanvasResult<T> = Result<T, CanvasError>;

/// Errors raised while synchronizing a canvas with the shared document.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("CRDT error: {0}")]
    Crdt(#[from] LoroError),
    #[error("Failed to encode document: {0}")]
    Encode(String),
    #[error("Canvas error: {0}")]
    Canvas(#[from] CanvasError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("Invalid payload: {0}")]
    Payload(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
