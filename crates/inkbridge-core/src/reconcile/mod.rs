//! Reconciliation between the canvas and the shared document.
//!
//! - [`inbound`]: shared document → canvas (create/update/delete).
//! - [`outbound`]: canvas → shared document (set/delete inside one commit
//!   per record kind).
//!
//! Both directions compare records by structural equality, so running a
//! pass against already-converged state performs no operations.

pub mod inbound;
pub mod outbound;

pub use inbound::{InboundReport, reconcile_assets, reconcile_inbound, reconcile_shapes};
pub use outbound::{OutboundReconciler, OutboundReport, PersistOutcome, SkipReason};

use serde::{Deserialize, Serialize};

/// Whether asset removals travel between the canvas and the shared document.
///
/// `Retain` treats assets as append/update-only: a removed asset stays in
/// the shared document and on every other canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetDeletion {
    #[default]
    Retain,
    Propagate,
}
