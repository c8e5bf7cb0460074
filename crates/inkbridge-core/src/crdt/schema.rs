//! Loro document schema and operations.

use loro::{ExportMode, LoroDoc, LoroMap, LoroResult, LoroValue, VersionVector};

use super::convert::{drawable_from_loro, drawable_to_loro};
use crate::drawable::{Drawable, RecordKind};
use crate::error::{SyncError, SyncResult};

/// Key for the shapes map in the document.
pub const SHAPES_KEY: &str = "shapes";
/// Key for the assets map in the document.
pub const ASSETS_KEY: &str = "assets";

/// A CRDT-backed document holding the shared shape and asset records.
///
/// Writes accumulate in Loro's pending transaction until [`commit`] is
/// called; each commit becomes one change, visible to exports and peers.
///
/// [`commit`]: CrdtDocument::commit
pub struct CrdtDocument {
    doc: LoroDoc,
}

impl CrdtDocument {
    /// Create a new empty CRDT document.
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Create a CRDT document from a snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> LoroResult<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)?;
        Ok(Self { doc })
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    /// Peer id of this replica; doubles as the awareness connection id.
    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    fn collection(&self, kind: RecordKind) -> LoroMap {
        self.doc.get_map(kind.collection())
    }

    /// Number of records of the given kind.
    pub fn len(&self, kind: RecordKind) -> usize {
        self.collection(kind).len()
    }

    pub fn is_empty(&self, kind: RecordKind) -> bool {
        self.len(kind) == 0
    }

    /// Whether a record with this id exists.
    pub fn contains(&self, kind: RecordKind, id: &str) -> bool {
        self.collection(kind).get(id).is_some()
    }

    /// Get a record by id.
    pub fn get(&self, kind: RecordKind, id: &str) -> Option<Drawable> {
        match self.collection(kind).get_deep_value() {
            LoroValue::Map(map) => map.get(id).and_then(drawable_from_loro),
            _ => None,
        }
    }

    /// Snapshot of every record of the given kind, unordered.
    pub fn records(&self, kind: RecordKind) -> Vec<Drawable> {
        match self.collection(kind).get_deep_value() {
            LoroValue::Map(map) => map
                .values()
                .filter_map(|value| {
                    let record = drawable_from_loro(value);
                    if record.is_none() {
                        log::warn!("Skipping malformed {:?} record in shared document", kind);
                    }
                    record
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Insert or overwrite a record. Not committed.
    pub fn set(&self, kind: RecordKind, drawable: &Drawable) -> LoroResult<()> {
        let map = self.collection(kind);
        if map.get(&drawable.id).is_some() {
            map.delete(&drawable.id)?;
        }
        let record = map.insert_container(&drawable.id, LoroMap::new())?;
        drawable_to_loro(drawable, &record)
    }

    /// Delete a record. Returns false if it was not present. Not committed.
    pub fn delete(&self, kind: RecordKind, id: &str) -> LoroResult<bool> {
        let map = self.collection(kind);
        if map.get(id).is_none() {
            return Ok(false);
        }
        map.delete(id)?;
        Ok(true)
    }

    /// Commit pending writes as one transaction.
    pub fn commit(&self) {
        self.doc.commit();
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> SyncResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Export incremental updates since a version.
    pub fn export_updates(&self, since: &VersionVector) -> SyncResult<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Import a snapshot or updates from another replica.
    pub fn import(&self, bytes: &[u8]) -> LoroResult<()> {
        self.doc.import(bytes)?;
        Ok(())
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}
