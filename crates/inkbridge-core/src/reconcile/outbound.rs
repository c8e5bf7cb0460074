//! Canvas → shared document.

use std::collections::{HashMap, HashSet};

use super::AssetDeletion;
use crate::canvas::CanvasEngine;
use crate::crdt::CrdtDocument;
use crate::drawable::{Drawable, DrawableId, RecordKind};
use crate::error::SyncResult;

/// Writes performed by one outbound pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboundReport {
    pub shapes_written: usize,
    pub shapes_deleted: usize,
    pub assets_written: usize,
    pub assets_deleted: usize,
}

impl OutboundReport {
    pub fn is_empty(&self) -> bool {
        self.shapes_written + self.shapes_deleted + self.assets_written + self.assets_deleted == 0
    }
}

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The canvas is still loading.
    Loading,
    /// No shared document is bound yet.
    NoDocument,
}

/// Result of a persistence trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Skipped(SkipReason),
    /// The document already matched the canvas.
    Unchanged,
    Committed(OutboundReport),
    /// An error was logged and the pass abandoned.
    Failed,
}

/// Copies canvas state into the shared document.
///
/// Keeps, per record, the value both sides last agreed on. A pass writes
/// only records the canvas changed since then, so remote edits imported
/// into the document but not yet applied to the canvas are never written
/// back over. A tracked shape removed locally is deleted from the document
/// on the next pass, while shapes added by other peers and not yet applied
/// locally are left alone.
#[derive(Debug, Default)]
pub struct OutboundReconciler {
    synced_shapes: HashMap<DrawableId, Drawable>,
    synced_assets: HashMap<DrawableId, Drawable>,
    asset_deletion: AssetDeletion,
}

impl OutboundReconciler {
    pub fn new(asset_deletion: AssetDeletion) -> Self {
        Self {
            synced_shapes: HashMap::new(),
            synced_assets: HashMap::new(),
            asset_deletion,
        }
    }

    pub fn asset_deletion(&self) -> AssetDeletion {
        self.asset_deletion
    }

    /// Shape ids seen on the last successful pass.
    pub fn tracked_shapes(&self) -> impl Iterator<Item = &DrawableId> {
        self.synced_shapes.keys()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.synced_shapes.contains_key(id)
    }

    /// Asset ids seen on the last successful pass. Only `Propagate` deletes them.
    pub fn tracked_assets(&self) -> impl Iterator<Item = &DrawableId> {
        self.synced_assets.keys()
    }

    /// Forget tracked ids, e.g. when a different document is bound.
    pub fn reset(&mut self) {
        self.synced_shapes.clear();
        self.synced_assets.clear();
    }

    /// Record the canvas as in step with `doc` after an inbound pass.
    ///
    /// Only records equal on both sides count as synced, so local records
    /// the document has not seen yet still go out on the next pass.
    pub fn mark_synced<C: CanvasEngine + ?Sized>(&mut self, canvas: &C, doc: &CrdtDocument) {
        self.synced_shapes = agreed(doc, RecordKind::Shape, canvas.shapes());
        self.synced_assets = agreed(doc, RecordKind::Asset, canvas.assets());
    }

    /// Run one pass: shapes in one commit, then assets in another.
    ///
    /// Errors are logged and swallowed; the next trigger tries again.
    pub fn persist<C: CanvasEngine + ?Sized>(&mut self, canvas: &C, doc: Option<&CrdtDocument>) -> PersistOutcome {
        if canvas.is_loading() {
            log::debug!("Canvas is loading, nothing to persist");
            return PersistOutcome::Skipped(SkipReason::Loading);
        }
        let Some(doc) = doc else {
            log::debug!("No shared document bound, nothing to persist");
            return PersistOutcome::Skipped(SkipReason::NoDocument);
        };

        let mut report = OutboundReport::default();

        if let Err(e) = self.persist_shapes(doc, canvas.shapes(), &mut report) {
            log::error!("Failed to persist shapes: {}", e);
            return PersistOutcome::Failed;
        }
        if let Err(e) = self.persist_assets(doc, canvas.assets(), &mut report) {
            log::error!("Failed to persist assets: {}", e);
            return PersistOutcome::Failed;
        }

        if report.is_empty() {
            PersistOutcome::Unchanged
        } else {
            log::debug!("Persisted {:?}", report);
            PersistOutcome::Committed(report)
        }
    }

    fn persist_shapes(&mut self, doc: &CrdtDocument, shapes: Vec<Drawable>, report: &mut OutboundReport) -> SyncResult<()> {
        let current: HashSet<&str> = shapes.iter().map(|s| s.id.as_str()).collect();

        let mut deleted = 0;
        for id in self.synced_shapes.keys().filter(|id| !current.contains(id.as_str())) {
            if doc.delete(RecordKind::Shape, id)? {
                log::debug!("Deleting shape {} from shared document", id);
                deleted += 1;
            }
        }
        let written = write_changed(doc, RecordKind::Shape, &shapes, &self.synced_shapes)?;

        if deleted + written > 0 {
            doc.commit();
        }
        self.synced_shapes = by_id(shapes);
        report.shapes_deleted = deleted;
        report.shapes_written = written;
        Ok(())
    }

    fn persist_assets(&mut self, doc: &CrdtDocument, assets: Vec<Drawable>, report: &mut OutboundReport) -> SyncResult<()> {
        let mut deleted = 0;
        if self.asset_deletion == AssetDeletion::Propagate {
            let current: HashSet<&str> = assets.iter().map(|a| a.id.as_str()).collect();
            for id in self.synced_assets.keys().filter(|id| !current.contains(id.as_str())) {
                if doc.delete(RecordKind::Asset, id)? {
                    deleted += 1;
                }
            }
        }
        let written = write_changed(doc, RecordKind::Asset, &assets, &self.synced_assets)?;

        if deleted + written > 0 {
            doc.commit();
        }
        self.synced_assets = by_id(assets);
        report.assets_deleted = deleted;
        report.assets_written = written;
        Ok(())
    }
}

fn by_id(records: Vec<Drawable>) -> HashMap<DrawableId, Drawable> {
    records.into_iter().map(|d| (d.id.clone(), d)).collect()
}

fn stored(doc: &CrdtDocument, kind: RecordKind) -> HashMap<DrawableId, Drawable> {
    by_id(doc.records(kind))
}

/// Canvas records that match the document exactly.
fn agreed(doc: &CrdtDocument, kind: RecordKind, records: Vec<Drawable>) -> HashMap<DrawableId, Drawable> {
    let stored = stored(doc, kind);
    records
        .into_iter()
        .filter(|record| stored.get(&record.id) == Some(record))
        .map(|record| (record.id.clone(), record))
        .collect()
}

/// Set every record changed since the last sync that differs from the document.
fn write_changed(
    doc: &CrdtDocument,
    kind: RecordKind,
    records: &[Drawable],
    synced: &HashMap<DrawableId, Drawable>,
) -> SyncResult<usize> {
    let stored = stored(doc, kind);

    let mut written = 0;
    for record in records {
        if synced.get(&record.id) == Some(record) {
            continue;
        }
        if stored.get(&record.id) != Some(record) {
            doc.set(kind, record)?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasDocument;
    use serde_json::json;

    fn shape(id: &str) -> Drawable {
        Drawable::new(id)
            .with_field("type", "rectangle")
            .with_field("size", json!([10, 10]))
    }

    #[test]
    fn test_skips_while_loading() {
        let mut canvas = CanvasDocument::new();
        canvas.add_shape(shape("a"));
        canvas.set_loading(true);
        let doc = CrdtDocument::new();
        let mut outbound = OutboundReconciler::default();

        assert_eq!(
            outbound.persist(&canvas, Some(&doc)),
            PersistOutcome::Skipped(SkipReason::Loading)
        );
        assert!(doc.is_empty(RecordKind::Shape));
        assert_eq!(outbound.tracked_shapes().count(), 0);
    }

    #[test]
    fn test_skips_without_document() {
        let canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::default();
        assert_eq!(
            outbound.persist(&canvas, None),
            PersistOutcome::Skipped(SkipReason::NoDocument)
        );
    }

    #[test]
    fn test_inserts_then_is_idempotent() {
        let mut canvas = CanvasDocument::new();
        canvas.add_shape(shape("a"));
        canvas.add_shape(shape("b"));
        let doc = CrdtDocument::new();
        let mut outbound = OutboundReconciler::default();

        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => assert_eq!(report.shapes_written, 2),
            other => panic!("Expected a commit, got {:?}", other),
        }
        let version = doc.version();

        assert_eq!(outbound.persist(&canvas, Some(&doc)), PersistOutcome::Unchanged);
        assert_eq!(doc.version(), version);
    }

    #[test]
    fn test_only_changed_records_are_written() {
        let mut canvas = CanvasDocument::new();
        canvas.add_shape(shape("a"));
        canvas.add_shape(shape("b"));
        let doc = CrdtDocument::new();
        let mut outbound = OutboundReconciler::default();
        outbound.persist(&canvas, Some(&doc));

        canvas.add_shape(shape("b").with_field("size", json!([20, 10])));
        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => {
                assert_eq!(report.shapes_written, 1);
                assert_eq!(report.shapes_deleted, 0);
            }
            other => panic!("Expected a commit, got {:?}", other),
        }
        assert_eq!(doc.get(RecordKind::Shape, "b"), canvas.get_shape("b").cloned());
    }

    #[test]
    fn test_untracked_remote_shapes_survive() {
        let doc = CrdtDocument::new();
        doc.set(RecordKind::Shape, &shape("remote")).unwrap();
        doc.commit();

        let mut canvas = CanvasDocument::new();
        canvas.add_shape(shape("local"));
        let mut outbound = OutboundReconciler::default();
        outbound.persist(&canvas, Some(&doc));

        assert!(doc.contains(RecordKind::Shape, "remote"));
        assert!(doc.contains(RecordKind::Shape, "local"));
    }

    #[test]
    fn test_tracked_ids_follow_consecutive_passes() {
        let doc = CrdtDocument::new();
        let mut canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::default();

        canvas.add_shape(shape("a"));
        canvas.add_shape(shape("b"));
        outbound.persist(&canvas, Some(&doc));

        canvas.remove_shape("a");
        canvas.add_shape(shape("c"));
        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => {
                assert_eq!(report.shapes_deleted, 1);
                assert_eq!(report.shapes_written, 1);
            }
            other => panic!("Expected a commit, got {:?}", other),
        }

        // A second pass over the same state deletes nothing twice.
        assert_eq!(outbound.persist(&canvas, Some(&doc)), PersistOutcome::Unchanged);
        let mut tracked: Vec<_> = outbound.tracked_shapes().cloned().collect();
        tracked.sort();
        assert_eq!(tracked, vec!["b", "c"]);
    }

    #[test]
    fn test_assets_retained_by_default() {
        let doc = CrdtDocument::new();
        let mut canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::new(AssetDeletion::Retain);

        canvas.add_asset(Drawable::new("asset:1").with_field("type", "image"));
        outbound.persist(&canvas, Some(&doc));
        canvas.remove_asset("asset:1");

        assert_eq!(outbound.persist(&canvas, Some(&doc)), PersistOutcome::Unchanged);
        assert!(doc.contains(RecordKind::Asset, "asset:1"));
    }

    #[test]
    fn test_assets_deleted_when_propagating() {
        let doc = CrdtDocument::new();
        let mut canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::new(AssetDeletion::Propagate);

        canvas.add_asset(Drawable::new("asset:1").with_field("type", "image"));
        outbound.persist(&canvas, Some(&doc));
        canvas.remove_asset("asset:1");

        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => assert_eq!(report.assets_deleted, 1),
            other => panic!("Expected a commit, got {:?}", other),
        }
        assert!(!doc.contains(RecordKind::Asset, "asset:1"));
    }

    #[test]
    fn test_pending_remote_edit_is_not_written_back() {
        let doc = CrdtDocument::new();
        let mut canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::default();
        canvas.add_shape(shape("a"));
        canvas.add_shape(shape("b"));
        outbound.persist(&canvas, Some(&doc));

        // Another peer moved `a` and deleted `b`; the canvas has not caught up.
        let moved = shape("a").with_field("point", json!([50, 0]));
        doc.set(RecordKind::Shape, &moved).unwrap();
        doc.delete(RecordKind::Shape, "b").unwrap();
        doc.commit();

        canvas.add_shape(shape("c"));
        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => {
                assert_eq!(report.shapes_written, 1);
                assert_eq!(report.shapes_deleted, 0);
            }
            other => panic!("Expected a commit, got {:?}", other),
        }
        assert_eq!(doc.get(RecordKind::Shape, "a"), Some(moved));
        assert!(!doc.contains(RecordKind::Shape, "b"));
    }

    #[test]
    fn test_mark_synced_tracks_remote_shapes_only_when_equal() {
        let doc = CrdtDocument::new();
        doc.set(RecordKind::Shape, &shape("remote")).unwrap();
        doc.commit();

        let mut canvas = CanvasDocument::new();
        canvas.add_shape(shape("remote"));
        canvas.add_shape(shape("local"));
        let mut outbound = OutboundReconciler::default();
        outbound.mark_synced(&canvas, &doc);

        assert!(outbound.is_tracked("remote"));
        assert!(!outbound.is_tracked("local"));
        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => assert_eq!(report.shapes_written, 1),
            other => panic!("Expected a commit, got {:?}", other),
        }
        assert!(doc.contains(RecordKind::Shape, "local"));
    }

    #[test]
    fn test_failed_pass_keeps_tracked_ids_and_recovers() {
        let doc = CrdtDocument::new();
        let mut canvas = CanvasDocument::new();
        let mut outbound = OutboundReconciler::default();
        canvas.add_shape(shape("a"));
        outbound.persist(&canvas, Some(&doc));

        // A detached document refuses edits.
        let frontiers = doc.loro_doc().state_frontiers();
        doc.loro_doc().checkout(&frontiers).unwrap();
        canvas.add_shape(shape("b"));
        assert_eq!(outbound.persist(&canvas, Some(&doc)), PersistOutcome::Failed);
        let tracked: Vec<_> = outbound.tracked_shapes().cloned().collect();
        assert_eq!(tracked, vec!["a"]);

        doc.loro_doc().checkout_to_latest();
        match outbound.persist(&canvas, Some(&doc)) {
            PersistOutcome::Committed(report) => assert_eq!(report.shapes_written, 1),
            other => panic!("Expected a commit, got {:?}", other),
        }
        assert!(doc.contains(RecordKind::Shape, "b"));
    }
}
