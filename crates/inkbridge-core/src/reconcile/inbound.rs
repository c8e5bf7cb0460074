//! Shared document → canvas.

use std::collections::BTreeMap;

use super::AssetDeletion;
use crate::canvas::CanvasEngine;
use crate::crdt::CrdtDocument;
use crate::drawable::{Drawable, DrawableId, RecordKind};
use crate::error::CanvasResult;

/// Operations issued by one inbound pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InboundReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub assets_patched: usize,
    pub assets_deleted: usize,
}

impl InboundReport {
    pub fn is_empty(&self) -> bool {
        self.created + self.updated + self.deleted + self.assets_patched + self.assets_deleted == 0
    }
}

/// Make the canvas match the document's shapes and assets.
pub fn reconcile_inbound<C: CanvasEngine + ?Sized>(
    canvas: &mut C,
    doc: &CrdtDocument,
    asset_deletion: AssetDeletion,
) -> CanvasResult<InboundReport> {
    let mut report = InboundReport::default();
    reconcile_shapes(canvas, doc.records(RecordKind::Shape), &mut report)?;
    reconcile_assets(canvas, doc.records(RecordKind::Asset), asset_deletion, &mut report)?;
    Ok(report)
}

fn index(records: Vec<Drawable>) -> BTreeMap<DrawableId, Drawable> {
    records.into_iter().map(|d| (d.id.clone(), d)).collect()
}

/// Diff the canvas shapes against a shared snapshot and apply the minimal
/// updates, then one batched delete, then creates in id order.
///
/// A canvas error aborts the rest of the pass; operations already issued
/// stay applied.
pub fn reconcile_shapes<C: CanvasEngine + ?Sized>(
    canvas: &mut C,
    shared: Vec<Drawable>,
    report: &mut InboundReport,
) -> CanvasResult<()> {
    // Entries left in `unseen` after the scan are creations.
    let mut unseen = index(shared);
    let mut to_update = Vec::new();
    let mut to_delete = Vec::new();

    for local in canvas.shapes() {
        match unseen.remove(&local.id) {
            Some(remote) if remote != local => to_update.push(remote),
            Some(_) => {}
            None => to_delete.push(local.id),
        }
    }

    if !to_update.is_empty() {
        log::debug!("Updating {} shapes from shared document", to_update.len());
        let count = to_update.len();
        canvas.update_shapes(to_update)?;
        report.updated += count;
    }

    if !to_delete.is_empty() {
        log::debug!("Deleting {} shapes removed from shared document", to_delete.len());
        canvas.delete_shapes(&to_delete)?;
        report.deleted += to_delete.len();
    }

    if !unseen.is_empty() {
        let created: Vec<Drawable> = unseen.into_values().collect();
        log::debug!("Creating {} shapes from shared document", created.len());
        let count = created.len();
        canvas.create_shapes(created)?;
        report.created += count;
    }

    Ok(())
}

/// Patch changed and new assets in one call. Local assets missing from the
/// snapshot are removed only under [`AssetDeletion::Propagate`].
pub fn reconcile_assets<C: CanvasEngine + ?Sized>(
    canvas: &mut C,
    shared: Vec<Drawable>,
    asset_deletion: AssetDeletion,
    report: &mut InboundReport,
) -> CanvasResult<()> {
    let mut unseen = index(shared);
    let mut to_patch = Vec::new();
    let mut missing = Vec::new();

    for local in canvas.assets() {
        match unseen.remove(&local.id) {
            Some(remote) if remote != local => to_patch.push(remote),
            Some(_) => {}
            None => missing.push(local.id),
        }
    }
    to_patch.extend(unseen.into_values());

    if !to_patch.is_empty() {
        let count = to_patch.len();
        canvas.patch_assets(to_patch)?;
        report.assets_patched += count;
    }

    if asset_deletion == AssetDeletion::Propagate && !missing.is_empty() {
        missing.sort();
        canvas.delete_assets(&missing)?;
        report.assets_deleted += missing.len();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasDocument;
    use crate::error::CanvasError;
    use crate::presence::UserPresence;
    use serde_json::json;

    /// Records every engine call; can be told to fail on a given call.
    #[derive(Default)]
    struct RecordingCanvas {
        inner: CanvasDocument,
        calls: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl RecordingCanvas {
        fn call(&mut self, name: &'static str) -> CanvasResult<()> {
            self.calls.push(name);
            if self.fail_on == Some(name) {
                return Err(CanvasError::Rejected(name.to_string()));
            }
            Ok(())
        }
    }

    impl CanvasEngine for RecordingCanvas {
        fn is_loading(&self) -> bool {
            self.inner.is_loading()
        }
        fn shapes(&self) -> Vec<Drawable> {
            self.inner.shapes()
        }
        fn assets(&self) -> Vec<Drawable> {
            self.inner.assets()
        }
        fn create_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()> {
            self.call("create")?;
            self.inner.create_shapes(shapes)
        }
        fn update_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()> {
            self.call("update")?;
            self.inner.update_shapes(shapes)
        }
        fn delete_shapes(&mut self, ids: &[DrawableId]) -> CanvasResult<()> {
            self.call("delete")?;
            self.inner.delete_shapes(ids)
        }
        fn patch_assets(&mut self, assets: Vec<Drawable>) -> CanvasResult<()> {
            self.call("patch_assets")?;
            self.inner.patch_assets(assets)
        }
        fn delete_assets(&mut self, ids: &[DrawableId]) -> CanvasResult<()> {
            self.call("delete_assets")?;
            self.inner.delete_assets(ids)
        }
        fn update_users(&mut self, users: Vec<UserPresence>) -> CanvasResult<()> {
            self.inner.update_users(users)
        }
        fn remove_user(&mut self, id: &str) -> CanvasResult<()> {
            self.inner.remove_user(id)
        }
    }

    fn shape(id: &str, x: i64) -> Drawable {
        Drawable::new(id)
            .with_field("type", "rectangle")
            .with_field("point", json!([x, 0]))
    }

    #[test]
    fn test_creates_into_empty_canvas() {
        let mut canvas = RecordingCanvas::default();
        let mut report = InboundReport::default();
        reconcile_shapes(&mut canvas, vec![shape("b", 2), shape("a", 1)], &mut report).unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(canvas.calls, vec!["create"]);
        // Creations are issued in id order.
        assert_eq!(canvas.inner.z_order, vec!["a", "b"]);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let shared = vec![shape("a", 1), shape("b", 2)];
        let mut canvas = RecordingCanvas::default();

        let mut first = InboundReport::default();
        reconcile_shapes(&mut canvas, shared.clone(), &mut first).unwrap();
        canvas.calls.clear();

        let mut second = InboundReport::default();
        reconcile_shapes(&mut canvas, shared, &mut second).unwrap();
        assert!(second.is_empty());
        assert!(canvas.calls.is_empty());
    }

    #[test]
    fn test_nested_change_is_one_update() {
        let mut canvas = RecordingCanvas::default();
        let original = shape("a", 1).with_field("style", json!({"color": "black", "size": "s"}));
        canvas.inner.add_shape(original.clone());

        let mut changed = original.clone();
        changed.set_field("style", json!({"color": "black", "size": "l"}));

        let mut report = InboundReport::default();
        reconcile_shapes(&mut canvas, vec![changed.clone()], &mut report).unwrap();

        assert_eq!(report, InboundReport { updated: 1, ..Default::default() });
        assert_eq!(canvas.calls, vec!["update"]);
        assert_eq!(canvas.inner.get_shape("a"), Some(&changed));
    }

    #[test]
    fn test_mixed_pass_orders_update_delete_create() {
        let mut canvas = RecordingCanvas::default();
        canvas.inner.add_shape(shape("keep", 0));
        canvas.inner.add_shape(shape("move", 0));
        canvas.inner.add_shape(shape("gone", 0));

        let shared = vec![shape("keep", 0), shape("move", 5), shape("new", 9)];
        let mut report = InboundReport::default();
        reconcile_shapes(&mut canvas, shared, &mut report).unwrap();

        assert_eq!(canvas.calls, vec!["update", "delete", "create"]);
        assert_eq!((report.updated, report.deleted, report.created), (1, 1, 1));
        let mut ids: Vec<_> = canvas.inner.shapes.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["keep", "move", "new"]);
    }

    #[test]
    fn test_failure_aborts_rest_of_batch() {
        let mut canvas = RecordingCanvas {
            fail_on: Some("delete"),
            ..Default::default()
        };
        canvas.inner.add_shape(shape("gone", 0));

        let mut report = InboundReport::default();
        let result = reconcile_shapes(&mut canvas, vec![shape("new", 1)], &mut report);

        assert!(matches!(result, Err(CanvasError::Rejected(_))));
        assert_eq!(canvas.calls, vec!["delete"]);
        assert!(canvas.inner.get_shape("new").is_none());
        assert_eq!(report.created, 0);
    }

    #[test]
    fn test_assets_are_patched_not_deleted_by_default() {
        let mut canvas = RecordingCanvas::default();
        canvas.inner.add_asset(Drawable::new("asset:old").with_field("type", "image"));
        let changed = Drawable::new("asset:old").with_field("type", "video");
        let fresh = Drawable::new("asset:new").with_field("type", "image");

        let mut report = InboundReport::default();
        reconcile_assets(&mut canvas, vec![changed, fresh], AssetDeletion::Retain, &mut report).unwrap();
        assert_eq!(report.assets_patched, 2);
        assert_eq!(canvas.calls, vec!["patch_assets"]);

        canvas.calls.clear();
        let mut report = InboundReport::default();
        reconcile_assets(&mut canvas, Vec::new(), AssetDeletion::Retain, &mut report).unwrap();
        assert!(report.is_empty());
        assert_eq!(canvas.inner.assets.len(), 2);
    }

    #[test]
    fn test_asset_deletion_propagates_when_enabled() {
        let mut canvas = RecordingCanvas::default();
        canvas.inner.add_asset(Drawable::new("asset:a"));
        canvas.inner.add_asset(Drawable::new("asset:b"));

        let mut report = InboundReport::default();
        reconcile_assets(&mut canvas, vec![Drawable::new("asset:a")], AssetDeletion::Propagate, &mut report)
            .unwrap();
        assert_eq!(report.assets_deleted, 1);
        assert_eq!(canvas.calls, vec!["delete_assets"]);
        assert!(canvas.inner.assets.contains_key("asset:a"));
        assert!(!canvas.inner.assets.contains_key("asset:b"));
    }

    #[test]
    fn test_reconcile_inbound_reads_document() {
        let doc = CrdtDocument::new();
        doc.set(RecordKind::Shape, &shape("a", 1)).unwrap();
        doc.set(RecordKind::Asset, &Drawable::new("asset:a")).unwrap();
        doc.commit();

        let mut canvas = CanvasDocument::new();
        let report = reconcile_inbound(&mut canvas, &doc, AssetDeletion::Retain).unwrap();
        assert_eq!((report.created, report.assets_patched), (1, 1));
        assert_eq!(canvas.get_shape("a"), Some(&shape("a", 1)));
    }
}
