//! Canvas engine contract and an in-memory canvas document.

use crate::drawable::{Drawable, DrawableId};
use crate::error::{CanvasError, CanvasResult};
use crate::presence::UserPresence;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Operations the reconcilers need from a drawing engine.
///
/// Every mutating call is one engine operation (one re-render). Callers
/// batch ids and records accordingly.
pub trait CanvasEngine {
    /// Whether the engine is still loading and must not be persisted.
    fn is_loading(&self) -> bool;

    /// Current shapes, in paint order.
    fn shapes(&self) -> Vec<Drawable>;

    /// Current assets.
    fn assets(&self) -> Vec<Drawable>;

    fn create_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()>;

    fn update_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()>;

    fn delete_shapes(&mut self, ids: &[DrawableId]) -> CanvasResult<()>;

    /// Insert or replace assets.
    fn patch_assets(&mut self, assets: Vec<Drawable>) -> CanvasResult<()>;

    fn delete_assets(&mut self, ids: &[DrawableId]) -> CanvasResult<()>;

    /// Insert or replace remote users.
    fn update_users(&mut self, users: Vec<UserPresence>) -> CanvasResult<()>;

    fn remove_user(&mut self, id: &str) -> CanvasResult<()>;

    /// Returns true if the canvas changed since the last call and should be
    /// persisted. Engines that report persistence through their own
    /// callbacks leave this as `false`.
    fn take_persist_request(&mut self) -> bool {
        false
    }
}

/// A canvas document containing shapes, assets and UI state.
///
/// Every mutation, local or applied from the shared document, raises the
/// persist request that the session polls with
/// [`CanvasEngine::take_persist_request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasDocument {
    /// Unique document identifier.
    pub id: String,
    /// Document name.
    pub name: String,
    /// All shapes in the document, keyed by ID.
    pub shapes: HashMap<DrawableId, Drawable>,
    /// Z-order of shapes (back to front).
    pub z_order: Vec<DrawableId>,
    /// All assets, keyed by ID.
    pub assets: HashMap<DrawableId, Drawable>,
    /// Remote users currently shown on the canvas.
    #[serde(skip)]
    pub users: HashMap<String, UserPresence>,
    /// Selected shape ids. Never shared.
    #[serde(skip)]
    pub selection: Vec<DrawableId>,
    /// Active tool name. Never shared.
    #[serde(skip)]
    pub active_tool: String,
    #[serde(skip)]
    loading: bool,
    #[serde(skip)]
    persist_requested: bool,
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Untitled".to_string(),
            shapes: HashMap::new(),
            z_order: Vec::new(),
            assets: HashMap::new(),
            users: HashMap::new(),
            selection: Vec::new(),
            active_tool: "select".to_string(),
            loading: false,
            persist_requested: false,
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Add or replace a shape.
    pub fn add_shape(&mut self, shape: Drawable) {
        if !self.shapes.contains_key(&shape.id) {
            self.z_order.push(shape.id.clone());
        }
        self.shapes.insert(shape.id.clone(), shape);
        self.persist_requested = true;
    }

    /// Remove a shape.
    pub fn remove_shape(&mut self, id: &str) -> Option<Drawable> {
        self.z_order.retain(|shape_id| shape_id != id);
        self.selection.retain(|shape_id| shape_id != id);
        let removed = self.shapes.remove(id);
        if removed.is_some() {
            self.persist_requested = true;
        }
        removed
    }

    /// Add or replace an asset.
    pub fn add_asset(&mut self, asset: Drawable) {
        self.assets.insert(asset.id.clone(), asset);
        self.persist_requested = true;
    }

    /// Remove an asset.
    pub fn remove_asset(&mut self, id: &str) -> Option<Drawable> {
        let removed = self.assets.remove(id);
        if removed.is_some() {
            self.persist_requested = true;
        }
        removed
    }

    /// Get a shape by ID.
    pub fn get_shape(&self, id: &str) -> Option<&Drawable> {
        self.shapes.get(id)
    }

    /// Get shapes in z-order (back to front).
    pub fn shapes_ordered(&self) -> impl Iterator<Item = &Drawable> {
        self.z_order.iter().filter_map(|id| self.shapes.get(id))
    }

    /// Bring a shape to the front (topmost).
    pub fn bring_to_front(&mut self, id: &str) {
        if self.shapes.contains_key(id) {
            self.z_order.retain(|shape_id| shape_id != id);
            self.z_order.push(id.to_string());
        }
    }

    /// Replace the selection. Unknown ids are dropped.
    pub fn select(&mut self, ids: &[DrawableId]) {
        self.selection = ids
            .iter()
            .filter(|id| self.shapes.contains_key(*id))
            .cloned()
            .collect();
    }

    /// Check if the document has no shapes.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Get the number of shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Serialize the document to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl CanvasEngine for CanvasDocument {
    fn is_loading(&self) -> bool {
        self.loading
    }

    fn shapes(&self) -> Vec<Drawable> {
        self.shapes_ordered().cloned().collect()
    }

    fn assets(&self) -> Vec<Drawable> {
        self.assets.values().cloned().collect()
    }

    fn create_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()> {
        for shape in shapes {
            self.add_shape(shape);
        }
        Ok(())
    }

    fn update_shapes(&mut self, shapes: Vec<Drawable>) -> CanvasResult<()> {
        for shape in shapes {
            let existing = self
                .shapes
                .get_mut(&shape.id)
                .ok_or_else(|| CanvasError::UnknownDrawable(shape.id.clone()))?;
            *existing = shape;
            self.persist_requested = true;
        }
        Ok(())
    }

    fn delete_shapes(&mut self, ids: &[DrawableId]) -> CanvasResult<()> {
        for id in ids {
            self.remove_shape(id);
        }
        Ok(())
    }

    fn patch_assets(&mut self, assets: Vec<Drawable>) -> CanvasResult<()> {
        for asset in assets {
            self.add_asset(asset);
        }
        Ok(())
    }

    fn delete_assets(&mut self, ids: &[DrawableId]) -> CanvasResult<()> {
        for id in ids {
            self.remove_asset(id);
        }
        Ok(())
    }

    fn update_users(&mut self, users: Vec<UserPresence>) -> CanvasResult<()> {
        for user in users {
            self.users.insert(user.id.clone(), user);
        }
        Ok(())
    }

    fn remove_user(&mut self, id: &str) -> CanvasResult<()> {
        self.users.remove(id);
        Ok(())
    }

    fn take_persist_request(&mut self) -> bool {
        std::mem::take(&mut self.persist_requested)
    }
}
