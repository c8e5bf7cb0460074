//! Drawable records exchanged between the canvas and the shared document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a shape or asset.
pub type DrawableId = String;

/// Key holding the record identifier.
pub const KEY_ID: &str = "id";
/// Key holding the drawing-specific record type (e.g. "rectangle", "image").
pub const KEY_TYPE: &str = "type";

/// Which shared collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Shape,
    Asset,
}

impl RecordKind {
    /// Name of the root map holding records of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            RecordKind::Shape => crate::crdt::SHAPES_KEY,
            RecordKind::Asset => crate::crdt::ASSETS_KEY,
        }
    }
}

/// A shape or asset owned by the canvas.
///
/// Identity is by `id`. Equality is structural over every field, nested
/// objects included, and does not depend on key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawable {
    pub id: DrawableId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Drawable {
    /// Create a record with no fields besides its id.
    pub fn new(id: impl Into<DrawableId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(key, value);
        self
    }

    /// Set a field, replacing any previous value. Setting `id` is ignored.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == KEY_ID {
            return;
        }
        self.fields.insert(key, value.into());
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The drawing-specific record type, if present.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(KEY_TYPE).and_then(Value::as_str)
    }

    /// Convert to a JSON object including the `id` key.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(KEY_ID.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }

    /// Build a record from a JSON object. Returns `None` if the value is not
    /// an object or has no string `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        let id = match map.remove(KEY_ID)? {
            Value::String(id) => id,
            _ => return None,
        };
        Some(Self { id, fields: map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structural_equality_ignores_key_order() {
        let a = Drawable::new("shape:1")
            .with_field("type", "rectangle")
            .with_field("point", json!([10.0, 20.0]));
        let b = Drawable::new("shape:1")
            .with_field("point", json!([10.0, 20.0]))
            .with_field("type", "rectangle");
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_difference_detected() {
        let a = Drawable::new("shape:1").with_field("style", json!({"color": "red", "size": "m"}));
        let b = Drawable::new("shape:1").with_field("style", json!({"color": "red", "size": "l"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_roundtrip() {
        let original = Drawable::new("asset:7")
            .with_field("type", "image")
            .with_field("size", json!([640, 480]));
        let value = original.to_value();
        assert_eq!(value["id"], "asset:7");
        let recovered = Drawable::from_value(value).expect("valid record");
        assert_eq!(recovered, original);
        assert_eq!(recovered.kind(), Some("image"));
    }

    #[test]
    fn test_from_value_requires_string_id() {
        assert!(Drawable::from_value(json!({"type": "rectangle"})).is_none());
        assert!(Drawable::from_value(json!({"id": 4})).is_none());
        assert!(Drawable::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_set_field_cannot_change_id() {
        let mut d = Drawable::new("shape:1");
        d.set_field("id", "shape:2");
        assert_eq!(d.id, "shape:1");
        assert!(d.field("id").is_none());
    }

    #[test]
    fn test_serde_flattens_fields() {
        let d = Drawable::new("shape:1").with_field("rotation", 0.5);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json, json!({"id": "shape:1", "rotation": 0.5}));
        let back: Drawable = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }
}
