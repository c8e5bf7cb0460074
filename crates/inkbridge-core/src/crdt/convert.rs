//! Conversion between drawable records and Loro values.
//!
//! JSON objects become nested `LoroMap` containers and JSON arrays become
//! `LoroList` containers, so a record read back through `get_deep_value`
//! has the same shape it was written with.

use loro::{LoroList, LoroMap, LoroResult, LoroValue};
use serde_json::{Map, Number, Value};

use crate::drawable::{Drawable, KEY_ID};

/// Write a record's id and fields into an empty Loro map.
pub fn drawable_to_loro(drawable: &Drawable, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, drawable.id.as_str())?;
    write_object(map, &drawable.fields)
}

/// Read a record from the deep value of its Loro map.
pub fn drawable_from_loro(value: &LoroValue) -> Option<Drawable> {
    Drawable::from_value(loro_to_json(value))
}

fn write_object(map: &LoroMap, object: &Map<String, Value>) -> LoroResult<()> {
    for (key, value) in object {
        match value {
            Value::Object(child) => {
                let container = map.insert_container(key, LoroMap::new())?;
                write_object(&container, child)?;
            }
            Value::Array(items) => {
                let container = map.insert_container(key, LoroList::new())?;
                write_list(&container, items)?;
            }
            scalar => map.insert(key, scalar_to_loro(scalar))?,
        }
    }
    Ok(())
}

fn write_list(list: &LoroList, items: &[Value]) -> LoroResult<()> {
    for (pos, item) in items.iter().enumerate() {
        match item {
            Value::Object(child) => {
                let container = list.insert_container(pos, LoroMap::new())?;
                write_object(&container, child)?;
            }
            Value::Array(nested) => {
                let container = list.insert_container(pos, LoroList::new())?;
                write_list(&container, nested)?;
            }
            scalar => list.insert(pos, scalar_to_loro(scalar))?,
        }
    }
    Ok(())
}

fn scalar_to_loro(value: &Value) -> LoroValue {
    match value {
        Value::Bool(b) => LoroValue::Bool(*b),
        Value::Number(n) => number_to_loro(n),
        Value::String(s) => s.as_str().into(),
        // Containers are written by the caller.
        Value::Null | Value::Array(_) | Value::Object(_) => LoroValue::Null,
    }
}

/// Integers above `i64::MAX` have no Loro scalar; they are kept as their
/// eight big-endian bytes. Records never hold binary values otherwise.
fn number_to_loro(n: &Number) -> LoroValue {
    if let Some(i) = n.as_i64() {
        return LoroValue::I64(i);
    }
    match n.as_u64() {
        Some(u) => LoroValue::Binary(u.to_be_bytes().to_vec().into()),
        None => LoroValue::Double(n.as_f64().unwrap_or_default()),
    }
}

fn binary_to_json(bytes: &[u8]) -> Value {
    match <[u8; 8]>::try_from(bytes) {
        Ok(be) => Value::Number(u64::from_be_bytes(be).into()),
        Err(_) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Convert a deep Loro value to JSON.
pub fn loro_to_json(value: &LoroValue) -> Value {
    match value {
        LoroValue::Null => Value::Null,
        LoroValue::Bool(b) => Value::Bool(*b),
        LoroValue::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        LoroValue::I64(i) => Value::Number((*i).into()),
        LoroValue::String(s) => Value::String(s.to_string()),
        LoroValue::Binary(bytes) => binary_to_json(bytes),
        LoroValue::List(items) => Value::Array(items.iter().map(loro_to_json).collect()),
        LoroValue::Map(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.to_string(), loro_to_json(v)))
                .collect(),
        ),
        LoroValue::Container(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loro::LoroDoc;
    use serde_json::json;

    fn roundtrip(drawable: &Drawable) -> Drawable {
        let doc = LoroDoc::new();
        let root = doc.get_map("records");
        let map = root
            .insert_container(&drawable.id, LoroMap::new())
            .expect("Failed to insert container");
        drawable_to_loro(drawable, &map).expect("Failed to write record");
        doc.commit();
        drawable_from_loro(&map.get_deep_value()).expect("Failed to read record")
    }

    #[test]
    fn test_nested_record_roundtrip() {
        let shape = Drawable::new("shape:arrow")
            .with_field("type", "arrow")
            .with_field("point", json!([12.5, -3]))
            .with_field("handles", json!({
                "start": {"id": "start", "point": [0, 0], "bindingId": null},
                "end": {"id": "end", "point": [100.25, 40]}
            }))
            .with_field("isLocked", false)
            .with_field("label", "hello");
        assert_eq!(roundtrip(&shape), shape);
    }

    #[test]
    fn test_list_of_lists_roundtrip() {
        let shape = Drawable::new("shape:draw")
            .with_field("points", json!([[0.0, 0.0, 0.5], [1.5, 2.5, 0.5], [3, 4, 1]]));
        assert_eq!(roundtrip(&shape), shape);
    }

    #[test]
    fn test_integers_and_floats_keep_their_kind() {
        let shape = Drawable::new("shape:n")
            .with_field("childIndex", 3)
            .with_field("rotation", 1.0)
            .with_field("negative", -7);
        let back = roundtrip(&shape);
        assert_eq!(back.field("childIndex"), Some(&json!(3)));
        assert_eq!(back.field("rotation"), Some(&json!(1.0)));
        assert_eq!(back.field("negative"), Some(&json!(-7)));
    }

    #[test]
    fn test_large_unsigned_integers_roundtrip_exactly() {
        let shape = Drawable::new("shape:seed")
            .with_field("seed", u64::MAX)
            .with_field("nested", json!({"seeds": [9_223_372_036_854_775_808u64, 1]}));
        let back = roundtrip(&shape);
        assert_eq!(back.field("seed"), Some(&json!(u64::MAX)));
        assert_eq!(back, shape);
    }
}
