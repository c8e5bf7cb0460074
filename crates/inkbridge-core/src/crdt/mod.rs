//! CRDT integration using Loro for collaborative editing.
//!
//! # Schema
//!
//! The Loro document has the following structure:
//! ```text
//! LoroDoc
//! ├── "shapes": LoroMap<DrawableId, LoroMap> (shape records)
//! └── "assets": LoroMap<DrawableId, LoroMap> (asset records)
//! ```
//!
//! Each record is a LoroMap holding its "id" plus every drawing-specific
//! field. Nested objects are nested LoroMaps, arrays are LoroLists.

mod convert;
mod schema;

pub use convert::{drawable_from_loro, drawable_to_loro, loro_to_json};
pub use schema::{ASSETS_KEY, CrdtDocument, SHAPES_KEY};

pub use loro::VersionVector;
