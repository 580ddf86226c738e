//! The declarative message schema model and its registry.
//!
//! Schemas are plain JSON documents describing the wire layout of one JAUS
//! message. They are parsed once at startup into [SchemaNode] trees and
//! published through an immutable [SchemaRegistry]; the codec walks the tree
//! to pack and unpack payloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{info, warn};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::JausBridgeError;

/// The four schema node kinds the codec understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Object,
    Number,
    String,
    Array,
}

/// The JAUS wire primitives. Width and signedness per AS-5684.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum JausType {
    #[serde(rename = "byte")]
    Byte,
    #[serde(rename = "unsigned byte")]
    UnsignedByte,
    #[serde(rename = "short integer")]
    ShortInteger,
    #[serde(rename = "unsigned short integer")]
    UnsignedShortInteger,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "unsigned integer")]
    UnsignedInteger,
    #[serde(rename = "long integer")]
    LongInteger,
    #[serde(rename = "unsigned long integer")]
    UnsignedLongInteger,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "long float")]
    LongFloat,
    #[serde(rename = "string")]
    String,
}

impl JausType {
    /// Width in bytes on the wire
    pub fn size(&self) -> usize {
        match self {
            JausType::Byte | JausType::UnsignedByte | JausType::String => 1,
            JausType::ShortInteger | JausType::UnsignedShortInteger => 2,
            JausType::Integer | JausType::UnsignedInteger | JausType::Float => 4,
            JausType::LongInteger | JausType::UnsignedLongInteger | JausType::LongFloat => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, JausType::Float | JausType::LongFloat)
    }
}

/// Linear mapping between a real-valued channel and its stored integer
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleRange {
    pub bias: f64,
    #[serde(rename = "scaleFactor")]
    pub scale_factor: f64,
}

/// Inclusive bit span within the containing integer
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BitRange {
    pub from: u32,
    pub to: u32,
}

impl BitRange {
    /// Mask covering bits `from..=to`
    pub fn mask(&self) -> i128 {
        let width = self.to.saturating_sub(self.from) + 1;
        (((1u128 << width) - 1) << self.from) as i128
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueEnum {
    #[serde(rename = "enumIndex")]
    pub enum_index: i64,
    #[serde(rename = "enumConst")]
    pub enum_const: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueSetEntry {
    #[serde(rename = "valueEnum")]
    pub value_enum: Option<ValueEnum>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArrayItems {
    #[serde(rename = "anyOf", default)]
    pub any_of: Vec<SchemaNode>,
}

/// One node of a message schema tree.
///
/// Which attributes are meaningful depends on `node_type`; the codec ignores
/// the rest, mirroring the permissive schema files in the wild.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: Option<String>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Declaration order is the wire order
    pub properties: Option<IndexMap<String, SchemaNode>>,
    pub jaus_type: Option<JausType>,
    #[serde(rename = "const")]
    pub constant: Option<String>,
    pub scale_range: Option<ScaleRange>,
    pub bit_range: Option<BitRange>,
    /// Marks a packed bit field object; names the integer emitted after the
    /// sub-walk returns
    pub bit_field: Option<JausType>,
    pub field_format: Option<String>,
    #[serde(rename = "enum")]
    pub enumeration: Option<serde_json::Value>,
    pub value_set: Option<Vec<ValueSetEntry>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    #[serde(default)]
    pub is_variant: bool,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub items: Option<Box<ArrayItems>>,
}

impl SchemaNode {
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// True for the one nested-payload field format the codec implements
    pub fn is_jaus_message(&self) -> bool {
        self.field_format.as_deref() == Some("JAUS MESSAGE")
    }

    /// Enumerations carry both an `enum` list and a `valueSet` with the
    /// index/constant pairs
    pub fn is_value_set(&self) -> bool {
        self.enumeration.is_some() && self.value_set.is_some()
    }
}

/// Process-wide read-only mapping from message id to its candidate schemas.
///
/// Several schemas may share one id; encode disambiguates by message name,
/// decode tries them in registration order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Vec<Arc<SchemaNode>>>,
}

impl SchemaRegistry {
    /// Load every `*.json` schema below `path`.
    ///
    /// Files that fail to parse are skipped with a warning; schemas without a
    /// title or message id are ignored the same way the reference schema set
    /// treats them.
    pub fn load(path: &Path) -> Result<Self, JausBridgeError> {
        let mut registry = SchemaRegistry::default();
        info!("Read JSON message schemas from {}", path.display());
        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .map(|ext| ext.eq_ignore_ascii_case("json"))
                        .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        for file in files {
            let content = match std::fs::read_to_string(&file) {
                Ok(value) => value,
                Err(error) => {
                    warn!("Failed to read schema file {}: {error:?}", file.display());
                    continue;
                }
            };
            match serde_json::from_str::<SchemaNode>(&content) {
                Ok(schema) => {
                    if !registry.insert(schema) {
                        warn!(
                            "Schema file {} has no title or message id, skipping",
                            file.display()
                        );
                    }
                }
                Err(error) => {
                    warn!("Failed to parse schema file {}: {error}", file.display());
                }
            }
        }

        let duplicates = registry
            .schemas
            .values()
            .filter(|candidates| candidates.len() > 1)
            .count();
        if duplicates > 0 {
            warn!("{duplicates} message ids have more than one schema");
        }
        info!("{} message schemas found", registry.len());
        Ok(registry)
    }

    /// Register a schema under its declared message id. Duplicate ids are
    /// appended in insertion order.
    pub fn insert(&mut self, schema: SchemaNode) -> bool {
        let title_ok = schema
            .title
            .as_ref()
            .map(|t| !t.is_empty())
            .unwrap_or(false);
        let Some(message_id) = schema.message_id.clone() else {
            return false;
        };
        if !title_ok {
            return false;
        }
        self.schemas
            .entry(message_id.to_lowercase())
            .or_default()
            .push(Arc::new(schema));
        true
    }

    /// Candidate schemas for a message id, in registration order
    pub fn get(&self, message_id: &str) -> Option<&[Arc<SchemaNode>]> {
        self.schemas.get(message_id).map(|v| v.as_slice())
    }

    /// Number of distinct message ids
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
