//! Trait schemas and field index options
//!
//! Mirrors the `.exocore.indexed`, `.exocore.sorted` and `.exocore.text`
//! field annotations: per message field, which secondary indexes the trait
//! index maintains.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Index options of one message field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Maintain an equality index (`.exocore.indexed`)
    #[serde(default)]
    pub indexed: bool,
    /// Maintain a range index usable for ordering (`.exocore.sorted`)
    #[serde(default)]
    pub sorted: bool,
    /// Feed the field to the full-text index (`.exocore.text`)
    #[serde(default)]
    pub text: bool,
}

impl FieldOptions {
    /// Equality-indexed field
    pub fn indexed() -> Self {
        FieldOptions {
            indexed: true,
            ..Default::default()
        }
    }

    /// Sorted (range) field
    pub fn sorted() -> Self {
        FieldOptions {
            sorted: true,
            ..Default::default()
        }
    }

    /// Full-text field
    pub fn text() -> Self {
        FieldOptions {
            text: true,
            ..Default::default()
        }
    }

    /// Whether the field gets an entry in the equality/range index
    pub fn has_value_index(&self) -> bool {
        self.indexed || self.sorted
    }
}

/// Schema of one trait message type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraitSchema {
    /// Fully qualified message type name
    pub type_name: String,
    /// Declared fields and their index options
    #[serde(default)]
    pub fields: BTreeMap<String, FieldOptions>,
}

impl TraitSchema {
    /// Create a schema with no declared fields
    pub fn new(type_name: impl Into<String>) -> Self {
        TraitSchema {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder: declare a field
    pub fn with_field(mut self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.fields.insert(name.into(), options);
        self
    }

    /// Options of a declared field
    pub fn field(&self, name: &str) -> Option<FieldOptions> {
        self.fields.get(name).copied()
    }

    /// Names of fields fed to the text index
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, o)| o.text)
            .map(|(n, _)| n.as_str())
    }

    /// Names of fields with an equality/range index
    pub fn value_indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, o)| o.has_value_index())
            .map(|(n, _)| n.as_str())
    }
}

/// Registry of known trait schemas, keyed by message type name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, TraitSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a schema
    pub fn with_schema(mut self, schema: TraitSchema) -> Self {
        self.register(schema);
        self
    }

    /// Register or replace a schema
    pub fn register(&mut self, schema: TraitSchema) {
        self.schemas.insert(schema.type_name.clone(), schema);
    }

    /// Look up the schema of a message type
    pub fn get(&self, type_name: &str) -> Option<&TraitSchema> {
        self.schemas.get(type_name)
    }

    /// Options of a field of a message type, if both are registered
    pub fn field_options(&self, type_name: &str, field: &str) -> Option<FieldOptions> {
        self.get(type_name).and_then(|s| s.field(field))
    }

    /// Options of the named field in any registered schema that declares it
    pub fn any_field_options(&self, field: &str) -> Option<FieldOptions> {
        self.schemas.values().find_map(|s| s.field(field))
    }

    /// Number of registered schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no schema is registered
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
