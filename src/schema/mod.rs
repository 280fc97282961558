//! Structural schemas.
//!
//! A [`Schema`] describes the shape of one or more JSON documents: property
//! names, nested shapes and value kinds. Schemas are derived from documents on
//! demand and never stored. Two schemas are only ever compared through
//! [`SubsetChecker`]; their representations are not meant for equality tests
//! across inference runs.

mod infer;
mod probe;
mod relation;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub use infer::{SchemaInferer, StructuralInferer};
pub use probe::{InstanceGenerator, InstanceValidator, PassthroughValidator, RandomInstanceGenerator};
pub use relation::{SubsetChecker, DEFAULT_PROBE_SAMPLES};

/// Errors raised while inferring, generating or validating against a schema.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Sample {index} is not a JSON object")]
    InvalidSample { index: usize },

    #[error("Instance generation failed: {reason}")]
    Generation { reason: String },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Schema nesting exceeds maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },
}

/// Output representation for [`Schema::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    /// A JSON Schema document with a named definition.
    #[default]
    JsonSchema,
    /// A compact, human-readable type summary.
    Summary,
}

/// Shape of a JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Known properties and their shapes.
    pub properties: BTreeMap<String, Schema>,
    /// Properties present in every sample.
    pub required: BTreeSet<String>,
}

impl ObjectSchema {
    /// Joins two object shapes: properties are unioned, only properties
    /// required on both sides stay required.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        let required = self
            .required
            .intersection(&other.required)
            .cloned()
            .collect();
        for (name, schema) in other.properties {
            let merged = match self.properties.remove(&name) {
                Some(existing) => existing.merge(schema),
                None => schema,
            };
            self.properties.insert(name, merged);
        }
        self.required = required;
        self
    }

    /// Returns true if `name` must be present.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

/// Structural description of JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schema {
    /// No constraint. Inferred for the items of empty arrays.
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array { items: Box<Schema> },
    Object(ObjectSchema),
    /// One of several shapes, at most one per kind.
    Union { variants: Vec<Schema> },
}

impl Schema {
    /// An object schema with no properties.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(ObjectSchema::default())
    }

    /// Shorthand for an array schema.
    #[must_use]
    pub fn array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    /// Top-level property names when this is an object schema.
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        match self {
            Self::Object(obj) => obj.properties.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the object shape, if this is one.
    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Least general schema accepting everything either side accepts.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            // `Any` only appears for empty arrays and carries no information.
            (Self::Any, b) => b,
            (a, Self::Any) => a,
            (Self::Integer, Self::Number) | (Self::Number, Self::Integer) => Self::Number,
            (Self::Array { items: a }, Self::Array { items: b }) => Self::array(a.merge(*b)),
            (Self::Object(a), Self::Object(b)) => Self::Object(a.merge(b)),
            (a, b) => Self::union_of(a, b),
        }
    }

    fn union_of(a: Self, b: Self) -> Self {
        let mut variants: Vec<Self> = Vec::new();
        for candidate in a.into_variants().into_iter().chain(b.into_variants()) {
            let rank = candidate.kind_rank();
            match variants.iter().position(|v| v.kind_rank() == rank) {
                Some(pos) => {
                    let existing = variants.remove(pos);
                    variants.push(existing.merge(candidate));
                }
                None => variants.push(candidate),
            }
        }
        variants.sort_by_key(Self::kind_rank);
        if variants.len() == 1 {
            variants.remove(0)
        } else {
            Self::Union { variants }
        }
    }

    fn into_variants(self) -> Vec<Self> {
        match self {
            Self::Union { variants } => variants,
            other => vec![other],
        }
    }

    // Integer and number share a rank so they fold into one variant.
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Null => 1,
            Self::Boolean => 2,
            Self::Integer | Self::Number => 3,
            Self::String => 4,
            Self::Array { .. } => 5,
            Self::Object(_) => 6,
            Self::Union { .. } => 7,
        }
    }

    /// Renders this schema in the requested representation.
    #[must_use]
    pub fn render(&self, name: &str, format: SchemaFormat) -> Value {
        match format {
            SchemaFormat::JsonSchema => self.to_json_schema(name),
            SchemaFormat::Summary => Value::String(self.to_string()),
        }
    }

    /// Renders a JSON Schema document whose root is a named definition.
    #[must_use]
    pub fn to_json_schema(&self, name: &str) -> Value {
        let title = definition_name(name);
        let mut root = self.json_schema_fragment();
        if let Value::Object(map) = &mut root {
            map.insert("title".to_string(), Value::String(title.clone()));
        }
        let mut definitions = Map::new();
        definitions.insert(title.clone(), root);
        json!({
            "$schema": "http://json-schema.org/draft-06/schema#",
            "$ref": format!("#/definitions/{title}"),
            "definitions": definitions,
        })
    }

    fn json_schema_fragment(&self) -> Value {
        match self {
            Self::Any => json!({}),
            Self::Null => json!({"type": "null"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::String => json!({"type": "string"}),
            Self::Array { items } => json!({
                "type": "array",
                "items": items.json_schema_fragment(),
            }),
            Self::Object(obj) => {
                let properties: Map<String, Value> = obj
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.json_schema_fragment()))
                    .collect();
                json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": properties,
                    "required": obj.required.iter().collect::<Vec<_>>(),
                })
            }
            Self::Union { variants } => json!({
                "anyOf": variants.iter().map(Self::json_schema_fragment).collect::<Vec<_>>(),
            }),
        }
    }
}

/// PascalCase definition name for a collection, as schema generators emit.
fn definition_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if upper {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            upper = false;
        } else {
            upper = true;
        }
    }
    if out.is_empty() {
        out.push_str("Document");
    }
    out
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Null => f.write_str("null"),
            Self::Boolean => f.write_str("boolean"),
            Self::Integer => f.write_str("integer"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Array { items } => match items.as_ref() {
                Self::Union { .. } => write!(f, "({items})[]"),
                _ => write!(f, "{items}[]"),
            },
            Self::Object(obj) => {
                f.write_str("{")?;
                for (i, (name, schema)) in obj.properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let optional = if obj.is_required(name) { "" } else { "?" };
                    write!(f, "{name}{optional}: {schema}")?;
                }
                f.write_str("}")
            }
            Self::Union { variants } => {
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}
