//! Schema inference from sample documents.

use serde_json::Value;

use crate::document::is_reserved_field;

use super::{ObjectSchema, Schema, SchemaError};

/// Turns sample documents into a structural schema.
///
/// Implementations must be deterministic for identical sample shapes and must
/// ignore the reserved top-level `_id` and `_original` fields.
pub trait SchemaInferer: Send + Sync {
    /// Infers the schema for `samples`. `name` identifies the collection the
    /// samples belong to and may be used for naming only.
    fn infer(&self, name: &str, samples: &[Value]) -> Result<Schema, SchemaError>;
}

/// Infers schemas by joining the JSON type of every sample.
///
/// Objects union their properties, with a property required only if every
/// sample has it. Integers joined with fractional numbers become numbers,
/// `null` joined with another kind becomes a nullable union, and unrelated
/// kinds become a union.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralInferer;

impl StructuralInferer {
    /// Create a new inferer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Infers the schema of a single value.
    #[must_use]
    pub fn infer_value(value: &Value) -> Schema {
        match value {
            Value::Null => Schema::Null,
            Value::Bool(_) => Schema::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Schema::Integer
                } else {
                    Schema::Number
                }
            }
            Value::String(_) => Schema::String,
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(Self::infer_value)
                    .reduce(Schema::merge)
                    .unwrap_or(Schema::Any);
                Schema::array(items)
            }
            Value::Object(map) => {
                let mut obj = ObjectSchema::default();
                for (k, v) in map {
                    obj.properties.insert(k.clone(), Self::infer_value(v));
                    obj.required.insert(k.clone());
                }
                Schema::Object(obj)
            }
        }
    }

    fn infer_sample(index: usize, sample: &Value) -> Result<Schema, SchemaError> {
        let Value::Object(map) = sample else {
            return Err(SchemaError::InvalidSample { index });
        };
        let mut obj = ObjectSchema::default();
        for (k, v) in map.iter().filter(|(k, _)| !is_reserved_field(k)) {
            obj.properties.insert(k.clone(), Self::infer_value(v));
            obj.required.insert(k.clone());
        }
        Ok(Schema::Object(obj))
    }
}

impl SchemaInferer for StructuralInferer {
    fn infer(&self, _name: &str, samples: &[Value]) -> Result<Schema, SchemaError> {
        let mut schema: Option<Schema> = None;
        for (index, sample) in samples.iter().enumerate() {
            let inferred = Self::infer_sample(index, sample)?;
            schema = Some(match schema {
                Some(s) => s.merge(inferred),
                None => inferred,
            });
        }
        Ok(schema.unwrap_or_else(Schema::empty_object))
    }
}
