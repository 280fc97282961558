//! Documents and collections.
//!
//! A [`Document`] is an ordered JSON object that always carries a string `_id`.
//! Documents rewritten by a `map` or `migrate` decision also carry `_original`,
//! the document as it was before the transformation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved field holding the pre-transformation document.
pub const ORIGINAL_FIELD: &str = "_original";

/// Maximum collection name length in bytes.
pub const MAX_COLLECTION_NAME_LEN: usize = 256;

/// Returns true for fields managed by the store rather than the caller.
#[must_use]
pub fn is_reserved_field(name: &str) -> bool {
    name == ID_FIELD || name == ORIGINAL_FIELD
}

/// Generates a fresh time-ordered document id.
#[must_use]
pub fn new_document_id() -> String {
    Uuid::now_v7().to_string()
}

/// A stored JSON document.
///
/// Invariant: the underlying map always contains `_id` as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Document(Map<String, Value>);

impl Document {
    /// Builds a document from an id and its fields.
    ///
    /// Any `_id` present in `fields` is replaced by `id`, which is always the
    /// first key.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut map = Map::with_capacity(fields.len() + 1);
        map.insert(ID_FIELD.to_string(), Value::String(id.into()));
        for (k, v) in fields {
            if k != ID_FIELD {
                map.insert(k, v);
            }
        }
        Self(map)
    }

    /// Builds a document from caller input, assigning a new id when absent.
    ///
    /// `index` is the position in the submitted batch and is used only for
    /// error context.
    pub fn from_input(value: Value, index: usize) -> Result<Self, ValidationError> {
        let Value::Object(fields) = value else {
            return Err(ValidationError::NotAnObject { index });
        };
        let id = match fields.get(ID_FIELD) {
            None => new_document_id(),
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => return Err(ValidationError::InvalidDocumentId { index }),
        };
        Ok(Self::new(id, fields))
    }

    /// The document id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self.0.get(ID_FIELD) {
            Some(Value::String(id)) => id,
            _ => "",
        }
    }

    /// Looks up a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field. Writes to `_id` are ignored.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if field != ID_FIELD {
            self.0.insert(field, value);
        }
    }

    /// Returns the pre-transformation document, if any.
    #[must_use]
    pub fn original(&self) -> Option<&Value> {
        self.0.get(ORIGINAL_FIELD)
    }

    /// All fields, including reserved ones.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Caller-visible fields only (`_id` and `_original` removed).
    #[must_use]
    pub fn body(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, _)| !is_reserved_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keeps `_id` plus the named fields, in the order they appear in the document.
    #[must_use]
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> Self {
        let map = self
            .0
            .iter()
            .filter(|(k, _)| k.as_str() == ID_FIELD || fields.iter().any(|f| f.as_ref() == k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self(map)
    }

    /// Returns the document as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Consumes the document, returning its JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Map<String, Value>> for Document {
    type Error = ValidationError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        match map.get(ID_FIELD) {
            Some(Value::String(_)) => Ok(Self(map)),
            Some(_) => Err(ValidationError::InvalidDocumentId { index: 0 }),
            None => Err(ValidationError::MissingField {
                field: ID_FIELD.to_string(),
            }),
        }
    }
}

impl From<Document> for Map<String, Value> {
    fn from(doc: Document) -> Self {
        doc.0
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{{\"_id\":\"{}\"}}", self.id()),
        }
    }
}

/// A named collection with its documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection name, unique within the store.
    pub name: String,
    /// Documents in store order.
    pub documents: Vec<Document>,
}

/// Validates a collection name.
pub fn validate_collection_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "name".to_string(),
        });
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "name".to_string(),
            max_length: MAX_COLLECTION_NAME_LEN,
        });
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidField {
            field: "name".to_string(),
            reason: "control characters are not allowed".to_string(),
        });
    }
    Ok(())
}
