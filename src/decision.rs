//! Reconciliation decisions.
//!
//! A [`Decision`] describes how incoming documents (or a query shape) relate to
//! a collection's current schema, and what must happen to reconcile them. It
//! covers exactly two schema snapshots taken during one operation and is never
//! cached or persisted.
//!
//! The wire form uses a `type` tag and the field names understood by decision
//! oracles, so a decision can be parsed straight out of an oracle reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Conservative upper bound for mapping programs and reject messages.
pub const MAX_PROGRAM_LEN: usize = 16 * 1024;

/// Kind of a decision, as used in caller allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Reject,
    IsSubset,
    IsSuperset,
    Map,
    Migrate,
}

impl OperationKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::IsSubset => "isSubset",
            Self::IsSuperset => "isSuperset",
            Self::Map => "map",
            Self::Migrate => "migrate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "isSubset" => Ok(Self::IsSubset),
            "isSuperset" => Ok(Self::IsSuperset),
            "map" => Ok(Self::Map),
            "migrate" => Ok(Self::Migrate),
            other => Err(ValidationError::InvalidField {
                field: "allowedOperations".to_string(),
                reason: format!("unknown operation '{other}'"),
            }),
        }
    }
}

/// Outcome of reconciling two schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Decision {
    /// The incoming data cannot be reconciled; nothing is written.
    #[serde(rename = "reject")]
    Reject { message: String },

    /// The incoming shape is accepted by the existing schema as-is.
    #[serde(rename = "isSubset")]
    IsSubset,

    /// The incoming shape generalizes the existing schema.
    #[serde(rename = "isSuperset")]
    IsSuperset,

    /// Each incoming document is converted into the existing shape.
    #[serde(rename = "map")]
    Map {
        #[serde(rename = "jqMappingCommandPerDocument", alias = "program")]
        program: String,
    },

    /// Existing documents are rewritten into the broader incoming shape.
    #[serde(rename = "migrate")]
    Migrate {
        #[serde(rename = "newSchema", default = "empty_object")]
        new_schema: Value,
        #[serde(rename = "jqMappingCommandPerDocumentFromOldToNewSchema", alias = "program")]
        program: String,
    },
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Decision {
    /// Creates a reject decision.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self::Reject {
            message: message.into(),
        }
    }

    /// Creates a map decision.
    #[must_use]
    pub fn map(program: impl Into<String>) -> Self {
        Self::Map {
            program: program.into(),
        }
    }

    /// Creates a migrate decision with an unspecified target schema.
    #[must_use]
    pub fn migrate(program: impl Into<String>) -> Self {
        Self::Migrate {
            new_schema: empty_object(),
            program: program.into(),
        }
    }

    /// The kind of this decision.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Reject { .. } => OperationKind::Reject,
            Self::IsSubset => OperationKind::IsSubset,
            Self::IsSuperset => OperationKind::IsSuperset,
            Self::Map { .. } => OperationKind::Map,
            Self::Migrate { .. } => OperationKind::Migrate,
        }
    }

    /// Returns true for `reject`.
    #[must_use]
    pub const fn is_reject(&self) -> bool {
        matches!(self, Self::Reject { .. })
    }

    /// Checks the decision's payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Reject { message } => check_len("message", message),
            Self::IsSubset | Self::IsSuperset => Ok(()),
            Self::Map { program } => check_program("jqMappingCommandPerDocument", program),
            Self::Migrate {
                new_schema,
                program,
            } => {
                if !new_schema.is_object() {
                    return Err(ValidationError::InvalidField {
                        field: "newSchema".to_string(),
                        reason: "must be a JSON object".to_string(),
                    });
                }
                check_program("jqMappingCommandPerDocumentFromOldToNewSchema", program)
            }
        }
    }
}

fn check_len(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_PROGRAM_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_PROGRAM_LEN,
        });
    }
    Ok(())
}

fn check_program(field: &str, program: &str) -> Result<(), ValidationError> {
    if program.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    check_len(field, program)
}

/// A decision for a shaped query. Query-time reconciliation never mutates the
/// collection, so only `map` and `reject` are representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueryDecision {
    #[serde(rename = "reject")]
    Reject { message: String },

    #[serde(rename = "map")]
    Map {
        #[serde(rename = "jqMappingCommandPerDocument", alias = "program")]
        program: String,
    },
}

impl QueryDecision {
    /// The kind of this decision.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Reject { .. } => OperationKind::Reject,
            Self::Map { .. } => OperationKind::Map,
        }
    }
}

impl From<QueryDecision> for Decision {
    fn from(d: QueryDecision) -> Self {
        match d {
            QueryDecision::Reject { message } => Self::Reject { message },
            QueryDecision::Map { program } => Self::Map { program },
        }
    }
}

impl TryFrom<Decision> for QueryDecision {
    type Error = OperationKind;

    /// Fails with the offending kind for decisions a query cannot apply.
    fn try_from(d: Decision) -> Result<Self, Self::Error> {
        match d {
            Decision::Reject { message } => Ok(Self::Reject { message }),
            Decision::Map { program } => Ok(Self::Map { program }),
            other => Err(other.kind()),
        }
    }
}

/// Caller-supplied restriction on which decision kinds may be applied.
///
/// `reject` is always permitted because it never mutates anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedOperations(Vec<OperationKind>);

impl AllowedOperations {
    /// Builds an allow-list from kinds.
    #[must_use]
    pub fn new(kinds: impl IntoIterator<Item = OperationKind>) -> Self {
        let mut kinds: Vec<_> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self(kinds)
    }

    /// Parses wire names such as `["map", "isSubset"]`.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ValidationError> {
        let kinds = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<OperationKind>, _>>()?;
        Ok(Self::new(kinds))
    }

    /// Returns true if `kind` may be applied.
    #[must_use]
    pub fn permits(&self, kind: OperationKind) -> bool {
        kind == OperationKind::Reject || self.0.contains(&kind)
    }

    /// The listed kinds.
    #[must_use]
    pub fn kinds(&self) -> &[OperationKind] {
        &self.0
    }
}
