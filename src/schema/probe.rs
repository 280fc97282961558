//! Instance generation and permissive validation used for subset probing.

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde_json::{Map, Number, Value};

use super::{Schema, SchemaError};

/// Produces random instances conforming to a schema.
pub trait InstanceGenerator: Send + Sync {
    /// Generates one instance of `schema`.
    fn generate(&self, schema: &Schema, rng: &mut dyn RngCore) -> Result<Value, SchemaError>;
}

/// Decides whether an instance conforms to a schema.
///
/// Validation is passthrough: object properties the schema does not mention
/// are accepted.
pub trait InstanceValidator: Send + Sync {
    /// Returns whether `instance` conforms to `schema`.
    fn validate(&self, schema: &Schema, instance: &Value) -> Result<bool, SchemaError>;
}

/// Random generator over [`Schema`].
///
/// Required properties are always generated, optional ones half of the time.
/// Arrays hold 0 to 3 items and unions pick one variant uniformly.
///
/// Recursion follows the schema tree, which is finite, so by default there is
/// no depth limit and every schema the inferer can build is generated in
/// full. A cap can be set for untrusted schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomInstanceGenerator {
    max_depth: Option<usize>,
}

impl RandomInstanceGenerator {
    /// Create a generator without a depth limit.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_depth: None }
    }

    /// Create a generator that fails on schemas nested deeper than `max_depth`.
    #[must_use]
    pub const fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
        }
    }

    fn gen_at(&self, schema: &Schema, rng: &mut dyn RngCore, depth: usize) -> Result<Value, SchemaError> {
        if let Some(max_depth) = self.max_depth.filter(|max| depth > *max) {
            return Err(SchemaError::DepthExceeded { max_depth });
        }
        let value = match schema {
            Schema::Any => match rng.gen_range(0..4u8) {
                0 => Value::Null,
                1 => Value::Bool(rng.gen()),
                2 => Value::from(rng.gen_range(-1000..1000i64)),
                _ => Value::String(random_string(rng)),
            },
            Schema::Null => Value::Null,
            Schema::Boolean => Value::Bool(rng.gen()),
            Schema::Integer => Value::from(rng.gen_range(-1_000_000..1_000_000i64)),
            Schema::Number => {
                let mut n: f64 = rng.gen_range(-1.0e6..1.0e6);
                if n.fract() == 0.0 {
                    n += 0.5;
                }
                Value::Number(Number::from_f64(n).ok_or_else(|| SchemaError::Generation {
                    reason: format!("non-finite number {n}"),
                })?)
            }
            Schema::String => Value::String(random_string(rng)),
            Schema::Array { items } => {
                let len = rng.gen_range(0..=3usize);
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.gen_at(items, rng, depth + 1)?);
                }
                Value::Array(out)
            }
            Schema::Object(obj) => {
                let mut out = Map::new();
                for (name, prop) in &obj.properties {
                    if obj.is_required(name) || rng.gen_bool(0.5) {
                        out.insert(name.clone(), self.gen_at(prop, rng, depth + 1)?);
                    }
                }
                Value::Object(out)
            }
            Schema::Union { variants } => {
                if variants.is_empty() {
                    return Err(SchemaError::Generation {
                        reason: "union without variants".to_string(),
                    });
                }
                let pick = rng.gen_range(0..variants.len());
                self.gen_at(&variants[pick], rng, depth + 1)?
            }
        };
        Ok(value)
    }
}

fn random_string(rng: &mut dyn RngCore) -> String {
    let len = rng.gen_range(0..=8usize);
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

impl InstanceGenerator for RandomInstanceGenerator {
    fn generate(&self, schema: &Schema, rng: &mut dyn RngCore) -> Result<Value, SchemaError> {
        self.gen_at(schema, rng, 0)
    }
}

/// Validator that allows unknown object properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughValidator;

impl PassthroughValidator {
    /// Create a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn check(schema: &Schema, instance: &Value) -> bool {
        match (schema, instance) {
            (Schema::Any, _) => true,
            (Schema::Null, Value::Null) => true,
            (Schema::Boolean, Value::Bool(_)) => true,
            (Schema::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (Schema::Number, Value::Number(_)) => true,
            (Schema::String, Value::String(_)) => true,
            (Schema::Array { items }, Value::Array(values)) => {
                values.iter().all(|v| Self::check(items, v))
            }
            (Schema::Object(obj), Value::Object(map)) => {
                obj.required.iter().all(|r| map.contains_key(r))
                    && obj.properties.iter().all(|(name, prop)| match map.get(name) {
                        Some(v) => Self::check(prop, v),
                        None => true,
                    })
            }
            (Schema::Union { variants }, v) => variants.iter().any(|s| Self::check(s, v)),
            _ => false,
        }
    }
}

impl InstanceValidator for PassthroughValidator {
    fn validate(&self, schema: &Schema, instance: &Value) -> Result<bool, SchemaError> {
        Ok(Self::check(schema, instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaInferer, StructuralInferer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn schema_of(v: Value) -> Schema {
        StructuralInferer::new().infer("t", &[v]).unwrap()
    }

    fn nested(levels: usize) -> Value {
        let mut doc = json!({"leaf": 1});
        for level in 0..levels {
            let mut outer = Map::new();
            outer.insert(format!("level{level}"), doc);
            doc = Value::Object(outer);
        }
        doc
    }

    #[test]
    fn test_generated_instances_validate() {
        let schema = schema_of(json!({
            "title": "x",
            "year": 1970,
            "score": 1.5,
            "tags": ["a"],
            "meta": {"ok": true, "note": null}
        }));
        let gen = RandomInstanceGenerator::new();
        let validator = PassthroughValidator::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let instance = gen.generate(&schema, &mut rng).unwrap();
            assert!(validator.validate(&schema, &instance).unwrap(), "{instance}");
        }
    }

    #[test]
    fn test_passthrough_allows_extra_fields() {
        let schema = schema_of(json!({"title": "x"}));
        let validator = PassthroughValidator::new();
        assert!(validator.validate(&schema, &json!({"title": "y", "year": 1})).unwrap());
        assert!(!validator.validate(&schema, &json!({"year": 1})).unwrap());
        assert!(!validator.validate(&schema, &json!({"title": 3})).unwrap());
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        let validator = PassthroughValidator::new();
        assert!(validator.validate(&Schema::Integer, &json!(2.0)).unwrap());
        assert!(!validator.validate(&Schema::Integer, &json!(2.5)).unwrap());
        assert!(validator.validate(&Schema::Number, &json!(2)).unwrap());
    }

    #[test]
    fn test_number_generation_is_fractional() {
        let gen = RandomInstanceGenerator::new();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let v = gen.generate(&Schema::Number, &mut rng).unwrap();
            assert!(!PassthroughValidator::check(&Schema::Integer, &v));
        }
    }

    #[test]
    fn test_deep_schema_generates_in_full() {
        let schema = schema_of(nested(40));
        let gen = RandomInstanceGenerator::new();
        let mut rng = StdRng::seed_from_u64(11);
        let instance = gen.generate(&schema, &mut rng).unwrap();
        assert!(PassthroughValidator::new().validate(&schema, &instance).unwrap());
    }

    #[test]
    fn test_explicit_depth_cap() {
        let mut schema = Schema::Integer;
        for _ in 0..5 {
            schema = Schema::array(schema);
        }
        let gen = RandomInstanceGenerator::with_max_depth(2);
        let mut rng = StdRng::seed_from_u64(3);
        // Generation may stop early on empty arrays; force enough attempts to reach the bound.
        let hit = (0..100).any(|_| gen.generate(&schema, &mut rng).is_err());
        assert!(hit);
    }
}
