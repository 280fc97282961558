//! Probabilistic structural subset checking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::{
    InstanceGenerator, InstanceValidator, PassthroughValidator, RandomInstanceGenerator, Schema,
    SchemaError,
};

/// Default number of generated probes per check.
pub const DEFAULT_PROBE_SAMPLES: usize = 100;

/// Decides whether one schema's instances are accepted by another.
///
/// Exact structural subtyping over nested schemas is expensive to prove, so the
/// check is a Monte-Carlo approximation: generate instances of the candidate
/// and require every one of them to pass passthrough validation against the
/// reference. Any generation or validation error makes the check return
/// `false`; errors never escape the checker.
#[derive(Clone)]
pub struct SubsetChecker {
    generator: Arc<dyn InstanceGenerator>,
    validator: Arc<dyn InstanceValidator>,
    samples: usize,
    seed: Option<u64>,
    calls: Arc<AtomicU64>,
}

impl fmt::Debug for SubsetChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsetChecker")
            .field("samples", &self.samples)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Default for SubsetChecker {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_SAMPLES)
    }
}

impl SubsetChecker {
    /// Create a checker using the built-in generator and validator.
    #[must_use]
    pub fn new(samples: usize) -> Self {
        Self::with_probes(
            Arc::new(RandomInstanceGenerator::new()),
            Arc::new(PassthroughValidator::new()),
            samples,
        )
    }

    /// Create a checker with explicit probe collaborators.
    #[must_use]
    pub fn with_probes(
        generator: Arc<dyn InstanceGenerator>,
        validator: Arc<dyn InstanceValidator>,
        samples: usize,
    ) -> Self {
        Self {
            generator,
            validator,
            samples: samples.max(1),
            seed: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes probing reproducible. Each call still draws a distinct stream
    /// derived from `seed` and the call count.
    #[must_use]
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of probes generated per check.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    /// Returns true if every probe generated from `candidate` validates against
    /// `reference`.
    #[must_use]
    pub fn is_accepted_by(&self, candidate: &Schema, reference: &Schema) -> bool {
        match self.probe(candidate, reference) {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!(error = %err, "subset probe failed; treating as not accepted");
                false
            }
        }
    }

    fn probe(&self, candidate: &Schema, reference: &Schema) -> Result<bool, SchemaError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(call.wrapping_mul(0x9E37_79B9_7F4A_7C15))),
            None => StdRng::from_entropy(),
        };
        for _ in 0..self.samples {
            let instance = self.generator.generate(candidate, &mut rng)?;
            if !self.validator.validate(reference, &instance)? {
                debug!(%candidate, %reference, %instance, "probe instance rejected");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaInferer, StructuralInferer};
    use rand::RngCore;
    use serde_json::{json, Value};

    fn schema_of(samples: &[Value]) -> Schema {
        StructuralInferer::new().infer("t", samples).unwrap()
    }

    fn checker() -> SubsetChecker {
        SubsetChecker::new(100).seeded(42)
    }

    #[test]
    fn test_schema_accepts_itself() {
        let schema = schema_of(&[
            json!({"title": "a", "year": 1970, "tags": ["x"]}),
            json!({"title": "b", "year": null}),
        ]);
        assert!(checker().is_accepted_by(&schema, &schema));
    }

    #[test]
    fn test_extra_fields_are_accepted_by_narrower_reference() {
        let narrow = schema_of(&[json!({"title": "a"})]);
        let wide = schema_of(&[json!({"title": "a", "year": 1970})]);
        let c = checker();
        assert!(c.is_accepted_by(&wide, &narrow));
        assert!(!c.is_accepted_by(&narrow, &wide));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let a = schema_of(&[json!({"year": 1970})]);
        let b = schema_of(&[json!({"year": "1970"})]);
        let c = checker();
        assert!(!c.is_accepted_by(&a, &b));
        assert!(!c.is_accepted_by(&b, &a));
    }

    struct FailingGenerator;

    impl InstanceGenerator for FailingGenerator {
        fn generate(&self, _: &Schema, _: &mut dyn RngCore) -> Result<Value, SchemaError> {
            Err(SchemaError::Generation {
                reason: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_generation_errors_fail_closed() {
        let c = SubsetChecker::with_probes(
            Arc::new(FailingGenerator),
            Arc::new(PassthroughValidator::new()),
            10,
        );
        let schema = schema_of(&[json!({"a": 1})]);
        assert!(!c.is_accepted_by(&schema, &schema));
    }

    #[test]
    fn test_deeply_nested_schema_accepts_itself() {
        let mut doc = json!({"leaf": "x", "n": 1});
        for level in 0..40 {
            let mut outer = serde_json::Map::new();
            outer.insert(format!("level{level}"), doc);
            outer.insert("tags".to_string(), json!(["a"]));
            doc = Value::Object(outer);
        }
        let schema = schema_of(&[doc]);
        assert!(checker().is_accepted_by(&schema, &schema));
    }

    #[test]
    fn test_zero_samples_clamped() {
        assert_eq!(SubsetChecker::new(0).samples(), 1);
    }
}
