//! Engine configuration.

use crate::error::ValidationError;
use crate::schema::DEFAULT_PROBE_SAMPLES;

/// Tuning knobs for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Synthetic instances generated per relation check.
    pub probe_samples: usize,
    /// Seed for relation-check probes. `None` draws fresh entropy per check.
    pub probe_seed: Option<u64>,
    /// Worker threads used to run a mapping program over a batch.
    pub transform_workers: usize,
    /// Largest batch accepted by a single write.
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_samples: DEFAULT_PROBE_SAMPLES,
            probe_seed: None,
            transform_workers: 4,
            max_batch_size: 10_000,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration, returning it unchanged if valid.
    pub fn validate(self) -> Result<Self, ValidationError> {
        for (name, value) in [
            ("probe_samples", self.probe_samples),
            ("transform_workers", self.transform_workers),
            ("max_batch_size", self.max_batch_size),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{name} must be at least 1"),
                });
            }
        }
        Ok(self)
    }

    /// Same configuration with a fixed probe seed.
    #[must_use]
    pub const fn with_probe_seed(mut self, seed: u64) -> Self {
        self.probe_seed = Some(seed);
        self
    }
}
