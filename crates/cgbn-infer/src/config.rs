//! Configuration for inference, sampling and learning.
//!
//! All configurations are plain serde-serializable values with defaults and
//! `with_*` builders.

use serde::{Deserialize, Serialize};

use crate::algebra::ProductOptions;
use crate::elimination_ordering::EliminationStrategy;
use crate::error::{FactorError, Result};

/// Settings for exact inference by bucket elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Keep zero-probability entries in products so their densities survive.
    pub cg_safety: bool,
    /// Restrict marginal queries to the requisite (d-connected) nodes.
    pub prune_dseparated: bool,
    /// Heuristic used when a query carries no explicit elimination order.
    pub strategy: EliminationStrategy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            cg_safety: false,
            prune_dseparated: true,
            strategy: EliminationStrategy::Topological,
        }
    }
}

impl InferenceConfig {
    pub fn with_cg_safety(mut self, cg_safety: bool) -> Self {
        self.cg_safety = cg_safety;
        self
    }

    pub fn with_pruning(mut self, prune_dseparated: bool) -> Self {
        self.prune_dseparated = prune_dseparated;
        self
    }

    pub fn with_strategy(mut self, strategy: EliminationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub(crate) fn product_options(&self) -> ProductOptions {
        ProductOptions::with_cg_safety(self.cg_safety)
    }
}

/// Settings for the Gibbs sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GibbsConfig {
    /// Sweeps discarded before collecting samples
    pub burn_in: usize,
    /// Samples collected after burn-in
    pub num_samples: usize,
    /// Sweeps between collected samples
    pub thinning: usize,
    pub seed: u64,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            burn_in: 100,
            num_samples: 1000,
            thinning: 1,
            seed: 42,
        }
    }
}

impl GibbsConfig {
    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn with_thinning(mut self, thinning: usize) -> Self {
        self.thinning = thinning;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 || self.thinning == 0 {
            return Err(FactorError::InvalidValue(
                "Gibbs sampling needs at least one sample and a thinning of at least one"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for expectation-maximization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmConfig {
    /// Upper bound on E/M rounds
    pub max_rounds: usize,
    /// Stop when the log-likelihood improves by less than this
    pub tolerance: f64,
    /// Worker threads for the E-step; 0 lets rayon decide
    pub num_threads: usize,
    /// Seed for the initial CPT randomization, if any
    pub seed: Option<u64>,
    pub inference: InferenceConfig,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_rounds: 100,
            tolerance: 1e-6,
            num_threads: 0,
            seed: None,
            inference: InferenceConfig::default(),
        }
    }
}

impl EmConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(FactorError::InvalidValue(format!(
                "EM tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}
