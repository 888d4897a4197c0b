//! Gibbs sampling for approximate inference.
//!
//! The chain state assigns every unobserved enumerable variable. A sweep
//! visits those variables in topological order and resamples each from its
//! Markov-blanket conditional: the node's own factor times its children's,
//! built by the same factor engine used for exact inference.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::algebra::{product_all, ProductOptions};
use crate::config::GibbsConfig;
use crate::error::{FactorError, Result};
use crate::factor::Factor;
use crate::network::BayesNet;
use crate::node::FactorSource;
use crate::query::QueryMode;
use crate::result::CgTable;
use crate::table::IndexedTable;
use crate::variable::{Evidence, RelevantVars, Value, Variable};

/// Gibbs sampler over a borrowed network.
pub struct GibbsSampler<'a> {
    net: &'a BayesNet,
    config: GibbsConfig,
}

impl<'a> GibbsSampler<'a> {
    pub fn new(net: &'a BayesNet, config: GibbsConfig) -> Self {
        Self { net, config }
    }

    pub fn config(&self) -> &GibbsConfig {
        &self.config
    }

    /// Estimate the joint distribution of `query` given `evidence` from sample frequencies.
    pub fn run(&self, query: &[Variable], evidence: &Evidence) -> Result<CgTable> {
        self.config.validate()?;
        for var in query {
            if !var.is_enumerable() {
                return Err(FactorError::invalid_operation(format!(
                    "Gibbs sampling cannot estimate continuous variable {}",
                    var.name()
                )));
            }
            if self.net.node_index(var).is_none() {
                return Err(FactorError::VariableNotFound(var.name().to_string()));
            }
            if evidence.contains(var) {
                return Err(FactorError::invalid_operation(format!(
                    "{} is both queried and observed",
                    var.name()
                )));
            }
        }

        let latent = self.latent_nodes(evidence)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut state = self.initialize(&latent, evidence, &mut rng);

        let table = IndexedTable::new(query.to_vec())?;
        let mut counts = vec![0usize; table.size()];
        let mut key = vec![0; query.len()];

        debug!(
            latent = latent.len(),
            burn_in = self.config.burn_in,
            samples = self.config.num_samples,
            "starting Gibbs chain"
        );

        let mut sweep = 0;
        for _ in 0..self.config.burn_in {
            self.sweep(&latent, &mut state, &mut rng, sweep)?;
            sweep += 1;
        }
        for _ in 0..self.config.num_samples {
            for _ in 0..self.config.thinning {
                self.sweep(&latent, &mut state, &mut rng, sweep)?;
                sweep += 1;
            }
            for (slot, var) in key.iter_mut().zip(query) {
                *slot = state
                    .get(&var.id())
                    .copied()
                    .flatten()
                    .and_then(|v| v.as_discrete())
                    .ok_or_else(|| {
                        FactorError::VarElimInternal(format!("{} left the chain state", var.name()))
                    })?;
            }
            counts[table.index(&key)?] += 1;
        }

        let mut factor = Factor::with_order("gibbs", query.to_vec(), Vec::new())?;
        let total = self.config.num_samples as f64;
        for (index, &count) in counts.iter().enumerate() {
            factor.set_log_value_raw(index, (count as f64 / total).ln());
        }
        debug!(sweeps = sweep, "Gibbs chain finished");
        Ok(CgTable::new(factor, query.to_vec(), QueryMode::Marginal, None, None))
    }

    /// Unobserved enumerable nodes, in topological order.
    fn latent_nodes(&self, evidence: &Evidence) -> Result<Vec<usize>> {
        Ok(self
            .net
            .ordered()?
            .into_iter()
            .filter(|&i| {
                let var = self.net.nodes()[i].variable();
                var.is_enumerable() && !evidence.contains(var)
            })
            .collect())
    }

    /// Evidence plus a uniform random value for each latent variable.
    fn initialize(&self, latent: &[usize], evidence: &Evidence, rng: &mut StdRng) -> RelevantVars {
        let mut state = evidence.to_relevant();
        for &i in latent {
            let var = self.net.nodes()[i].variable();
            let value = rng.random_range(0..var.size());
            state.insert(var.id(), Some(Value::Discrete(value)));
        }
        state
    }

    fn sweep(&self, latent: &[usize], state: &mut RelevantVars, rng: &mut StdRng, sweep: usize) -> Result<()> {
        for &i in latent {
            self.resample(i, state, rng)
                .map_err(|e| e.in_sampling(sweep, self.net.nodes()[i].name()))?;
        }
        Ok(())
    }

    /// Draw node `index` from its Markov-blanket conditional.
    fn resample(&self, index: usize, state: &mut RelevantVars, rng: &mut StdRng) -> Result<()> {
        let node = &self.net.nodes()[index];
        let var = node.variable();
        state.insert(var.id(), None);

        let mut factors = vec![node.make_dense_factor(state)?];
        for &child in self.net.child_indices(index) {
            let child_node = &self.net.nodes()[child];
            // a latent continuous child integrates to one
            if state.contains_key(&child_node.variable().id()) {
                factors.push(child_node.make_dense_factor(state)?);
            }
        }
        let mut conditional = product_all(&factors, &ProductOptions::default())?;
        conditional.normalize();

        let probs: Vec<f64> = if conditional.get_log_sum().is_finite() {
            conditional.log_values().iter().map(|v| v.exp()).collect()
        } else {
            warn!(node = var.name(), "zero-mass Gibbs conditional, sampling uniformly");
            vec![1.0 / var.size() as f64; var.size()]
        };
        let value = sample_from_distribution(&probs, rng);
        state.insert(var.id(), Some(Value::Discrete(value)));
        Ok(())
    }
}

/// Sample an index from a discrete distribution.
fn sample_from_distribution<R: Rng>(probs: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.random();
    let mut cumulative = 0.0;
    for (idx, &prob) in probs.iter().enumerate() {
        cumulative += prob;
        if u < cumulative {
            return idx;
        }
    }
    // Rounding can leave the cumulative mass just under `u`
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}
