//! Parameter learning by expectation-maximization.
//!
//! Each round runs an E-step over every sample, then an M-step per node:
//! - **E-step**: for every trainable node, the posterior over its family's
//!   unobserved variables is computed by bucket elimination and folded into
//!   the node's expected counts. Nodes are processed on a rayon pool, one task
//!   per node, and the pool join is the barrier before the M-step.
//! - **M-step**: each node replaces its parameters with the estimate its
//!   counts support (CPT pseudo-counts are honoured).
//!
//! # Examples
//!
//! ```ignore
//! let learner = EmLearner::new(EmConfig::default().with_max_rounds(50));
//! let report = learner.train(&mut net, &samples)?;
//! println!("converged after {} rounds", report.rounds);
//! ```

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EmConfig;
use crate::elimination::VarElim;
use crate::error::{FactorError, Result};
use crate::factor::Factor;
use crate::network::BayesNet;
use crate::node::{Node, NodeCounts};
use crate::variable::{Evidence, Variable};

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmReport {
    /// Rounds completed
    pub rounds: usize,
    /// Data log-likelihood at the start of each round
    pub log_likelihoods: Vec<f64>,
    /// Whether the improvement fell below the tolerance
    pub converged: bool,
}

impl EmReport {
    /// Log-likelihood measured in the last round.
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihoods.last().copied()
    }
}

/// Expectation-maximization learner for CPT and GDT parameters.
#[derive(Debug, Clone, Default)]
pub struct EmLearner {
    config: EmConfig,
}

impl EmLearner {
    pub fn new(config: EmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    /// Fit the trainable nodes of `net` to partially observed samples.
    pub fn train(&self, net: &mut BayesNet, data: &[Evidence]) -> Result<EmReport> {
        self.config.validate()?;
        if data.is_empty() {
            return Err(FactorError::InvalidValue(
                "EM needs at least one sample".to_string(),
            ));
        }
        if let Some(seed) = self.config.seed {
            net.randomize_cpts(seed);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| {
                FactorError::invalid_operation(format!("cannot build EM thread pool: {}", e))
            })?;
        let trainable: Vec<usize> = (0..net.len())
            .filter(|&i| net.nodes()[i].is_trainable())
            .collect();

        let mut report = EmReport {
            rounds: 0,
            log_likelihoods: Vec::new(),
            converged: false,
        };
        let mut previous = f64::NEG_INFINITY;

        for round in 0..self.config.max_rounds {
            let (counts, log_likelihood) = pool.install(|| self.expectation(net, data, &trainable))?;
            report.rounds = round + 1;
            report.log_likelihoods.push(log_likelihood);
            info!(round, log_likelihood, "EM round");

            for (&i, node_counts) in trainable.iter().zip(&counts) {
                if let Some(node) = net.node_mut(i) {
                    let name = node.name().to_string();
                    node.maximize_instance(node_counts)
                        .map_err(|e| e.in_maximization(round, name))?;
                }
            }

            if log_likelihood - previous < self.config.tolerance {
                report.converged = true;
                break;
            }
            previous = log_likelihood;
        }

        debug!(
            rounds = report.rounds,
            converged = report.converged,
            "EM finished"
        );
        Ok(report)
    }

    /// Expected counts per trainable node, and the data log-likelihood.
    fn expectation(
        &self,
        net: &BayesNet,
        data: &[Evidence],
        trainable: &[usize],
    ) -> Result<(Vec<NodeCounts>, f64)> {
        let ve = VarElim::new(net, self.config.inference);
        let accumulators: Vec<Mutex<NodeCounts>> = trainable
            .iter()
            .filter_map(|&i| net.nodes()[i].new_counts())
            .map(Mutex::new)
            .collect();

        let mut log_likelihood = 0.0;
        for (s, sample) in data.iter().enumerate() {
            log_likelihood += ve
                .log_likelihood(sample)
                .map_err(|e| e.in_learning(s, "evidence"))?;

            trainable
                .par_iter()
                .zip(accumulators.par_iter())
                .try_for_each(|(&i, accumulator)| {
                    let node = &net.nodes()[i];
                    count_sample(&ve, node, sample, accumulator)
                        .map_err(|e| e.in_learning(s, node.name()))
                })?;
        }

        let counts = accumulators.into_iter().map(Mutex::into_inner).collect();
        Ok((counts, log_likelihood))
    }
}

/// Fold one sample into a node's counts.
fn count_sample(
    ve: &VarElim<'_>,
    node: &Node,
    sample: &Evidence,
    accumulator: &Mutex<NodeCounts>,
) -> Result<()> {
    // a latent continuous node carries no statistics
    if !node.variable().is_enumerable() && !sample.contains(node.variable()) {
        return Ok(());
    }
    let posterior = family_posterior(ve, node, sample)?;
    node.count_instance(&mut accumulator.lock(), &posterior, sample, 1.0)
}

/// Normalized posterior over the unobserved enumerable members of a node's family.
fn family_posterior(ve: &VarElim<'_>, node: &Node, sample: &Evidence) -> Result<Factor> {
    let hidden: Vec<Variable> = node
        .family()
        .into_iter()
        .filter(|v| v.is_enumerable() && !sample.contains(v))
        .collect();
    if hidden.is_empty() {
        let mut certain = Factor::new("posterior", &[])?;
        certain.set_atomic_log_value(0.0)?;
        return Ok(certain);
    }
    let query = ve.make_query(&hidden, sample)?;
    Ok(ve.infer(&query)?.into_factor())
}
