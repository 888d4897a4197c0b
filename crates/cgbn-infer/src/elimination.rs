//! Exact inference by bucket elimination.
//!
//! One `infer` call runs five phases:
//! 1. one bucket per variable to eliminate, in reverse elimination order,
//!    after a leading query bucket;
//! 2. each node factor goes to the first bucket, scanning from the end, whose
//!    variable it mentions;
//! 3. buckets left without factors hand their variables forward and are dropped;
//! 4. buckets are processed from last to first: multiply, eliminate, and
//!    re-insert the result into the nearest earlier bucket it mentions;
//! 5. the query bucket's product is remapped to the requested variable order.

use tracing::{debug, trace};

use crate::algebra::{margin, max_margin_traced, product_all};
use crate::config::InferenceConfig;
use crate::elimination_ordering::EliminationOrdering;
use crate::error::{FactorError, Result};
use crate::factor::{Factor, MaxTrace};
use crate::network::BayesNet;
use crate::node::FactorSource;
use crate::query::{Query, QueryMode, Relevance};
use crate::result::CgTable;
use crate::variable::{Assignment, Evidence, Variable};

/// A working set: the variables it eliminates and the factors assigned to it.
#[derive(Debug)]
struct Bucket {
    vars: Vec<Variable>,
    factors: Vec<Factor>,
}

impl Bucket {
    fn new(vars: Vec<Variable>) -> Self {
        Self {
            vars,
            factors: Vec::new(),
        }
    }

    /// `true` if one of the bucket's variables indexes `factor`.
    fn matches(&self, factor: &Factor) -> bool {
        self.vars.iter().any(|v| factor.table().contains(v))
    }

    fn mentions(&self, var: &Variable) -> bool {
        self.factors.iter().any(|f| f.contains(var))
    }
}

/// Place `factor` in the nearest bucket below `upto`, scanning downwards.
fn assign(buckets: &mut [Bucket], factor: Factor, upto: usize) -> Result<()> {
    if let Some(k) = (0..upto).rev().find(|&k| buckets[k].matches(&factor)) {
        buckets[k].factors.push(factor);
        return Ok(());
    }
    if factor.is_atomic() {
        // fully evidenced or continuous-only: a scaling term for the query bucket
        buckets[0].factors.push(factor);
        return Ok(());
    }
    Err(FactorError::BucketAssignment {
        factor: factor.name().to_string(),
    })
}

/// Bucket-elimination engine over a borrowed network.
///
/// The network is only read, so several engines may run on one network at once.
pub struct VarElim<'a> {
    net: &'a BayesNet,
    config: InferenceConfig,
}

impl<'a> VarElim<'a> {
    pub fn new(net: &'a BayesNet, config: InferenceConfig) -> Self {
        Self { net, config }
    }

    pub fn net(&self) -> &BayesNet {
        self.net
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Posterior `P(query | evidence)`.
    pub fn make_query(&self, query: &[Variable], evidence: &Evidence) -> Result<Query> {
        let relevance = if self.config.prune_dseparated {
            Relevance::Requisite
        } else {
            Relevance::All
        };
        self.build_query(QueryMode::Marginal, query, evidence, relevance)
    }

    /// Most probable explanation of every unobserved variable, tabulated over `query`.
    pub fn make_mpe(&self, query: &[Variable], evidence: &Evidence) -> Result<Query> {
        self.build_query(QueryMode::Mpe, query, evidence, Relevance::All)
    }

    /// Probability of the evidence.
    pub fn make_likelihood(&self, evidence: &Evidence) -> Result<Query> {
        self.build_query(QueryMode::Likelihood, &[], evidence, Relevance::Ancestral)
    }

    fn build_query(
        &self,
        mode: QueryMode,
        query: &[Variable],
        evidence: &Evidence,
        relevance: Relevance,
    ) -> Result<Query> {
        for (i, var) in query.iter().enumerate() {
            if self.net.node_index(var).is_none() {
                return Err(FactorError::VariableNotFound(var.name().to_string()));
            }
            if query[..i].contains(var) {
                return Err(FactorError::invalid_operation(format!(
                    "{} queried twice",
                    var.name()
                )));
            }
            if evidence.contains(var) {
                return Err(FactorError::invalid_operation(format!(
                    "{} is both queried and observed",
                    var.name()
                )));
            }
        }
        let mut observed: Vec<Variable> = Vec::with_capacity(evidence.len());
        for (var, _) in evidence.iter() {
            if self.net.node_index(var).is_none() {
                return Err(FactorError::VariableNotFound(var.name().to_string()));
            }
            observed.push(var.clone());
        }

        let candidates = match relevance {
            Relevance::Requisite => self.net.dconnected(query, evidence)?,
            Relevance::Ancestral => {
                let mut roots = query.to_vec();
                roots.extend(observed);
                self.net.ancestral(&roots)?
            }
            Relevance::All => self.net.ordered()?,
        };

        // a latent continuous node integrates to one and never needs a factor
        let nodes: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| {
                let var = self.net.nodes()[i].variable();
                var.is_enumerable() || query.contains(var) || evidence.contains(var)
            })
            .collect();

        let eliminate: Vec<Variable> = nodes
            .iter()
            .map(|&i| self.net.nodes()[i].variable())
            .filter(|v| v.is_enumerable() && !query.contains(v) && !evidence.contains(v))
            .cloned()
            .collect();

        debug!(
            mode = ?mode,
            query = query.len(),
            evidence = evidence.len(),
            nodes = nodes.len(),
            eliminate = eliminate.len(),
            "built query"
        );

        Ok(Query {
            mode,
            variables: query.to_vec(),
            evidence: evidence.clone(),
            eliminate,
            nodes,
            relevance,
            order: None,
        })
    }

    /// `ln P(evidence)`.
    pub fn log_likelihood(&self, evidence: &Evidence) -> Result<f64> {
        let result = self.infer(&self.make_likelihood(evidence)?)?;
        result.log_likelihood().ok_or_else(|| {
            FactorError::VarElimInternal("likelihood query produced no log-likelihood".to_string())
        })
    }

    /// Run bucket elimination for one query.
    pub fn infer(&self, query: &Query) -> Result<CgTable> {
        let options = self.config.product_options();

        let relevant = query.relevant_vars(
            query
                .nodes
                .iter()
                .map(|&i| self.net.nodes()[i].variable().clone()),
        );
        let factors: Vec<Factor> = query
            .nodes
            .iter()
            .map(|&i| self.net.nodes()[i].make_dense_factor(&relevant))
            .collect::<Result<_>>()?;

        let order = match &query.order {
            Some(order) => order.clone(),
            None => {
                let scopes: Vec<Vec<Variable>> = factors
                    .iter()
                    .map(|f| {
                        let mut scope = f.enum_variables().to_vec();
                        scope.extend(f.non_enum_variables().iter().cloned());
                        scope
                    })
                    .collect();
                EliminationOrdering::new(self.config.strategy).compute_order(&scopes, &query.eliminate)?
            }
        };
        if let Some(var) = order.iter().find(|v| !v.is_enumerable()) {
            return Err(FactorError::UnsupportedMarginalization {
                variable: var.name().to_string(),
            });
        }

        // phase 1: [query] ++ reverse(order), processed from the end
        let mut buckets: Vec<Bucket> = Vec::with_capacity(order.len() + 1);
        buckets.push(Bucket::new(query.variables.clone()));
        buckets.extend(order.iter().rev().map(|v| Bucket::new(vec![v.clone()])));

        // phase 2
        let len = buckets.len();
        for factor in factors {
            assign(&mut buckets, factor, len)?;
        }

        // phase 3
        for i in 1..buckets.len() {
            if !buckets[i].factors.is_empty() {
                continue;
            }
            let vars = std::mem::take(&mut buckets[i].vars);
            for var in vars {
                let target = (i + 1..buckets.len())
                    .find(|&j| buckets[j].mentions(&var))
                    .or_else(|| (1..buckets.len()).rev().find(|&j| !buckets[j].factors.is_empty()));
                if let Some(j) = target {
                    buckets[j].vars.push(var);
                }
            }
        }
        let mut position = 0;
        buckets.retain(|b| {
            position += 1;
            position == 1 || !b.factors.is_empty()
        });
        debug!(buckets = buckets.len(), "assigned factors to buckets");

        // phase 4
        let mut traces: Vec<MaxTrace> = Vec::new();
        for k in (1..buckets.len()).rev() {
            let bucket_factors = std::mem::take(&mut buckets[k].factors);
            let joint = product_all(&bucket_factors, &options)?;
            let present: Vec<Variable> = buckets[k]
                .vars
                .iter()
                .filter(|v| joint.table().contains(v))
                .cloned()
                .collect();
            trace!(
                bucket = k,
                factors = bucket_factors.len(),
                size = joint.len(),
                eliminate = present.len(),
                "processing bucket"
            );
            let reduced = if query.mode == QueryMode::Mpe {
                let (reduced, max_trace) = max_margin_traced(&joint, &present)?;
                traces.push(max_trace);
                reduced
            } else {
                margin(&joint, &present)?
            };
            assign(&mut buckets, reduced, k)?;
        }

        // phase 5
        let first = buckets
            .first_mut()
            .ok_or_else(|| FactorError::VarElimInternal("query bucket is missing".to_string()))?;
        let final_factor = product_all(&std::mem::take(&mut first.factors), &options)?;
        self.extract(query, final_factor, &traces)
    }

    fn extract(&self, query: &Query, final_factor: Factor, traces: &[MaxTrace]) -> Result<CgTable> {
        let enum_query: Vec<Variable> = query
            .variables
            .iter()
            .filter(|v| v.is_enumerable())
            .cloned()
            .collect();
        if let Some(var) = final_factor
            .enum_variables()
            .iter()
            .find(|v| !enum_query.contains(v))
        {
            return Err(FactorError::VarElimInternal(format!(
                "{} survived elimination",
                var.name()
            )));
        }
        if let Some(var) = enum_query
            .iter()
            .find(|v| !final_factor.table().contains(v))
        {
            return Err(FactorError::VarElimInternal(format!(
                "query variable {} is missing from the final factor",
                var.name()
            )));
        }

        let mut factor = final_factor.reorder(&enum_query)?;
        factor.set_name("result");
        let log_mass = factor.get_log_sum();
        if log_mass == f64::NEG_INFINITY {
            return Err(FactorError::ZeroProbabilityEvidence);
        }

        match query.mode {
            QueryMode::Mpe => {
                let best = factor.argmax();
                let key = factor.table().key(best)?;
                let mut assignment: Assignment = enum_query.iter().cloned().zip(key).collect();
                for max_trace in traces.iter().rev() {
                    max_trace.restore(&mut assignment)?;
                }
                debug!(log_value = factor.log_value(best), "most probable explanation");
                Ok(CgTable::new(
                    factor,
                    query.variables.clone(),
                    query.mode,
                    Some(assignment),
                    None,
                ))
            }
            QueryMode::Marginal | QueryMode::Likelihood => {
                let log_likelihood = match query.relevance {
                    Relevance::Ancestral | Relevance::All => Some(log_mass),
                    Relevance::Requisite => None,
                };
                factor.normalize();
                Ok(CgTable::new(
                    factor,
                    query.variables.clone(),
                    query.mode,
                    None,
                    log_likelihood,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Cpt;
    use crate::variable::Value;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn chain() -> (BayesNet, Variable, Variable, Variable) {
        let a = Variable::boolean("A");
        let b = Variable::boolean("B");
        let c = Variable::boolean("C");
        let mut net = BayesNet::new();
        net.add_node(Cpt::prior(a.clone(), &[0.7, 0.3]).unwrap()).unwrap();
        net.add_node(
            Cpt::new(b.clone(), vec![a.clone()], array![[0.9, 0.1], [0.4, 0.6]].into_dyn()).unwrap(),
        )
        .unwrap();
        net.add_node(
            Cpt::new(c.clone(), vec![b.clone()], array![[0.8, 0.2], [0.3, 0.7]].into_dyn()).unwrap(),
        )
        .unwrap();
        (net, a, b, c)
    }

    #[test]
    fn test_query_validation() {
        let (net, a, _, c) = chain();
        let ve = VarElim::new(&net, InferenceConfig::default());
        let ev = Evidence::new().with(&a, Value::Discrete(1)).unwrap();
        assert!(ve.make_query(&[a.clone()], &ev).is_err());
        assert!(ve.make_query(&[c.clone(), c.clone()], &Evidence::new()).is_err());
        assert!(matches!(
            ve.make_query(&[Variable::boolean("Z")], &Evidence::new()),
            Err(FactorError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_eliminate_excludes_query_and_evidence() {
        let (net, a, b, c) = chain();
        let ve = VarElim::new(&net, InferenceConfig::default().with_pruning(false));
        let ev = Evidence::new().with(&a, Value::Discrete(0)).unwrap();
        let q = ve.make_query(&[c.clone()], &ev).unwrap();
        assert_eq!(q.eliminate(), &[b]);
        assert_eq!(q.nodes(), &[0, 1, 2]);
    }

    #[test]
    fn test_custom_order_must_cover_eliminated() {
        let (net, a, b, c) = chain();
        let ve = VarElim::new(&net, InferenceConfig::default());
        let q = ve.make_query(&[c.clone()], &Evidence::new()).unwrap();
        assert!(q.clone().with_elimination_order(vec![a.clone()]).is_err());
        assert!(q.clone().with_elimination_order(vec![a.clone(), c]).is_err());
        let q = q.with_elimination_order(vec![b, a]).unwrap();
        let p = ve.infer(&q).unwrap();
        // P(C=1) = 0.2 + 0.5 * P(B=1), P(B=1) = 0.07 + 0.18
        assert_abs_diff_eq!(p.probability(1).unwrap(), 0.2 + 0.5 * 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_continuous_in_order_is_unsupported() {
        use crate::density::Gaussian;
        use crate::node::Gdt;

        let (mut net, a, b, c) = chain();
        let x = Variable::continuous("X");
        net.add_node(
            Gdt::new(
                x.clone(),
                vec![c.clone()],
                vec![Gaussian::new(0.0, 1.0).unwrap(), Gaussian::new(2.0, 1.0).unwrap()],
            )
            .unwrap(),
        )
        .unwrap();
        let ve = VarElim::new(&net, InferenceConfig::default());
        let q = ve.make_query(&[b.clone()], &Evidence::new()).unwrap();
        assert!(q.clone().with_elimination_order(vec![a.clone(), c, x.clone()]).is_err());
        let q = q.with_elimination_order(vec![a, x]).unwrap();
        assert!(matches!(
            ve.infer(&q),
            Err(FactorError::UnsupportedMarginalization { .. })
        ));
    }

    #[test]
    fn test_bucket_assignment_failure() {
        let a = Variable::boolean("A");
        let b = Variable::boolean("B");
        let mut buckets = vec![Bucket::new(vec![a.clone()])];
        let stray = Factor::new("stray", &[b]).unwrap();
        assert!(matches!(
            assign(&mut buckets, stray, 1),
            Err(FactorError::BucketAssignment { .. })
        ));
        let atomic = Factor::new("atomic", &[]).unwrap();
        assign(&mut buckets, atomic, 1).unwrap();
        assert_eq!(buckets[0].factors.len(), 1);
    }

    #[test]
    fn test_zero_probability_evidence() {
        let a = Variable::boolean("A");
        let b = Variable::boolean("B");
        let mut net = BayesNet::new();
        net.add_node(Cpt::prior(a.clone(), &[1.0, 0.0]).unwrap()).unwrap();
        net.add_node(
            Cpt::new(b.clone(), vec![a.clone()], array![[1.0, 0.0], [0.5, 0.5]].into_dyn()).unwrap(),
        )
        .unwrap();
        let ve = VarElim::new(&net, InferenceConfig::default());
        let ev = Evidence::new().with(&b, Value::Discrete(1)).unwrap();
        assert!(matches!(
            ve.log_likelihood(&ev),
            Err(FactorError::ZeroProbabilityEvidence)
        ));
    }
}
