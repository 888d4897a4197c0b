//! Network nodes: conditional distributions that contribute one factor each.
//!
//! Every node turns its conditional distribution into a [`Factor`] given a
//! [`RelevantVars`] map:
//! - a variable mapped to `Some(value)` is sliced at that value,
//! - a variable mapped to `None` stays a free index dimension,
//! - a family variable missing from the map is summed out (a continuous
//!   child is integrated out).
//!
//! Nodes also expose the sufficient-statistics hooks used by EM.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::density::Gaussian;
use crate::error::{FactorError, Result};
use crate::factor::Factor;
use crate::logspace::safe_ln;
use crate::table::IndexedTable;
use crate::variable::{Evidence, RelevantVars, Value, Variable};

/// Allowed deviation of a conditional row from total mass one.
const ROW_TOLERANCE: f64 = 1e-6;

/// Variance floor applied when re-estimating Gaussian parameters.
pub const MIN_VARIANCE: f64 = 1e-6;

/// Anything that can contribute a factor to elimination.
pub trait FactorSource {
    fn make_dense_factor(&self, relevant: &RelevantVars) -> Result<Factor>;
}

/// Symmetric Dirichlet prior: `alpha` is added to every expected count in the M-step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PseudoCounts {
    pub alpha: f64,
}

impl PseudoCounts {
    pub fn new(alpha: f64) -> Result<Self> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(FactorError::InvalidValue(format!(
                "pseudo-count must be finite and non-negative, got {}",
                alpha
            )));
        }
        Ok(Self { alpha })
    }
}

/// How each enumerable family variable enters a node factor.
struct FamilySlice {
    partial: Vec<Option<usize>>,
    keep: Vec<Variable>,
    keep_positions: Vec<usize>,
    absent: Vec<Variable>,
    evidenced: bool,
}

impl FamilySlice {
    fn new(family: &[Variable], relevant: &RelevantVars) -> Result<Self> {
        let mut slice = FamilySlice {
            partial: Vec::with_capacity(family.len()),
            keep: Vec::new(),
            keep_positions: Vec::new(),
            absent: Vec::new(),
            evidenced: false,
        };
        for (pos, var) in family.iter().enumerate() {
            match relevant.get(&var.id()) {
                Some(Some(value)) => {
                    var.check_value(value)?;
                    slice.partial.push(value.as_discrete());
                    slice.evidenced = true;
                }
                Some(None) => {
                    slice.partial.push(None);
                    slice.keep.push(var.clone());
                    slice.keep_positions.push(pos);
                }
                None => {
                    slice.partial.push(None);
                    slice.keep.push(var.clone());
                    slice.keep_positions.push(pos);
                    slice.absent.push(var.clone());
                }
            }
        }
        Ok(slice)
    }

    fn target_key(&self, family_key: &[usize]) -> Vec<usize> {
        self.keep_positions.iter().map(|&p| family_key[p]).collect()
    }

    /// Sum out absent variables and stamp node-factor flags.
    fn finish(&self, factor: Factor, name: &str, evidenced: bool) -> Result<Factor> {
        let mut factor = factor.marginalize(&self.absent)?;
        factor.set_name(name);
        factor.set_evidenced(evidenced);
        factor.set_function(false);
        Ok(factor)
    }
}

/// Factor of a discrete child given a probability table laid out over `table`
/// (parents first, child last).
fn discrete_family_factor(
    name: &str,
    table: &IndexedTable,
    probs: &[f64],
    relevant: &RelevantVars,
) -> Result<Factor> {
    let family = table.variables();
    let child = family
        .last()
        .ok_or_else(|| FactorError::invalid_operation("node table has no child variable"))?;
    let child_size = child.size();
    let slice = FamilySlice::new(family, relevant)?;
    let mut factor = Factor::with_order(name, slice.keep.clone(), Vec::new())?;

    let uniform = -(child_size as f64).ln();
    let mut unset = false;
    for index in table.matching_indices(&slice.partial)? {
        let row = index / child_size;
        let row_mass: f64 = probs[row * child_size..(row + 1) * child_size].iter().sum();
        let target = factor
            .table()
            .index(&slice.target_key(&table.key_unchecked(index)))?;
        if row_mass <= 0.0 {
            unset = true;
            factor.set_log_value_raw(target, uniform);
        } else {
            factor.set_log_value_raw(target, safe_ln(probs[index])?);
        }
    }

    if unset {
        warn!(
            node = child.name(),
            "unset parameter rows, using a uniform distribution"
        );
    }

    slice.finish(factor, name, slice.evidenced)
}

/// Map every family variable to a domain index, from a posterior entry or the evidence.
struct FamilyKey {
    key: Vec<usize>,
    from_posterior: Vec<(usize, usize)>,
}

impl FamilyKey {
    fn new(family: &[Variable], posterior: &Factor, evidence: &Evidence) -> Result<Self> {
        let mut key = vec![0; family.len()];
        let mut from_posterior = Vec::new();
        for (pos, var) in family.iter().enumerate() {
            if let Some(p) = posterior.table().position(var) {
                from_posterior.push((pos, p));
            } else if let Some(value) = evidence.get(var) {
                key[pos] = value.as_discrete().ok_or_else(|| {
                    FactorError::InvalidValue(format!("{} observed with a continuous value", var.name()))
                })?;
            } else {
                return Err(FactorError::invalid_operation(format!(
                    "{} is neither in the family posterior nor observed",
                    var.name()
                )));
            }
        }
        Ok(Self { key, from_posterior })
    }

    fn fill(&mut self, posterior: &Factor, index: usize) -> &[usize] {
        let posterior_key = posterior.table().key_unchecked(index);
        for &(pos, p) in &self.from_posterior {
            self.key[pos] = posterior_key[p];
        }
        &self.key
    }
}

fn observed_key(family: &[Variable], evidence: &Evidence) -> Result<Vec<usize>> {
    family
        .iter()
        .map(|var| {
            evidence
                .get(var)
                .and_then(|v| v.as_discrete())
                .ok_or_else(|| {
                    FactorError::invalid_operation(format!("{} is not observed", var.name()))
                })
        })
        .collect()
}

/// Conditional probability table of an enumerable child.
#[derive(Clone, Debug)]
pub struct Cpt {
    variable: Variable,
    parents: Vec<Variable>,
    table: IndexedTable,
    probs: Vec<f64>,
    prior: Option<PseudoCounts>,
}

impl Cpt {
    /// Create from an array with axes `[parents..., child]`.
    ///
    /// Every row over the child must sum to one, or be all zeros (unset).
    pub fn new(variable: Variable, parents: Vec<Variable>, values: ArrayD<f64>) -> Result<Self> {
        if !variable.is_enumerable() {
            return Err(FactorError::InvalidDistribution(format!(
                "CPT child {} must be enumerable",
                variable.name()
            )));
        }
        if parents.contains(&variable) {
            return Err(FactorError::InvalidGraph(format!(
                "{} cannot be its own parent",
                variable.name()
            )));
        }
        let mut family = parents.clone();
        family.push(variable.clone());
        let table = IndexedTable::new(family)?;
        if values.shape() != table.sizes() {
            return Err(FactorError::InvalidDistribution(format!(
                "CPT of {} has shape {:?}, expected {:?}",
                variable.name(),
                values.shape(),
                table.sizes()
            )));
        }
        let probs: Vec<f64> = values.iter().copied().collect();
        let cpt = Self {
            variable,
            parents,
            table,
            probs,
            prior: None,
        };
        for row in 0..cpt.num_rows() {
            cpt.check_row(cpt.row_slice(row))?;
        }
        Ok(cpt)
    }

    /// Prior distribution of a root node.
    pub fn prior(variable: Variable, probs: &[f64]) -> Result<Self> {
        let values = ArrayD::from_shape_vec(IxDyn(&[probs.len()]), probs.to_vec())?;
        Self::new(variable, Vec::new(), values)
    }

    /// CPT with every row unset.
    pub fn unset(variable: Variable, parents: Vec<Variable>) -> Result<Self> {
        let mut shape: Vec<usize> = parents.iter().map(Variable::size).collect();
        shape.push(variable.size());
        Self::new(variable, parents, ArrayD::zeros(IxDyn(&shape)))
    }

    /// CPT with every row uniform.
    pub fn uniform(variable: Variable, parents: Vec<Variable>) -> Result<Self> {
        let mut shape: Vec<usize> = parents.iter().map(Variable::size).collect();
        shape.push(variable.size());
        let p = 1.0 / variable.size().max(1) as f64;
        Self::new(variable, parents, ArrayD::from_elem(IxDyn(&shape), p))
    }

    pub fn with_prior(mut self, prior: PseudoCounts) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn pseudo_counts(&self) -> Option<PseudoCounts> {
        self.prior
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn parents(&self) -> &[Variable] {
        &self.parents
    }

    /// Table over `[parents..., child]`.
    pub fn table(&self) -> &IndexedTable {
        &self.table
    }

    fn child_size(&self) -> usize {
        self.variable.size()
    }

    fn num_rows(&self) -> usize {
        self.probs.len() / self.child_size()
    }

    fn row_slice(&self, row: usize) -> &[f64] {
        let n = self.child_size();
        &self.probs[row * n..(row + 1) * n]
    }

    fn check_row(&self, row: &[f64]) -> Result<()> {
        if let Some(p) = row.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(FactorError::InvalidValue(format!(
                "CPT of {} has entry {}",
                self.variable.name(),
                p
            )));
        }
        let sum: f64 = row.iter().sum();
        if sum != 0.0 && (sum - 1.0).abs() > ROW_TOLERANCE {
            return Err(FactorError::InvalidDistribution(format!(
                "CPT row of {} sums to {}",
                self.variable.name(),
                sum
            )));
        }
        Ok(())
    }

    fn row_of(&self, parent_key: &[usize]) -> Result<usize> {
        let mut key = parent_key.to_vec();
        key.push(0);
        Ok(self.table.index(&key)? / self.child_size())
    }

    /// Distribution of the child given a parent configuration.
    pub fn row(&self, parent_key: &[usize]) -> Result<&[f64]> {
        Ok(self.row_slice(self.row_of(parent_key)?))
    }

    pub fn is_row_set(&self, parent_key: &[usize]) -> Result<bool> {
        Ok(self.row(parent_key)?.iter().sum::<f64>() > 0.0)
    }

    pub fn set_row(&mut self, parent_key: &[usize], row: &[f64]) -> Result<()> {
        if row.len() != self.child_size() {
            return Err(FactorError::InvalidDistribution(format!(
                "row of {} needs {} values, got {}",
                self.variable.name(),
                self.child_size(),
                row.len()
            )));
        }
        self.check_row(row)?;
        let start = self.row_of(parent_key)? * self.child_size();
        self.probs[start..start + row.len()].copy_from_slice(row);
        Ok(())
    }

    /// `P(child = value | parents = parent_key)`.
    pub fn probability(&self, parent_key: &[usize], value: usize) -> Result<f64> {
        let mut key = parent_key.to_vec();
        key.push(value);
        Ok(self.probs[self.table.index(&key)?])
    }

    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        Ok(ArrayD::from_shape_vec(
            IxDyn(self.table.sizes()),
            self.probs.clone(),
        )?)
    }

    /// Replace every row with a random distribution.
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        let n = self.child_size();
        for row in self.probs.chunks_mut(n) {
            for p in row.iter_mut() {
                *p = 0.05 + rng.random::<f64>();
            }
            let sum: f64 = row.iter().sum();
            for p in row.iter_mut() {
                *p /= sum;
            }
        }
    }

    fn log_probability(&self, evidence: &Evidence) -> Result<f64> {
        let key = observed_key(self.table.variables(), evidence)?;
        let index = self.table.index(&key)?;
        let row = index / self.child_size();
        if self.row_slice(row).iter().sum::<f64>() <= 0.0 {
            return Ok(-(self.child_size() as f64).ln());
        }
        safe_ln(self.probs[index])
    }

    fn count(&self, counts: &mut [f64], posterior: &Factor, evidence: &Evidence, weight: f64) -> Result<()> {
        let mut family = FamilyKey::new(self.table.variables(), posterior, evidence)?;
        for index in 0..posterior.len() {
            let p = posterior.log_value(index).exp();
            if p == 0.0 {
                continue;
            }
            let key = family.fill(posterior, index);
            counts[self.table.index(key)?] += weight * p;
        }
        Ok(())
    }

    fn maximize(&mut self, counts: &[f64]) -> Result<()> {
        let alpha = self.prior.map_or(0.0, |p| p.alpha);
        let n = self.child_size();
        for (row, expected) in self.probs.chunks_mut(n).zip(counts.chunks(n)) {
            let total: f64 = expected.iter().map(|c| c + alpha).sum();
            if total <= 0.0 {
                continue;
            }
            for (p, c) in row.iter_mut().zip(expected) {
                *p = (c + alpha) / total;
            }
        }
        Ok(())
    }
}

impl FactorSource for Cpt {
    fn make_dense_factor(&self, relevant: &RelevantVars) -> Result<Factor> {
        discrete_family_factor(
            &format!("P({})", self.variable.name()),
            &self.table,
            &self.probs,
            relevant,
        )
    }
}

/// Gaussian density table: a continuous child with one normal per parent configuration.
#[derive(Clone, Debug)]
pub struct Gdt {
    variable: Variable,
    parents: Vec<Variable>,
    table: IndexedTable,
    params: Vec<Option<Gaussian>>,
}

impl Gdt {
    /// `params` are listed in parent-table order (last parent fastest).
    pub fn new(variable: Variable, parents: Vec<Variable>, params: Vec<Gaussian>) -> Result<Self> {
        let mut gdt = Self::unset(variable, parents)?;
        if params.len() != gdt.table.size() {
            return Err(FactorError::InvalidDistribution(format!(
                "GDT of {} needs {} densities, got {}",
                gdt.variable.name(),
                gdt.table.size(),
                params.len()
            )));
        }
        gdt.params = params.into_iter().map(Some).collect();
        Ok(gdt)
    }

    /// GDT with no parameters set.
    pub fn unset(variable: Variable, parents: Vec<Variable>) -> Result<Self> {
        if variable.is_enumerable() {
            return Err(FactorError::InvalidDistribution(format!(
                "GDT child {} must be continuous",
                variable.name()
            )));
        }
        let table = IndexedTable::new(parents.clone())?;
        let params = vec![None; table.size()];
        Ok(Self {
            variable,
            parents,
            table,
            params,
        })
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn parents(&self) -> &[Variable] {
        &self.parents
    }

    pub fn gaussian(&self, parent_key: &[usize]) -> Result<Option<&Gaussian>> {
        Ok(self.params[self.table.index(parent_key)?].as_ref())
    }

    pub fn set_gaussian(&mut self, parent_key: &[usize], gaussian: Gaussian) -> Result<()> {
        let index = self.table.index(parent_key)?;
        self.params[index] = Some(gaussian);
        Ok(())
    }

    fn observation(&self, evidence: &Evidence) -> Option<f64> {
        evidence.get(&self.variable).and_then(|v| v.as_continuous())
    }

    fn log_probability(&self, evidence: &Evidence) -> Result<f64> {
        let x = self.observation(evidence).ok_or_else(|| {
            FactorError::invalid_operation(format!("{} is not observed", self.variable.name()))
        })?;
        let key = observed_key(&self.parents, evidence)?;
        Ok(match &self.params[self.table.index(&key)?] {
            Some(g) => g.log_pdf(x),
            None => 0.0,
        })
    }

    fn count(
        &self,
        weights: &mut [f64],
        sums: &mut [f64],
        sums_sq: &mut [f64],
        posterior: &Factor,
        evidence: &Evidence,
        weight: f64,
    ) -> Result<()> {
        // a latent continuous child carries no statistics
        let Some(x) = self.observation(evidence) else {
            return Ok(());
        };
        let mut family = FamilyKey::new(&self.parents, posterior, evidence)?;
        for index in 0..posterior.len() {
            let w = weight * posterior.log_value(index).exp();
            if w == 0.0 {
                continue;
            }
            let row = self.table.index(family.fill(posterior, index))?;
            weights[row] += w;
            sums[row] += w * x;
            sums_sq[row] += w * x * x;
        }
        Ok(())
    }

    fn maximize(&mut self, weights: &[f64], sums: &[f64], sums_sq: &[f64]) -> Result<()> {
        for (row, param) in self.params.iter_mut().enumerate() {
            let w = weights[row];
            if w <= 0.0 {
                continue;
            }
            let mean = sums[row] / w;
            let variance = (sums_sq[row] / w - mean * mean).max(MIN_VARIANCE);
            *param = Some(Gaussian::new(mean, variance)?);
        }
        Ok(())
    }
}

impl FactorSource for Gdt {
    fn make_dense_factor(&self, relevant: &RelevantVars) -> Result<Factor> {
        let name = format!("P({})", self.variable.name());
        let slice = FamilySlice::new(&self.parents, relevant)?;
        let (observed, free) = match relevant.get(&self.variable.id()) {
            Some(Some(value)) => {
                self.variable.check_value(value)?;
                (value.as_continuous(), false)
            }
            Some(None) => (None, true),
            None => (None, false),
        };
        let non_enum = if free {
            vec![self.variable.clone()]
        } else {
            Vec::new()
        };
        let mut factor = Factor::with_order(&name, slice.keep.clone(), non_enum)?;

        let mut matched = false;
        for index in self.table.matching_indices(&slice.partial)? {
            let Some(gaussian) = &self.params[index] else {
                continue;
            };
            matched = true;
            let target = factor
                .table()
                .index(&slice.target_key(&self.table.key_unchecked(index)))?;
            match observed {
                Some(x) => factor.set_log_value_raw(target, gaussian.log_pdf(x)),
                None => {
                    factor.set_log_value_raw(target, 0.0);
                    if free {
                        factor.set_distrib(target, &self.variable, (*gaussian).into())?;
                    }
                }
            }
        }

        if !matched {
            warn!(
                node = self.variable.name(),
                "no density matches the evidence, leaving the node uninformative"
            );
            for target in 0..factor.len() {
                factor.set_log_value_raw(target, 0.0);
            }
        }

        slice.finish(factor, &name, slice.evidenced || observed.is_some())
    }
}

/// Noisy-OR gate over Boolean parents.
///
/// `P(child = false | parents) = (1 - leak) * Π (1 - activation[i])` over the
/// active (`true`) parents.
#[derive(Clone, Debug)]
pub struct NoisyOr {
    variable: Variable,
    parents: Vec<Variable>,
    activation: Vec<f64>,
    leak: f64,
    table: IndexedTable,
}

impl NoisyOr {
    pub fn new(
        variable: Variable,
        parents: Vec<Variable>,
        activation: Vec<f64>,
        leak: f64,
    ) -> Result<Self> {
        for var in parents.iter().chain(std::iter::once(&variable)) {
            if var.size() != 2 {
                return Err(FactorError::InvalidDomain {
                    variable: var.name().to_string(),
                    reason: "noisy-OR variables must be Boolean".to_string(),
                });
            }
        }
        if activation.len() != parents.len() {
            return Err(FactorError::InvalidDistribution(format!(
                "noisy-OR of {} needs {} activation probabilities, got {}",
                variable.name(),
                parents.len(),
                activation.len()
            )));
        }
        if let Some(p) = activation
            .iter()
            .chain(std::iter::once(&leak))
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(FactorError::InvalidValue(format!(
                "noisy-OR probability {} outside [0, 1]",
                p
            )));
        }
        let mut family = parents.clone();
        family.push(variable.clone());
        let table = IndexedTable::new(family)?;
        Ok(Self {
            variable,
            parents,
            activation,
            leak,
            table,
        })
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn parents(&self) -> &[Variable] {
        &self.parents
    }

    /// The equivalent CPT entries over `[parents..., child]`.
    pub fn probabilities(&self) -> Vec<f64> {
        let mut probs = Vec::with_capacity(self.table.size());
        let parent_table = self.table.size() / 2;
        for row in 0..parent_table {
            let key = self.table.key_unchecked(row * 2);
            let off: f64 = self
                .activation
                .iter()
                .zip(&key)
                .filter(|(_, active)| **active == 1)
                .map(|(p, _)| 1.0 - p)
                .product::<f64>()
                * (1.0 - self.leak);
            probs.push(off);
            probs.push(1.0 - off);
        }
        probs
    }

    fn log_probability(&self, evidence: &Evidence) -> Result<f64> {
        let key = observed_key(self.table.variables(), evidence)?;
        safe_ln(self.probabilities()[self.table.index(&key)?])
    }
}

impl FactorSource for NoisyOr {
    fn make_dense_factor(&self, relevant: &RelevantVars) -> Result<Factor> {
        discrete_family_factor(
            &format!("P({})", self.variable.name()),
            &self.table,
            &self.probabilities(),
            relevant,
        )
    }
}

/// Expected sufficient statistics accumulated during an E-step.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeCounts {
    /// Expected counts over the CPT table.
    Discrete(Vec<f64>),
    /// Weighted moments per parent configuration.
    Gaussian {
        weights: Vec<f64>,
        sums: Vec<f64>,
        sums_sq: Vec<f64>,
    },
}

impl NodeCounts {
    /// Add another accumulator of the same shape.
    pub fn merge(&mut self, other: &NodeCounts) -> Result<()> {
        fn add(into: &mut [f64], from: &[f64]) {
            into.iter_mut().zip(from).for_each(|(a, b)| *a += b);
        }
        match (self, other) {
            (NodeCounts::Discrete(a), NodeCounts::Discrete(b)) if a.len() == b.len() => add(a, b),
            (
                NodeCounts::Gaussian {
                    weights,
                    sums,
                    sums_sq,
                },
                NodeCounts::Gaussian {
                    weights: w,
                    sums: s,
                    sums_sq: sq,
                },
            ) if weights.len() == w.len() => {
                add(weights, w);
                add(sums, s);
                add(sums_sq, sq);
            }
            _ => {
                return Err(FactorError::invalid_operation(
                    "cannot merge counts of different shapes",
                ))
            }
        }
        Ok(())
    }

    /// Total weight seen.
    pub fn total(&self) -> f64 {
        match self {
            NodeCounts::Discrete(c) => c.iter().sum(),
            NodeCounts::Gaussian { weights, .. } => weights.iter().sum(),
        }
    }
}

/// A node of a Bayesian network.
#[derive(Clone, Debug)]
pub enum Node {
    Cpt(Cpt),
    Gdt(Gdt),
    NoisyOr(NoisyOr),
}

impl Node {
    pub fn variable(&self) -> &Variable {
        match self {
            Node::Cpt(n) => n.variable(),
            Node::Gdt(n) => n.variable(),
            Node::NoisyOr(n) => n.variable(),
        }
    }

    pub fn parents(&self) -> &[Variable] {
        match self {
            Node::Cpt(n) => n.parents(),
            Node::Gdt(n) => n.parents(),
            Node::NoisyOr(n) => n.parents(),
        }
    }

    pub fn name(&self) -> &str {
        self.variable().name()
    }

    /// Parents followed by the node's own variable.
    pub fn family(&self) -> Vec<Variable> {
        let mut family = self.parents().to_vec();
        family.push(self.variable().clone());
        family
    }

    /// Whether EM can re-estimate this node.
    pub fn is_trainable(&self) -> bool {
        !matches!(self, Node::NoisyOr(_))
    }

    /// Zeroed accumulator for this node, if it is trainable.
    pub fn new_counts(&self) -> Option<NodeCounts> {
        match self {
            Node::Cpt(n) => Some(NodeCounts::Discrete(vec![0.0; n.table.size()])),
            Node::Gdt(n) => {
                let len = n.table.size();
                Some(NodeCounts::Gaussian {
                    weights: vec![0.0; len],
                    sums: vec![0.0; len],
                    sums_sq: vec![0.0; len],
                })
            }
            Node::NoisyOr(_) => None,
        }
    }

    /// Accumulate expected statistics from one sample.
    ///
    /// `posterior` is the normalized distribution of the family's unobserved
    /// enumerable variables; the rest of the family is read from `evidence`.
    pub fn count_instance(
        &self,
        counts: &mut NodeCounts,
        posterior: &Factor,
        evidence: &Evidence,
        weight: f64,
    ) -> Result<()> {
        match (self, counts) {
            (Node::Cpt(n), NodeCounts::Discrete(c)) => n.count(c, posterior, evidence, weight),
            (
                Node::Gdt(n),
                NodeCounts::Gaussian {
                    weights,
                    sums,
                    sums_sq,
                },
            ) => n.count(weights, sums, sums_sq, posterior, evidence, weight),
            _ => Err(FactorError::invalid_operation(format!(
                "node {} cannot accumulate these counts",
                self.name()
            ))),
        }
    }

    /// Replace parameters with their maximum a posteriori estimate.
    pub fn maximize_instance(&mut self, counts: &NodeCounts) -> Result<()> {
        let name = self.name().to_string();
        match (self, counts) {
            (Node::Cpt(n), NodeCounts::Discrete(c)) => n.maximize(c),
            (
                Node::Gdt(n),
                NodeCounts::Gaussian {
                    weights,
                    sums,
                    sums_sq,
                },
            ) => n.maximize(weights, sums, sums_sq),
            _ => Err(FactorError::invalid_operation(format!(
                "node {} cannot be trained from these counts",
                name
            ))),
        }
    }

    /// `ln P(node | parents)` with the whole family observed.
    pub fn log_probability(&self, evidence: &Evidence) -> Result<f64> {
        match self {
            Node::Cpt(n) => n.log_probability(evidence),
            Node::Gdt(n) => n.log_probability(evidence),
            Node::NoisyOr(n) => n.log_probability(evidence),
        }
    }

    /// Value of this node in the evidence, if observed.
    pub fn observed(&self, evidence: &Evidence) -> Option<Value> {
        evidence.get(self.variable())
    }
}

impl FactorSource for Node {
    fn make_dense_factor(&self, relevant: &RelevantVars) -> Result<Factor> {
        match self {
            Node::Cpt(n) => n.make_dense_factor(relevant),
            Node::Gdt(n) => n.make_dense_factor(relevant),
            Node::NoisyOr(n) => n.make_dense_factor(relevant),
        }
    }
}

impl From<Cpt> for Node {
    fn from(n: Cpt) -> Self {
        Node::Cpt(n)
    }
}

impl From<Gdt> for Node {
    fn from(n: Gdt) -> Self {
        Node::Gdt(n)
    }
}

impl From<NoisyOr> for Node {
    fn from(n: NoisyOr) -> Self {
        Node::NoisyOr(n)
    }
}
