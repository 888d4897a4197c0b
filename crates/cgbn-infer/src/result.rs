//! Inference results.

use std::fmt;

use crate::density::{Density, Jdf};
use crate::error::{FactorError, Result};
use crate::factor::Factor;
use crate::query::QueryMode;
use crate::variable::{Assignment, Variable};

/// Joint table over the query variables, indexed in the order they were requested.
///
/// Marginal and likelihood results are normalized; MPE results keep the raw
/// max-product values so the best entry equals `P(mpe, E)`.
#[derive(Clone, Debug)]
pub struct CgTable {
    factor: Factor,
    query: Vec<Variable>,
    mode: QueryMode,
    mpe: Option<Assignment>,
    log_likelihood: Option<f64>,
}

impl CgTable {
    pub(crate) fn new(
        factor: Factor,
        query: Vec<Variable>,
        mode: QueryMode,
        mpe: Option<Assignment>,
        log_likelihood: Option<f64>,
    ) -> Self {
        Self {
            factor,
            query,
            mode,
            mpe,
            log_likelihood,
        }
    }

    /// Enumerable query variables, in index order.
    pub fn variables(&self) -> &[Variable] {
        self.factor.enum_variables()
    }

    /// All query variables as requested, continuous ones included.
    pub fn query_variables(&self) -> &[Variable] {
        &self.query
    }

    pub fn non_enum_variables(&self) -> &[Variable] {
        self.factor.non_enum_variables()
    }

    pub fn has_non_enum_variables(&self) -> bool {
        self.factor.has_non_enum_variables()
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.factor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factor.is_empty()
    }

    pub fn key(&self, index: usize) -> Result<Vec<usize>> {
        self.factor.key(index)
    }

    pub fn index(&self, key: &[usize]) -> Result<usize> {
        self.factor.index(key)
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(FactorError::index(format!(
                "index {} out of range [0, {})",
                index,
                self.len()
            )));
        }
        Ok(())
    }

    pub fn log_value(&self, index: usize) -> Result<f64> {
        self.check(index)?;
        Ok(self.factor.log_value(index))
    }

    /// Probability (not log) of the entry at `index`.
    pub fn probability(&self, index: usize) -> Result<f64> {
        Ok(self.log_value(index)?.exp())
    }

    pub fn probability_of(&self, key: &[usize]) -> Result<f64> {
        self.probability(self.index(key)?)
    }

    /// Indices of entries with non-zero probability.
    pub fn indices(&self) -> Vec<usize> {
        self.factor
            .log_values()
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > f64::NEG_INFINITY)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn jdf(&self, index: usize) -> Option<&Jdf> {
        self.factor.get_jdf(index)
    }

    pub fn density(&self, index: usize, var: &Variable) -> Option<&Density> {
        self.factor.get_distrib(index, var)
    }

    /// Density of a continuous query variable with the enumerable ones summed out.
    pub fn marginal_density(&self, var: &Variable) -> Option<Density> {
        let log_sum = self.factor.get_log_sum();
        let components: Vec<(f64, Density)> = (0..self.len())
            .filter_map(|i| {
                let weight = (self.factor.log_value(i) - log_sum).exp();
                self.density(i, var).map(|d| (weight, d.clone()))
            })
            .collect();
        Density::mixture(components)
    }

    /// Normalized marginal of one enumerable query variable.
    pub fn marginal(&self, var: &Variable) -> Result<Vec<f64>> {
        let others: Vec<Variable> = self
            .variables()
            .iter()
            .filter(|v| *v != var)
            .cloned()
            .collect();
        if others.len() == self.variables().len() {
            return Err(FactorError::InvalidVariable {
                variable: var.name().to_string(),
                operation: "marginal".to_string(),
            });
        }
        let mut margin = self.factor.marginalize(&others)?;
        margin.normalize();
        Ok(margin.log_values().iter().map(|v| v.exp()).collect())
    }

    /// Most probable assignment of the query and eliminated variables (MPE mode only).
    pub fn mpe(&self) -> Option<&Assignment> {
        self.mpe.as_ref()
    }

    /// Exact `ln P(E)`, when the query kept every node the evidence depends on.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.log_likelihood
    }

    pub fn factor(&self) -> &Factor {
        &self.factor
    }

    pub fn into_factor(self) -> Factor {
        self.factor
    }
}

impl fmt::Display for CgTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.variables().iter().map(Variable::name).collect();
        writeln!(f, "P({})", names.join(", "))?;
        for index in 0..self.len() {
            let key = self.factor.table().key_unchecked(index);
            let labels: Vec<&str> = self
                .variables()
                .iter()
                .zip(&key)
                .map(|(var, &value)| var.label(value).unwrap_or("?"))
                .collect();
            write!(f, "{:>12} {:.6}", labels.join(" "), self.factor.log_value(index).exp())?;
            if let Some(jdf) = self.jdf(index) {
                for var in jdf.variables() {
                    if let Some(d) = jdf.get(var) {
                        write!(f, "  {} ~ N({:.4}, {:.4})", var.name(), d.mean(), d.variance())?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
