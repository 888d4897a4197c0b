//! Densities of continuous variables attached to factor entries.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{FactorError, Result};
use crate::variable::Variable;

/// Univariate normal density.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: f64,
    pub variance: f64,
}

impl Gaussian {
    pub fn new(mean: f64, variance: f64) -> Result<Self> {
        if !mean.is_finite() || !variance.is_finite() || variance <= 0.0 {
            return Err(FactorError::InvalidValue(format!(
                "Gaussian needs finite mean and positive variance, got N({}, {})",
                mean, variance
            )));
        }
        Ok(Self { mean, variance })
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        let d = x - self.mean;
        -0.5 * ((2.0 * PI * self.variance).ln() + d * d / self.variance)
    }

    pub fn pdf(&self, x: f64) -> f64 {
        self.log_pdf(x).exp()
    }
}

/// Density of a continuous variable: a Gaussian or a weighted mixture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Density {
    Gaussian(Gaussian),
    /// Components with weights summing to one.
    Mixture(Vec<(f64, Density)>),
}

impl Density {
    /// Mixture of weighted components.
    ///
    /// Zero-weight components are dropped rather than mixed with weight 0,
    /// the remaining weights are renormalised, and a single survivor is
    /// returned as-is. Returns `None` when nothing has positive weight.
    pub fn mixture(components: Vec<(f64, Density)>) -> Option<Density> {
        let mut kept: Vec<(f64, Density)> = components
            .into_iter()
            .filter(|(w, _)| *w > 0.0 && w.is_finite())
            .collect();
        let total: f64 = kept.iter().map(|(w, _)| w).sum();
        if kept.is_empty() || total <= 0.0 {
            return None;
        }
        if kept.len() == 1 {
            return kept.pop().map(|(_, d)| d);
        }
        for (w, _) in kept.iter_mut() {
            *w /= total;
        }
        Some(Density::Mixture(kept))
    }

    pub fn pdf(&self, x: f64) -> f64 {
        match self {
            Density::Gaussian(g) => g.pdf(x),
            Density::Mixture(components) => components.iter().map(|(w, d)| w * d.pdf(x)).sum(),
        }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        match self {
            Density::Gaussian(g) => g.log_pdf(x),
            Density::Mixture(components) => {
                let logs: Vec<f64> = components
                    .iter()
                    .map(|(w, d)| w.ln() + d.log_pdf(x))
                    .collect();
                crate::logspace::log_sum_of_logs(&logs)
            }
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            Density::Gaussian(g) => g.mean,
            Density::Mixture(components) => components.iter().map(|(w, d)| w * d.mean()).sum(),
        }
    }

    /// Variance, by the law of total variance for mixtures.
    pub fn variance(&self) -> f64 {
        match self {
            Density::Gaussian(g) => g.variance,
            Density::Mixture(components) => {
                let mean = self.mean();
                components
                    .iter()
                    .map(|(w, d)| {
                        let dm = d.mean() - mean;
                        w * (d.variance() + dm * dm)
                    })
                    .sum()
            }
        }
    }

    /// Number of Gaussian leaves.
    pub fn num_components(&self) -> usize {
        match self {
            Density::Gaussian(_) => 1,
            Density::Mixture(components) => components.iter().map(|(_, d)| d.num_components()).sum(),
        }
    }
}

impl From<Gaussian> for Density {
    fn from(g: Gaussian) -> Self {
        Density::Gaussian(g)
    }
}

/// Joint density function: the densities attached to one discrete configuration.
///
/// Continuous variables in one JDF are independent given the configuration,
/// so the joint is the product of the per-variable densities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Jdf {
    entries: Vec<(Variable, Density)>,
}

impl Jdf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(var: Variable, density: Density) -> Self {
        Self {
            entries: vec![(var, density)],
        }
    }

    pub fn get(&self, var: &Variable) -> Option<&Density> {
        self.entries.iter().find(|(v, _)| v == var).map(|(_, d)| d)
    }

    pub fn set(&mut self, var: Variable, density: Density) {
        match self.entries.iter_mut().find(|(v, _)| *v == var) {
            Some(entry) => entry.1 = density,
            None => self.entries.push((var, density)),
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.entries.iter().map(|(v, _)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Disjoint union of two JDFs.
    pub fn merge(&self, other: &Jdf) -> Result<Jdf> {
        let mut merged = self.clone();
        for (var, density) in &other.entries {
            if merged.get(var).is_some() {
                return Err(FactorError::invalid_operation(format!(
                    "continuous variable {} appears in both operands",
                    var.name()
                )));
            }
            merged.entries.push((var.clone(), density.clone()));
        }
        Ok(merged)
    }

    /// Per-variable probability-weighted mixture of several JDFs.
    pub fn mix(weighted: &[(f64, &Jdf)]) -> Option<Jdf> {
        let mut vars: Vec<Variable> = Vec::new();
        for (_, jdf) in weighted {
            for var in jdf.variables() {
                if !vars.contains(var) {
                    vars.push(var.clone());
                }
            }
        }
        let mut mixed = Jdf::new();
        for var in vars {
            let components: Vec<(f64, Density)> = weighted
                .iter()
                .filter_map(|(w, jdf)| jdf.get(&var).map(|d| (*w, d.clone())))
                .collect();
            if let Some(density) = Density::mixture(components) {
                mixed.entries.push((var, density));
            }
        }
        if mixed.is_empty() {
            None
        } else {
            Some(mixed)
        }
    }

    /// Log joint density at the given observations (missing variables integrate to 1).
    pub fn log_pdf(&self, observations: &[(Variable, f64)]) -> f64 {
        observations
            .iter()
            .filter_map(|(var, x)| self.get(var).map(|d| d.log_pdf(*x)))
            .sum()
    }
}
