//! Immutable query values consumed by [`crate::VarElim::infer`].

use serde::{Deserialize, Serialize};

use crate::error::{FactorError, Result};
use crate::variable::{Evidence, RelevantVars, Variable};

/// What an inference call computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    /// Normalized posterior over the query variables.
    Marginal,
    /// Most probable explanation: latent variables are maxed out.
    Mpe,
    /// Probability of the evidence alone.
    Likelihood,
}

/// Which network nodes contribute factors to a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relevance {
    /// Bayes-ball requisite nodes; the result is exact only after normalizing.
    Requisite,
    /// Ancestors of the query and evidence; the total mass is `P(E)`.
    Ancestral,
    /// Every node.
    All,
}

/// The triple (Q, E, X) plus the nodes whose factors take part.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) mode: QueryMode,
    pub(crate) variables: Vec<Variable>,
    pub(crate) evidence: Evidence,
    pub(crate) eliminate: Vec<Variable>,
    pub(crate) nodes: Vec<usize>,
    pub(crate) relevance: Relevance,
    pub(crate) order: Option<Vec<Variable>>,
}

impl Query {
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Query variables in the order the caller asked for them.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    /// Variables to eliminate, in topological order.
    pub fn eliminate(&self) -> &[Variable] {
        &self.eliminate
    }

    /// Indices of the contributing nodes, in topological order.
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn relevance(&self) -> Relevance {
        self.relevance
    }

    pub fn elimination_order(&self) -> Option<&[Variable]> {
        self.order.as_deref()
    }

    /// Fix the elimination order instead of using the configured heuristic.
    ///
    /// Every variable to eliminate must appear exactly once. A continuous
    /// variable outside the query may be listed, but inference will then
    /// fail with `UnsupportedMarginalization`.
    pub fn with_elimination_order(mut self, order: Vec<Variable>) -> Result<Self> {
        for (i, var) in order.iter().enumerate() {
            if order[..i].contains(var) {
                return Err(FactorError::invalid_operation(format!(
                    "{} listed twice in the elimination order",
                    var.name()
                )));
            }
            let allowed = self.eliminate.contains(var)
                || (!var.is_enumerable()
                    && !self.variables.contains(var)
                    && !self.evidence.contains(var));
            if !allowed {
                return Err(FactorError::invalid_operation(format!(
                    "{} is not a variable to eliminate",
                    var.name()
                )));
            }
        }
        if let Some(missing) = self.eliminate.iter().find(|v| !order.contains(v)) {
            return Err(FactorError::invalid_operation(format!(
                "elimination order is missing {}",
                missing.name()
            )));
        }
        self.order = Some(order);
        Ok(self)
    }

    /// Evidence as slicing values, plus every free variable of the query.
    pub(crate) fn relevant_vars(&self, free: impl IntoIterator<Item = Variable>) -> RelevantVars {
        let mut relevant = self.evidence.to_relevant();
        for var in free {
            relevant.entry(var.id()).or_insert(None);
        }
        relevant
    }
}
