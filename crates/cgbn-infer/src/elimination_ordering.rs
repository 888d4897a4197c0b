//! Elimination ordering heuristics for bucket elimination.
//!
//! Different heuristics can produce significantly different elimination orders,
//! which affects the size of the intermediate factors. The result of inference
//! does not depend on the order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::variable::Variable;

/// Strategy for computing the elimination order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EliminationStrategy {
    /// Network topological order: parents are eliminated before children
    #[default]
    Topological,
    /// Min-degree: Choose variable with fewest neighbors
    MinDegree,
    /// Min-fill: Choose variable that introduces fewest new edges
    MinFill,
    /// Weighted min-fill: Min-fill weighted by the size of the created table
    WeightedMinFill,
}

type Adjacency = HashMap<Variable, HashSet<Variable>>;

/// Compute elimination orderings over the interaction graph of factor scopes.
#[derive(Debug, Clone, Default)]
pub struct EliminationOrdering {
    strategy: EliminationStrategy,
}

impl EliminationOrdering {
    pub fn new(strategy: EliminationStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> EliminationStrategy {
        self.strategy
    }

    /// Order `vars` for elimination.
    ///
    /// `vars` must already be in topological order; `scopes` are the variable
    /// sets of the factors taking part. Ties keep the incoming order.
    pub fn compute_order(&self, scopes: &[Vec<Variable>], vars: &[Variable]) -> Result<Vec<Variable>> {
        if self.strategy == EliminationStrategy::Topological {
            return Ok(vars.to_vec());
        }

        let mut remaining: Vec<Variable> = vars.to_vec();
        let mut adjacency = build_adjacency(scopes, vars);
        let mut order = Vec::with_capacity(vars.len());

        while !remaining.is_empty() {
            let position = (0..remaining.len())
                .min_by_key(|&i| self.cost(&adjacency, &remaining[i]))
                .unwrap_or(0);
            let var = remaining.remove(position);
            eliminate(&mut adjacency, &var);
            order.push(var);
        }

        Ok(order)
    }

    fn cost(&self, adjacency: &Adjacency, var: &Variable) -> usize {
        match self.strategy {
            EliminationStrategy::Topological => 0,
            EliminationStrategy::MinDegree => adjacency.get(var).map_or(0, HashSet::len),
            EliminationStrategy::MinFill => compute_fill(adjacency, var),
            EliminationStrategy::WeightedMinFill => {
                let weight = adjacency.get(var).map_or(1, |neighbors| {
                    neighbors
                        .iter()
                        .fold(var.size(), |w, n| w.saturating_mul(n.size()))
                });
                compute_fill(adjacency, var).saturating_mul(weight)
            }
        }
    }
}

/// Connect every pair of variables that share a scope.
fn build_adjacency(scopes: &[Vec<Variable>], vars: &[Variable]) -> Adjacency {
    let mut adjacency: Adjacency = vars.iter().map(|v| (v.clone(), HashSet::new())).collect();
    for scope in scopes {
        let members: Vec<&Variable> = scope.iter().filter(|v| v.is_enumerable()).collect();
        for (i, v1) in members.iter().enumerate() {
            for v2 in &members[i + 1..] {
                adjacency.entry((*v1).clone()).or_default().insert((*v2).clone());
                adjacency.entry((*v2).clone()).or_default().insert((*v1).clone());
            }
        }
    }
    adjacency
}

/// Number of edges eliminating `var` would add between its neighbors.
fn compute_fill(adjacency: &Adjacency, var: &Variable) -> usize {
    let Some(neighbors) = adjacency.get(var) else {
        return 0;
    };
    let neighbors: Vec<&Variable> = neighbors.iter().collect();
    let mut fill = 0;
    for (i, v1) in neighbors.iter().enumerate() {
        for v2 in &neighbors[i + 1..] {
            if !adjacency.get(*v1).is_some_and(|adj| adj.contains(*v2)) {
                fill += 1;
            }
        }
    }
    fill
}

/// Remove `var` and connect its neighbors pairwise.
fn eliminate(adjacency: &mut Adjacency, var: &Variable) {
    let Some(neighbors) = adjacency.remove(var) else {
        return;
    };
    for neighbor in &neighbors {
        if let Some(adj) = adjacency.get_mut(neighbor) {
            adj.remove(var);
        }
    }
    let neighbors: Vec<Variable> = neighbors.into_iter().collect();
    for (i, v1) in neighbors.iter().enumerate() {
        for v2 in &neighbors[i + 1..] {
            if let Some(adj) = adjacency.get_mut(v1) {
                adj.insert(v2.clone());
            }
            if let Some(adj) = adjacency.get_mut(v2) {
                adj.insert(v1.clone());
            }
        }
    }
}
