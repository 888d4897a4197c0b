//! Bayesian network container and topology queries.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{FactorError, Result};
use crate::node::Node;
use crate::variable::{Evidence, VarId, Variable};

/// Directed acyclic graph of nodes, one per variable.
///
/// A node's parents must be added before it, so insertion order is always a
/// valid topological order and no cycle can be built.
#[derive(Clone, Debug, Default)]
pub struct BayesNet {
    nodes: Vec<Node>,
    index: HashMap<VarId, usize>,
    children: Vec<Vec<usize>>,
}

impl BayesNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its index.
    pub fn add_node(&mut self, node: impl Into<Node>) -> Result<usize> {
        let node = node.into();
        let var = node.variable();
        if self.index.contains_key(&var.id()) {
            return Err(FactorError::InvalidGraph(format!(
                "variable {} already has a node",
                var.name()
            )));
        }
        let mut parent_indices = Vec::with_capacity(node.parents().len());
        for parent in node.parents() {
            let p = self
                .index
                .get(&parent.id())
                .copied()
                .ok_or_else(|| FactorError::VariableNotFound(parent.name().to_string()))?;
            parent_indices.push(p);
        }

        let id = self.nodes.len();
        self.index.insert(var.id(), id);
        for p in parent_indices {
            self.children[p].push(id);
        }
        self.children.push(Vec::new());
        self.nodes.push(node);
        Ok(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_index(&self, var: &Variable) -> Option<usize> {
        self.index.get(&var.id()).copied()
    }

    pub fn node_for(&self, var: &Variable) -> Option<&Node> {
        self.node_index(var).map(|i| &self.nodes[i])
    }

    fn require(&self, var: &Variable) -> Result<usize> {
        self.node_index(var)
            .ok_or_else(|| FactorError::VariableNotFound(var.name().to_string()))
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.nodes
            .iter()
            .map(Node::variable)
            .find(|v| v.name() == name)
    }

    /// All variables in insertion order.
    pub fn variables(&self) -> Vec<Variable> {
        self.nodes.iter().map(|n| n.variable().clone()).collect()
    }

    pub fn parents(&self, var: &Variable) -> Result<&[Variable]> {
        Ok(self.nodes[self.require(var)?].parents())
    }

    pub fn children(&self, var: &Variable) -> Result<Vec<&Variable>> {
        Ok(self.children[self.require(var)?]
            .iter()
            .map(|&c| self.nodes[c].variable())
            .collect())
    }

    pub(crate) fn child_indices(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    fn parent_indices(&self, index: usize) -> Vec<usize> {
        self.nodes[index]
            .parents()
            .iter()
            .filter_map(|p| self.node_index(p))
            .collect()
    }

    /// Node indices in topological order (parents before children).
    ///
    /// Kahn's algorithm; ties are broken by insertion order.
    pub fn ordered(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.parents().len()).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &child in &self.children[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if result.len() != self.nodes.len() {
            return Err(FactorError::InvalidGraph(
                "could not compute a topological order".to_string(),
            ));
        }
        Ok(result)
    }

    /// Requisite nodes for `P(query | evidence)`, in topological order.
    ///
    /// Bayes-ball: a ball starts at every query node as if sent from a child.
    /// Nodes whose top is marked are the ones whose distributions can affect
    /// the answer; everything else is d-separated or barren.
    pub fn dconnected(&self, query: &[Variable], evidence: &Evidence) -> Result<Vec<usize>> {
        let n = self.nodes.len();
        let mut top = vec![false; n];
        let mut bottom = vec![false; n];
        // (node, arrived from a child)
        let mut schedule: VecDeque<(usize, bool)> = VecDeque::new();
        for var in query {
            schedule.push_back((self.require(var)?, true));
        }

        while let Some((j, from_child)) = schedule.pop_front() {
            let observed = evidence.contains(self.nodes[j].variable());
            if from_child && !observed {
                if !top[j] {
                    top[j] = true;
                    schedule.extend(self.parent_indices(j).into_iter().map(|p| (p, true)));
                }
                if !bottom[j] {
                    bottom[j] = true;
                    schedule.extend(self.children[j].iter().map(|&c| (c, false)));
                }
            } else if !from_child {
                if observed && !top[j] {
                    top[j] = true;
                    schedule.extend(self.parent_indices(j).into_iter().map(|p| (p, true)));
                }
                if !observed && !bottom[j] {
                    bottom[j] = true;
                    schedule.extend(self.children[j].iter().map(|&c| (c, false)));
                }
            }
        }

        Ok(self.ordered()?.into_iter().filter(|&i| top[i]).collect())
    }

    /// The given nodes and all their ancestors, in topological order.
    pub fn ancestral(&self, vars: &[Variable]) -> Result<Vec<usize>> {
        let mut keep: HashSet<usize> = HashSet::new();
        let mut stack: Vec<usize> = vars
            .iter()
            .map(|v| self.require(v))
            .collect::<Result<_>>()?;
        while let Some(i) = stack.pop() {
            if keep.insert(i) {
                stack.extend(self.parent_indices(i));
            }
        }
        Ok(self
            .ordered()?
            .into_iter()
            .filter(|i| keep.contains(i))
            .collect())
    }

    /// `ln P(x)` of a complete instantiation, multiplied out node by node.
    pub fn log_probability(&self, evidence: &Evidence) -> Result<f64> {
        self.nodes
            .iter()
            .map(|n| n.log_probability(evidence))
            .sum()
    }

    /// Give every CPT random rows, to break symmetry before EM.
    pub fn randomize_cpts(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for node in &mut self.nodes {
            if let Node::Cpt(cpt) = node {
                cpt.randomize(&mut rng);
            }
        }
    }
}
