//! Error types for factor and inference operations.

use thiserror::Error;

/// Errors that can occur while building, combining or eliminating factors.
///
/// The engine performs no local recovery: every variant aborts the enclosing
/// `infer` (or EM round) and is propagated to the caller.
#[derive(Error, Debug)]
pub enum FactorError {
    /// Malformed or out-of-range key/index access.
    #[error("Index error: {0}")]
    Index(String),

    /// The product of domain sizes does not fit the native index range.
    #[error("Capacity exceeded: joint domain of [{}] is not indexable", variables.join(", "))]
    Capacity { variables: Vec<String> },

    /// Atomic-vs-indexed accessor mismatch or another misuse of a factor.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A variable named in an operation is not a member of the factor.
    #[error("Variable {variable} is not an enumerable variable of the factor ({operation})")]
    InvalidVariable { variable: String, operation: String },

    /// A factor could not be placed in any bucket.
    #[error("Bucket assignment failed for factor {factor}")]
    BucketAssignment { factor: String },

    /// The elimination pass broke one of its structural invariants.
    #[error("Variable elimination internal error: {0}")]
    VarElimInternal(String),

    /// A continuous variable would have to be integrated out without a closed form.
    #[error("Cannot marginalize continuous variable {variable}")]
    UnsupportedMarginalization { variable: String },

    /// A probability or density parameter is NaN, negative or otherwise unusable.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A variable domain is malformed (e.g. fewer than two values).
    #[error("Invalid domain for {variable}: {reason}")]
    InvalidDomain { variable: String, reason: String },

    /// A conditional table or density does not describe a distribution.
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// Variable not found in the network.
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// Invalid network structure.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// The evidence has probability zero under the network.
    #[error("Evidence has zero probability")]
    ZeroProbabilityEvidence,

    /// A learning step failed for a particular sample and node.
    #[error("Learning failed at sample {sample}, node {node}: {source}")]
    Learning {
        sample: usize,
        node: String,
        #[source]
        source: Box<FactorError>,
    },

    /// Re-estimating a node's parameters failed after an expectation round.
    #[error("Maximization failed in round {round}, node {node}: {source}")]
    Maximization {
        round: usize,
        node: String,
        #[source]
        source: Box<FactorError>,
    },

    /// A sampling sweep failed while resampling a particular node.
    #[error("Sampling failed at sweep {sweep}, node {node}: {source}")]
    Sampling {
        sweep: usize,
        node: String,
        #[source]
        source: Box<FactorError>,
    },

    /// Array shape mismatch when importing or exporting tables.
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl FactorError {
    pub(crate) fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    pub(crate) fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Wrap this error with the sample and node a learning step was working on.
    pub fn in_learning(self, sample: usize, node: impl Into<String>) -> Self {
        Self::Learning {
            sample,
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the EM round and node being re-estimated.
    pub fn in_maximization(self, round: usize, node: impl Into<String>) -> Self {
        Self::Maximization {
            round,
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the sweep and node a sampler was working on.
    pub fn in_sampling(self, sweep: usize, node: impl Into<String>) -> Self {
        Self::Sampling {
            sweep,
            node: node.into(),
            source: Box::new(self),
        }
    }
}

/// Result type for factor and inference operations.
pub type Result<T> = std::result::Result<T, FactorError>;
