//! Exact inference in conditional-Gaussian Bayesian networks.
//!
//! This crate answers probabilistic queries over networks that mix discrete
//! and continuous (Gaussian) variables. Every node turns into a factor table
//! and inference runs as bucket elimination over those tables.
//!
//! # Core Concepts
//!
//! - **Factors**: dense log-space tables over enumerable variables, with an optional
//!   joint density over continuous variables attached to each entry
//! - **Algebra**: product, sum-out and max-out with MPE trace-back
//! - **Bucket elimination**: marginal, MPE and likelihood queries with
//!   Bayes-ball pruning and configurable elimination orders
//! - **Learning**: expectation-maximization over partially observed samples
//! - **Sampling**: Gibbs sampling as an approximate cross-check
//!
//! # Architecture
//!
//! ```text
//! BayesNet → Query → Buckets → product / margin → CgTable
//!    ↓         ↓        ↓             ↓              ↓
//!  Nodes   Evidence  Factors     Log-space ops   Posterior
//! ```
//!
//! # Examples
//!
//! ```
//! use cgbn_infer::{BayesNet, Cpt, Evidence, InferenceConfig, VarElim, Variable};
//!
//! let rain = Variable::boolean("Rain");
//! let wet = Variable::boolean("Wet");
//!
//! let mut net = BayesNet::new();
//! net.add_node(Cpt::prior(rain.clone(), &[0.8, 0.2])?)?;
//! net.add_node(Cpt::new(
//!     wet.clone(),
//!     vec![rain.clone()],
//!     ndarray::array![[0.9, 0.1], [0.2, 0.8]].into_dyn(),
//! )?)?;
//!
//! let ve = VarElim::new(&net, InferenceConfig::default());
//! let evidence = Evidence::new().with_label(&wet, "true")?;
//! let posterior = ve.infer(&ve.make_query(&[rain.clone()], &evidence)?)?;
//! assert!((posterior.probability(1)? - 0.16 / 0.24).abs() < 1e-12);
//! # Ok::<(), cgbn_infer::FactorError>(())
//! ```

mod algebra;
mod config;
mod density;
mod elimination;
mod elimination_ordering;
mod error;
mod factor;
pub mod logspace;
mod network;
mod node;
pub mod parameter_learning;
mod query;
mod result;
mod sampling;
mod table;
mod variable;

pub use algebra::{
    margin, max_margin, max_margin_traced, product, product_all, product_size, FactorTable,
    ProductOptions,
};
pub use config::{EmConfig, GibbsConfig, InferenceConfig};
pub use density::{Density, Gaussian, Jdf};
pub use elimination::VarElim;
pub use elimination_ordering::{EliminationOrdering, EliminationStrategy};
pub use error::{FactorError, Result};
pub use factor::{Factor, MaxTrace};
pub use network::BayesNet;
pub use node::{
    Cpt, FactorSource, Gdt, Node, NodeCounts, NoisyOr, PseudoCounts, MIN_VARIANCE,
};
pub use parameter_learning::{EmLearner, EmReport};
pub use query::{Query, QueryMode, Relevance};
pub use result::CgTable;
pub use sampling::GibbsSampler;
pub use table::{IndexedTable, Projection};
pub use variable::{Assignment, Domain, Evidence, RelevantVars, Value, VarId, Variable};
