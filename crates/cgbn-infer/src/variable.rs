//! Variables, values and evidence.
//!
//! Variables are compared by an interned [`VarId`], never by name or domain, so
//! two structurally equal variables created separately are distinct. Every
//! factor that mentions a variable holds a clone of the same handle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{FactorError, Result};

static NEXT_VAR_ID: AtomicUsize = AtomicUsize::new(0);

/// Interned variable identifier, assigned in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(usize);

impl VarId {
    fn fresh() -> Self {
        VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Domain of a variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Domain {
    /// Finite ordered set of labelled values.
    Enumerable(Vec<String>),
    /// Real-valued; represented through densities, never indexed.
    Continuous,
}

#[derive(Debug)]
struct VariableInner {
    id: VarId,
    name: String,
    domain: Domain,
}

/// A random variable shared by reference between the network and its factors.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<VariableInner>,
}

impl Variable {
    /// Create an enumerable variable over the given labels.
    pub fn enumerable<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let name = name.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.len() < 2 {
            return Err(FactorError::InvalidDomain {
                variable: name,
                reason: format!("enumerable domain needs at least 2 values, got {}", values.len()),
            });
        }
        for (i, v) in values.iter().enumerate() {
            if values[..i].contains(v) {
                return Err(FactorError::InvalidDomain {
                    variable: name,
                    reason: format!("duplicate value '{}'", v),
                });
            }
        }
        Ok(Self::with_domain(name, Domain::Enumerable(values)))
    }

    /// Create a Boolean variable with values `["false", "true"]`.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::with_domain(
            name.into(),
            Domain::Enumerable(vec!["false".to_string(), "true".to_string()]),
        )
    }

    /// Create a continuous (non-enumerable) variable.
    pub fn continuous(name: impl Into<String>) -> Self {
        Self::with_domain(name.into(), Domain::Continuous)
    }

    fn with_domain(name: String, domain: Domain) -> Self {
        Self {
            inner: Arc::new(VariableInner {
                id: VarId::fresh(),
                name,
                domain,
            }),
        }
    }

    pub fn id(&self) -> VarId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn domain(&self) -> &Domain {
        &self.inner.domain
    }

    pub fn is_enumerable(&self) -> bool {
        matches!(self.inner.domain, Domain::Enumerable(_))
    }

    /// Number of values; 0 for continuous variables.
    pub fn size(&self) -> usize {
        match &self.inner.domain {
            Domain::Enumerable(values) => values.len(),
            Domain::Continuous => 0,
        }
    }

    /// Position of a label in the domain.
    pub fn value_index(&self, label: &str) -> Option<usize> {
        match &self.inner.domain {
            Domain::Enumerable(values) => values.iter().position(|v| v == label),
            Domain::Continuous => None,
        }
    }

    /// Label at a domain position.
    pub fn label(&self, index: usize) -> Option<&str> {
        match &self.inner.domain {
            Domain::Enumerable(values) => values.get(index).map(String::as_str),
            Domain::Continuous => None,
        }
    }

    /// Check that a value is admissible for this variable.
    pub fn check_value(&self, value: &Value) -> Result<()> {
        match (&self.inner.domain, value) {
            (Domain::Enumerable(values), Value::Discrete(v)) if *v < values.len() => Ok(()),
            (Domain::Enumerable(values), Value::Discrete(v)) => Err(FactorError::index(format!(
                "value {} out of domain of {} (size {})",
                v,
                self.name(),
                values.len()
            ))),
            (Domain::Continuous, Value::Continuous(x)) if x.is_finite() => Ok(()),
            (Domain::Continuous, Value::Continuous(x)) => Err(FactorError::InvalidValue(format!(
                "non-finite observation {} for {}",
                x,
                self.name()
            ))),
            _ => Err(FactorError::InvalidValue(format!(
                "value {:?} does not match the domain kind of {}",
                value,
                self.name()
            ))),
        }
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.id.cmp(&other.inner.id)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id.0)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// An observed or instantiated value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Index into an enumerable domain.
    Discrete(usize),
    /// Real observation of a continuous variable.
    Continuous(f64),
}

impl Value {
    pub fn as_discrete(&self) -> Option<usize> {
        match self {
            Value::Discrete(v) => Some(*v),
            Value::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Value::Continuous(x) => Some(*x),
            Value::Discrete(_) => None,
        }
    }
}

/// Assignment of domain indices to enumerable variables.
pub type Assignment = HashMap<Variable, usize>;

/// Variables a factor constructor must consider: `Some(value)` is evidence to
/// slice on, `None` is a free index dimension, absent variables are summed out.
pub type RelevantVars = HashMap<VarId, Option<Value>>;

/// Observed values, passed explicitly through query and factor construction.
#[derive(Clone, Debug, Default)]
pub struct Evidence {
    values: HashMap<VarId, (Variable, Value)>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation, validating it against the variable's domain.
    pub fn set(&mut self, var: &Variable, value: Value) -> Result<()> {
        var.check_value(&value)?;
        self.values.insert(var.id(), (var.clone(), value));
        Ok(())
    }

    /// Builder form of [`Evidence::set`].
    pub fn with(mut self, var: &Variable, value: Value) -> Result<Self> {
        self.set(var, value)?;
        Ok(self)
    }

    /// Observe an enumerable variable by label.
    pub fn with_label(self, var: &Variable, label: &str) -> Result<Self> {
        let index = var.value_index(label).ok_or_else(|| {
            FactorError::InvalidValue(format!("'{}' is not a value of {}", label, var.name()))
        })?;
        self.with(var, Value::Discrete(index))
    }

    pub fn remove(&mut self, var: &Variable) -> Option<Value> {
        self.values.remove(&var.id()).map(|(_, v)| v)
    }

    pub fn get(&self, var: &Variable) -> Option<Value> {
        self.get_id(var.id())
    }

    pub fn get_id(&self, id: VarId) -> Option<Value> {
        self.values.get(&id).map(|(_, v)| *v)
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.values.contains_key(&var.id())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Observed variables with their values, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, Value)> {
        let mut entries: Vec<_> = self.values.values().collect();
        entries.sort_by_key(|(var, _)| var.id());
        entries.into_iter().map(|(var, value)| (var, *value))
    }

    /// Relevant-variable map with every observation as a slicing value.
    pub fn to_relevant(&self) -> RelevantVars {
        self.values
            .iter()
            .map(|(id, (_, value))| (*id, Some(*value)))
            .collect()
    }
}
