//! Factor representation and operations.
//!
//! A factor is a table of log-probabilities over enumerable variables,
//! optionally carrying a [`Jdf`] per entry for its continuous variables.

use ndarray::{ArrayD, IxDyn};

use crate::density::{Density, Jdf};
use crate::error::{FactorError, Result};
use crate::logspace::{log_add, log_sum_of_logs, safe_ln};
use crate::table::IndexedTable;
use crate::variable::{Assignment, Variable};

/// Dense log-value storage, one slot per table index.
#[derive(Clone, Debug, PartialEq)]
struct DenseStore {
    log_values: Vec<f64>,
}

impl DenseStore {
    fn zeros(len: usize) -> Self {
        Self {
            log_values: vec![f64::NEG_INFINITY; len],
        }
    }

    fn get(&self, index: usize) -> f64 {
        self.log_values[index]
    }

    fn set(&mut self, index: usize, value: f64) {
        self.log_values[index] = value;
    }

    fn accumulate(&mut self, index: usize, value: f64) {
        self.log_values[index] = log_add(self.log_values[index], value);
    }

    fn as_slice(&self) -> &[f64] {
        &self.log_values
    }
}

/// A factor in a Bayesian network: φ(X₁, …, Xₖ; Y₁, …, Yₘ) in log space.
///
/// The `Xᵢ` are enumerable and index the table; the `Yⱼ` are continuous and
/// live in per-entry joint densities.
#[derive(Clone, Debug, PartialEq)]
pub struct Factor {
    name: String,
    table: IndexedTable,
    non_enum: Vec<Variable>,
    store: DenseStore,
    jdf: Option<Vec<Option<Jdf>>>,
    evidenced: bool,
    function: bool,
}

impl Factor {
    /// Create a factor of zeros over the given variables.
    ///
    /// Duplicates are removed, variables are split by kind, and enumerable
    /// variables are put in canonical (creation) order.
    pub fn new(name: impl Into<String>, variables: &[Variable]) -> Result<Self> {
        let mut enumerable: Vec<Variable> = Vec::new();
        let mut non_enum: Vec<Variable> = Vec::new();
        for var in variables {
            let bucket = if var.is_enumerable() {
                &mut enumerable
            } else {
                &mut non_enum
            };
            if !bucket.contains(var) {
                bucket.push(var.clone());
            }
        }
        enumerable.sort();
        Self::with_order(name, enumerable, non_enum)
    }

    /// Create a factor keeping the given enumerable order.
    pub(crate) fn with_order(
        name: impl Into<String>,
        enumerable: Vec<Variable>,
        non_enum: Vec<Variable>,
    ) -> Result<Self> {
        for (i, var) in enumerable.iter().enumerate() {
            if enumerable[..i].contains(var) {
                return Err(FactorError::invalid_operation(format!(
                    "variable {} listed twice",
                    var.name()
                )));
            }
        }
        if let Some(var) = non_enum.iter().find(|v| v.is_enumerable()) {
            return Err(FactorError::invalid_operation(format!(
                "{} is enumerable but was given as continuous",
                var.name()
            )));
        }
        let table = IndexedTable::new(enumerable)?;
        let store = DenseStore::zeros(table.size());
        Ok(Self {
            name: name.into(),
            table,
            non_enum,
            store,
            jdf: None,
            evidenced: false,
            function: false,
        })
    }

    /// Create a factor from probabilities laid out with one axis per variable,
    /// in the given order.
    pub fn from_probabilities(
        name: impl Into<String>,
        variables: Vec<Variable>,
        values: ArrayD<f64>,
    ) -> Result<Self> {
        let mut factor = Self::with_order(name, variables, Vec::new())?;
        if values.shape() != factor.table.sizes() {
            return Err(FactorError::InvalidDistribution(format!(
                "table shape {:?} does not match domain sizes {:?}",
                values.shape(),
                factor.table.sizes()
            )));
        }
        // logical iteration order of ndarray is row-major, matching the table
        for (index, &p) in values.iter().enumerate() {
            factor.store.set(index, safe_ln(p)?);
        }
        Ok(factor)
    }

    /// Export probabilities as an array with one axis per enumerable variable.
    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        let probs: Vec<f64> = self.store.as_slice().iter().map(|v| v.exp()).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(self.table.sizes()), probs)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn table(&self) -> &IndexedTable {
        &self.table
    }

    /// Enumerable variables in index order.
    pub fn enum_variables(&self) -> &[Variable] {
        self.table.variables()
    }

    pub fn non_enum_variables(&self) -> &[Variable] {
        &self.non_enum
    }

    pub fn has_non_enum_variables(&self) -> bool {
        !self.non_enum.is_empty()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.table.contains(var) || self.non_enum.contains(var)
    }

    /// `true` when the factor has no enumerable variables (a single entry).
    pub fn is_atomic(&self) -> bool {
        self.table.is_atomic()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.size()
    }

    /// Always `false`: even an atomic factor holds one entry. Use
    /// [`Factor::is_atomic`] to test for a factor without variables.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_evidenced(&self) -> bool {
        self.evidenced
    }

    pub(crate) fn set_evidenced(&mut self, evidenced: bool) {
        self.evidenced = evidenced;
    }

    /// `true` if produced by an algebra operation rather than a network node.
    pub fn is_function(&self) -> bool {
        self.function
    }

    pub(crate) fn set_function(&mut self, function: bool) {
        self.function = function;
    }

    pub fn key(&self, index: usize) -> Result<Vec<usize>> {
        self.table.key(index)
    }

    pub fn index(&self, key: &[usize]) -> Result<usize> {
        self.table.index(key)
    }

    fn check_indexed(&self, index: usize) -> Result<()> {
        if self.is_atomic() {
            return Err(FactorError::invalid_operation(format!(
                "factor {} is atomic; use the atomic accessors",
                self.name
            )));
        }
        if index >= self.len() {
            return Err(FactorError::index(format!(
                "index {} out of range [0, {}) in factor {}",
                index,
                self.len(),
                self.name
            )));
        }
        Ok(())
    }

    fn check_atomic(&self) -> Result<()> {
        if !self.is_atomic() {
            return Err(FactorError::invalid_operation(format!(
                "factor {} has enumerable variables; use the indexed accessors",
                self.name
            )));
        }
        Ok(())
    }

    pub fn get_log_value(&self, index: usize) -> Result<f64> {
        self.check_indexed(index)?;
        Ok(self.store.get(index))
    }

    pub fn set_log_value(&mut self, index: usize, value: f64) -> Result<()> {
        self.check_indexed(index)?;
        if value.is_nan() {
            return Err(FactorError::InvalidValue("log-value is NaN".to_string()));
        }
        self.store.set(index, value);
        Ok(())
    }

    pub fn get_value(&self, index: usize) -> Result<f64> {
        Ok(self.get_log_value(index)?.exp())
    }

    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_log_value(index, safe_ln(value)?)
    }

    pub fn get_log_value_by_key(&self, key: &[usize]) -> Result<f64> {
        let index = self.table.index(key)?;
        self.get_log_value(index)
    }

    pub fn set_value_by_key(&mut self, key: &[usize], value: f64) -> Result<()> {
        let index = self.table.index(key)?;
        self.set_value(index, value)
    }

    pub fn get_atomic_log_value(&self) -> Result<f64> {
        self.check_atomic()?;
        Ok(self.store.get(0))
    }

    pub fn set_atomic_log_value(&mut self, value: f64) -> Result<()> {
        self.check_atomic()?;
        if value.is_nan() {
            return Err(FactorError::InvalidValue("log-value is NaN".to_string()));
        }
        self.store.set(0, value);
        Ok(())
    }

    pub fn get_atomic_value(&self) -> Result<f64> {
        Ok(self.get_atomic_log_value()?.exp())
    }

    pub fn set_atomic_value(&mut self, value: f64) -> Result<()> {
        self.set_atomic_log_value(safe_ln(value)?)
    }

    /// Raw log-value, valid for atomic and indexed factors alike.
    pub(crate) fn log_value(&self, index: usize) -> f64 {
        self.store.get(index)
    }

    pub(crate) fn set_log_value_raw(&mut self, index: usize, value: f64) {
        self.store.set(index, value);
    }

    pub(crate) fn accumulate_log_value(&mut self, index: usize, value: f64) {
        self.store.accumulate(index, value);
    }

    pub(crate) fn log_values(&self) -> &[f64] {
        self.store.as_slice()
    }

    /// Total probability mass.
    pub fn get_sum(&self) -> f64 {
        self.get_log_sum().exp()
    }

    /// Log of the total probability mass, via stable log-sum-exp.
    pub fn get_log_sum(&self) -> f64 {
        log_sum_of_logs(self.store.as_slice())
    }

    /// Index with the largest value (first on ties).
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &v) in self.store.as_slice().iter().enumerate() {
            if v > self.store.get(best) {
                best = i;
            }
        }
        best
    }

    /// Rescale to total mass one; a factor of zeros is left as is.
    pub fn normalize(&mut self) {
        let log_sum = self.get_log_sum();
        if log_sum.is_finite() {
            for v in self.store.log_values.iter_mut() {
                *v -= log_sum;
            }
        }
    }

    /// Density of `var` at the configuration `index`.
    pub fn get_distrib(&self, index: usize, var: &Variable) -> Option<&Density> {
        self.get_jdf(index).and_then(|jdf| jdf.get(var))
    }

    /// Attach a density for a continuous variable of this factor.
    pub fn set_distrib(&mut self, index: usize, var: &Variable, density: Density) -> Result<()> {
        if !self.non_enum.contains(var) {
            return Err(FactorError::InvalidVariable {
                variable: var.name().to_string(),
                operation: "set_distrib".to_string(),
            });
        }
        if index >= self.len() {
            return Err(FactorError::index(format!(
                "index {} out of range [0, {})",
                index,
                self.len()
            )));
        }
        let len = self.len();
        let slots = self.jdf.get_or_insert_with(|| vec![None; len]);
        slots[index]
            .get_or_insert_with(Jdf::new)
            .set(var.clone(), density);
        Ok(())
    }

    /// Joint density attached to the configuration `index`.
    pub fn get_jdf(&self, index: usize) -> Option<&Jdf> {
        self.jdf.as_ref()?.get(index)?.as_ref()
    }

    pub(crate) fn set_jdf(&mut self, index: usize, jdf: Option<Jdf>) {
        if jdf.is_none() && self.jdf.is_none() {
            return;
        }
        let len = self.len();
        let slots = self.jdf.get_or_insert_with(|| vec![None; len]);
        slots[index] = jdf;
    }

    fn check_members(&self, vars: &[Variable], operation: &str) -> Result<()> {
        for var in vars {
            if !self.table.contains(var) {
                return Err(FactorError::InvalidVariable {
                    variable: var.name().to_string(),
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Sum out enumerable variables.
    ///
    /// Densities at entries that collapse onto the same reduced index become a
    /// mixture weighted by each entry's share of the reduced mass.
    pub fn marginalize(&self, vars: &[Variable]) -> Result<Factor> {
        self.check_members(vars, "marginalize")?;
        if vars.is_empty() {
            return Ok(self.clone());
        }

        let projection = self.table.projection(vars)?;
        let mut result = Factor::with_order(
            format!("{}_marg", self.name),
            projection.target().variables().to_vec(),
            self.non_enum.clone(),
        )?;
        let mut sources: Vec<Vec<usize>> = if self.jdf.is_some() {
            vec![Vec::new(); result.len()]
        } else {
            Vec::new()
        };

        for index in 0..self.len() {
            let target = projection.project(index);
            result.store.accumulate(target, self.store.get(index));
            if self.jdf.is_some() {
                sources[target].push(index);
            }
        }

        for (target, members) in sources.iter().enumerate() {
            let total = result.store.get(target);
            let weighted: Vec<(f64, &Jdf)> = members
                .iter()
                .filter_map(|&i| {
                    let jdf = self.get_jdf(i)?;
                    let weight = if total.is_finite() {
                        (self.store.get(i) - total).exp()
                    } else {
                        0.0
                    };
                    Some((weight, jdf))
                })
                .collect();
            result.set_jdf(target, Jdf::mix(&weighted));
        }

        result.evidenced = self.evidenced;
        result.function = true;
        Ok(result)
    }

    /// Max out enumerable variables, keeping the best source entry per reduced index.
    pub fn maximize(&self, vars: &[Variable]) -> Result<Factor> {
        Ok(self.maximize_traced(vars)?.0)
    }

    /// Max out enumerable variables and return which source entry won each reduced index.
    pub fn maximize_traced(&self, vars: &[Variable]) -> Result<(Factor, MaxTrace)> {
        self.check_members(vars, "maximize")?;

        let projection = self.table.projection(vars)?;
        let mut result = Factor::with_order(
            format!("{}_max", self.name),
            projection.target().variables().to_vec(),
            self.non_enum.clone(),
        )?;
        let mut argmax: Vec<Option<usize>> = vec![None; result.len()];

        for index in 0..self.len() {
            let target = projection.project(index);
            let value = self.store.get(index);
            let better = match argmax[target] {
                None => true,
                Some(_) => value > result.store.get(target),
            };
            if better {
                argmax[target] = Some(index);
                result.store.set(target, value);
            }
        }

        let argmax: Vec<usize> = argmax
            .into_iter()
            .map(|a| {
                a.ok_or_else(|| {
                    FactorError::VarElimInternal("reduced index without a source".to_string())
                })
            })
            .collect::<Result<_>>()?;

        if self.jdf.is_some() {
            for (target, &source) in argmax.iter().enumerate() {
                result.set_jdf(target, self.get_jdf(source).cloned());
            }
        }

        result.evidenced = self.evidenced;
        result.function = self.function || !vars.is_empty();

        let trace = MaxTrace {
            source: self.table.clone(),
            eliminated: vars.to_vec(),
            target: result.table.clone(),
            argmax,
        };
        Ok((result, trace))
    }

    /// Copy of this factor with enumerable variables permuted to `order`.
    pub fn reorder(&self, order: &[Variable]) -> Result<Factor> {
        if order.len() != self.table.variables().len() || !order.iter().all(|v| self.table.contains(v)) {
            return Err(FactorError::invalid_operation(format!(
                "reorder of {} must be a permutation of its variables",
                self.name
            )));
        }
        let mut result = Factor::with_order(self.name.clone(), order.to_vec(), self.non_enum.clone())?;
        let positions: Vec<usize> = self
            .table
            .variables()
            .iter()
            .map(|v| result.table.position(v).unwrap_or(0))
            .collect();
        for index in 0..self.len() {
            let key = self.table.key_unchecked(index);
            let mut target_key = vec![0; key.len()];
            for (i, &value) in key.iter().enumerate() {
                target_key[positions[i]] = value;
            }
            let target = result.table.index(&target_key)?;
            result.store.set(target, self.store.get(index));
            result.set_jdf(target, self.get_jdf(index).cloned());
        }
        result.evidenced = self.evidenced;
        result.function = self.function;
        Ok(result)
    }
}

/// Provenance of one max-out: for each reduced index, the winning source index.
///
/// Traces form an arena keyed by elimination step; restoring them in reverse
/// elimination order recovers the maximising assignment of every maxed-out
/// variable.
#[derive(Clone, Debug)]
pub struct MaxTrace {
    source: IndexedTable,
    eliminated: Vec<Variable>,
    target: IndexedTable,
    argmax: Vec<usize>,
}

impl MaxTrace {
    pub fn eliminated(&self) -> &[Variable] {
        &self.eliminated
    }

    /// Assign the eliminated variables given values for the remaining ones.
    pub fn restore(&self, assignment: &mut Assignment) -> Result<()> {
        let key: Vec<usize> = self
            .target
            .variables()
            .iter()
            .map(|v| {
                assignment.get(v).copied().ok_or_else(|| {
                    FactorError::VarElimInternal(format!(
                        "trace-back reached {} before it was assigned",
                        v.name()
                    ))
                })
            })
            .collect::<Result<_>>()?;
        let target = self.target.index(&key)?;
        let source_key = self.source.key(self.argmax[target])?;
        for var in &self.eliminated {
            if let Some(pos) = self.source.position(var) {
                assignment.insert(var.clone(), source_key[pos]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::Gaussian;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn xy() -> (Variable, Variable) {
        (Variable::boolean("x"), Variable::boolean("y"))
    }

    fn factor_xy(x: &Variable, y: &Variable, values: Vec<f64>) -> Factor {
        let array = Array::from_shape_vec(vec![2, 2], values).unwrap().into_dyn();
        Factor::from_probabilities("f", vec![x.clone(), y.clone()], array).unwrap()
    }

    #[test]
    fn test_factor_creation_dedups_and_sorts() {
        let (x, y) = xy();
        let z = Variable::continuous("z");
        let factor = Factor::new("f", &[y.clone(), x.clone(), y.clone(), z.clone()]).unwrap();
        assert_eq!(factor.enum_variables(), &[x, y]);
        assert_eq!(factor.non_enum_variables(), &[z]);
        assert_eq!(factor.len(), 4);
        assert_eq!(factor.get_log_value(0).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_atomic_factor_accessors() {
        let mut factor = Factor::new("atom", &[]).unwrap();
        assert!(factor.is_atomic());
        assert_eq!(factor.len(), 1);
        assert!(!factor.is_empty());
        assert!(matches!(
            factor.get_log_value(0),
            Err(FactorError::InvalidOperation(_))
        ));
        factor.set_atomic_value(0.25).unwrap();
        assert_abs_diff_eq!(factor.get_atomic_value().unwrap(), 0.25, epsilon = 1e-12);

        let (x, _) = xy();
        let indexed = Factor::new("f", &[x]).unwrap();
        assert!(matches!(
            indexed.get_atomic_log_value(),
            Err(FactorError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_value_accessors() {
        let (x, y) = xy();
        let mut factor = factor_xy(&x, &y, vec![0.1, 0.2, 0.3, 0.4]);
        assert_abs_diff_eq!(factor.get_value(2).unwrap(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(
            factor.get_log_value_by_key(&[1, 1]).unwrap(),
            0.4f64.ln(),
            epsilon = 1e-12
        );
        factor.set_value(0, 0.0).unwrap();
        assert_eq!(factor.get_log_value(0).unwrap(), f64::NEG_INFINITY);
        assert!(factor.set_value(0, f64::NAN).is_err());
        assert!(factor.set_log_value(0, f64::NAN).is_err());
        assert!(matches!(factor.get_log_value(4), Err(FactorError::Index(_))));
    }

    #[test]
    fn test_sum() {
        let (x, y) = xy();
        let factor = factor_xy(&x, &y, vec![0.1, 0.2, 0.3, 0.4]);
        assert_abs_diff_eq!(factor.get_sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_factor_marginalize() {
        let (x, y) = xy();
        let factor = factor_xy(&x, &y, vec![0.1, 0.2, 0.3, 0.4]);

        let marginal = factor.marginalize(&[y.clone()]).unwrap();
        assert_eq!(marginal.enum_variables(), &[x.clone()]);
        assert!(marginal.is_function());
        assert_abs_diff_eq!(marginal.get_value(0).unwrap(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(marginal.get_value(1).unwrap(), 0.7, epsilon = 1e-12);

        let all = factor.marginalize(&[x.clone(), y.clone()]).unwrap();
        assert!(all.is_atomic());
        assert_abs_diff_eq!(all.get_atomic_value().unwrap(), 1.0, epsilon = 1e-12);

        let same = factor.marginalize(&[]).unwrap();
        assert_eq!(same, factor);
    }

    #[test]
    fn test_marginalize_unknown_variable() {
        let (x, y) = xy();
        let factor = Factor::new("f", &[x]).unwrap();
        assert!(matches!(
            factor.marginalize(&[y]),
            Err(FactorError::InvalidVariable { .. })
        ));
    }

    #[test]
    fn test_factor_maximize() {
        let (x, y) = xy();
        let factor = factor_xy(&x, &y, vec![0.1, 0.2, 0.4, 0.3]);
        let (maximized, trace) = factor.maximize_traced(&[y.clone()]).unwrap();
        assert_abs_diff_eq!(maximized.get_value(0).unwrap(), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(maximized.get_value(1).unwrap(), 0.4, epsilon = 1e-12);

        let mut assignment = Assignment::new();
        assignment.insert(x.clone(), 1);
        trace.restore(&mut assignment).unwrap();
        assert_eq!(assignment[&y], 0);
    }

    #[test]
    fn test_marginalize_mixes_densities() {
        let a = Variable::boolean("a");
        let c = Variable::continuous("c");
        let mut factor = Factor::new("f", &[a.clone(), c.clone()]).unwrap();
        factor.set_value(0, 0.25).unwrap();
        factor.set_value(1, 0.75).unwrap();
        factor
            .set_distrib(0, &c, Gaussian::new(0.0, 1.0).unwrap().into())
            .unwrap();
        factor
            .set_distrib(1, &c, Gaussian::new(4.0, 1.0).unwrap().into())
            .unwrap();

        let marginal = factor.marginalize(&[a]).unwrap();
        let density = marginal.get_distrib(0, &c).unwrap();
        assert_abs_diff_eq!(density.mean(), 3.0, epsilon = 1e-12);
        assert_eq!(density.num_components(), 2);
    }

    #[test]
    fn test_marginalize_drops_zero_weight_density() {
        let a = Variable::boolean("a");
        let c = Variable::continuous("c");
        let mut factor = Factor::new("f", &[a.clone(), c.clone()]).unwrap();
        factor.set_value(0, 0.0).unwrap();
        factor.set_value(1, 1.0).unwrap();
        factor
            .set_distrib(0, &c, Gaussian::new(0.0, 1.0).unwrap().into())
            .unwrap();
        factor
            .set_distrib(1, &c, Gaussian::new(4.0, 2.0).unwrap().into())
            .unwrap();
        let marginal = factor.marginalize(&[a]).unwrap();
        let density = marginal.get_distrib(0, &c).unwrap();
        assert_eq!(density.num_components(), 1);
        assert_abs_diff_eq!(density.variance(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_distrib_requires_continuous_member() {
        let (x, _) = xy();
        let c = Variable::continuous("c");
        let mut factor = Factor::new("f", &[x.clone()]).unwrap();
        assert!(factor
            .set_distrib(0, &c, Gaussian::new(0.0, 1.0).unwrap().into())
            .is_err());
        assert!(factor.get_distrib(0, &c).is_none());
    }

    #[test]
    fn test_reorder_and_array_roundtrip() {
        let (x, y) = xy();
        let factor = factor_xy(&x, &y, vec![0.1, 0.2, 0.3, 0.4]);
        let swapped = factor.reorder(&[y.clone(), x.clone()]).unwrap();
        // (y=0, x=1) was (x=1, y=0)
        assert_abs_diff_eq!(swapped.get_value(1).unwrap(), 0.3, epsilon = 1e-12);
        let array = swapped.to_array().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_abs_diff_eq!(array[[1, 0]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_from_probabilities_shape_mismatch() {
        let (x, y) = xy();
        let array = Array::from_shape_vec(vec![4], vec![0.1, 0.2, 0.3, 0.4])
            .unwrap()
            .into_dyn();
        assert!(Factor::from_probabilities("f", vec![x, y], array).is_err());
    }
}
