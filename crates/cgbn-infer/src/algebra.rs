//! Factor algebra: products and margins across factors.
//!
//! All arithmetic is in log space: a product adds log-values, a margin
//! accumulates with log-sum-exp.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::density::Jdf;
use crate::error::{FactorError, Result};
use crate::factor::{Factor, MaxTrace};
use crate::table::IndexedTable;
use crate::variable::Variable;

/// Options controlling factor products.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOptions {
    /// Visit zero-probability entries too, so that densities attached to them
    /// survive the product. Off by default: a zero entry collapses the
    /// product regardless of its density.
    pub cg_safety: bool,
}

impl ProductOptions {
    pub fn with_cg_safety(cg_safety: bool) -> Self {
        Self { cg_safety }
    }
}

/// Operations any factor representation must offer to the elimination engine.
///
/// The dense [`Factor`] is the only implementation today; [`margin`] and
/// [`max_margin`] dispatch through this trait.
pub trait FactorTable {
    fn enum_variables(&self) -> &[Variable];
    fn sum_out(&self, vars: &[Variable]) -> Result<Factor>;
    fn max_out(&self, vars: &[Variable]) -> Result<(Factor, MaxTrace)>;
}

impl FactorTable for Factor {
    fn enum_variables(&self) -> &[Variable] {
        Factor::enum_variables(self)
    }

    fn sum_out(&self, vars: &[Variable]) -> Result<Factor> {
        self.marginalize(vars)
    }

    fn max_out(&self, vars: &[Variable]) -> Result<(Factor, MaxTrace)> {
        self.maximize_traced(vars)
    }
}

fn check_members<F: FactorTable + ?Sized>(factor: &F, vars: &[Variable], operation: &str) -> Result<()> {
    for var in vars {
        if !factor.enum_variables().contains(var) {
            return Err(FactorError::InvalidVariable {
                variable: var.name().to_string(),
                operation: operation.to_string(),
            });
        }
    }
    Ok(())
}

/// Sum out `vars`, each of which must be an enumerable variable of `factor`.
pub fn margin<F: FactorTable + ?Sized>(factor: &F, vars: &[Variable]) -> Result<Factor> {
    check_members(factor, vars, "margin")?;
    factor.sum_out(vars)
}

/// Max out `vars`, each of which must be an enumerable variable of `factor`.
pub fn max_margin<F: FactorTable + ?Sized>(factor: &F, vars: &[Variable]) -> Result<Factor> {
    Ok(max_margin_traced(factor, vars)?.0)
}

/// [`max_margin`] that also returns the trace-back record.
pub fn max_margin_traced<F: FactorTable + ?Sized>(
    factor: &F,
    vars: &[Variable],
) -> Result<(Factor, MaxTrace)> {
    check_members(factor, vars, "max_margin")?;
    factor.max_out(vars)
}

/// Product of two factors.
///
/// The result is indexed by `a`'s variables followed by `b`'s exclusive ones;
/// continuous variables must not be shared. Only combinations that agree on
/// shared variables are visited.
pub fn product(a: &Factor, b: &Factor, options: &ProductOptions) -> Result<Factor> {
    for var in b.non_enum_variables() {
        if a.non_enum_variables().contains(var) {
            return Err(FactorError::invalid_operation(format!(
                "continuous variable {} appears in both {} and {}",
                var.name(),
                a.name(),
                b.name()
            )));
        }
    }

    if a.is_atomic() && !b.is_atomic() {
        return scale(b, a, options, false);
    }
    if b.is_atomic() {
        return scale(a, b, options, true);
    }

    let b_vars = b.enum_variables();
    let a_vars = a.enum_variables();
    // overlap: for each position in b, the matching position in a
    let overlap: Vec<Option<usize>> = b_vars
        .iter()
        .map(|v| a_vars.iter().position(|w| w == v))
        .collect();
    let shared: Vec<Variable> = b_vars
        .iter()
        .zip(&overlap)
        .filter(|(_, pos)| pos.is_some())
        .map(|(v, _)| v.clone())
        .collect();
    let exclusive = b.table().projection(&shared)?;

    let mut order = a_vars.to_vec();
    order.extend(exclusive.target().variables().iter().cloned());
    let mut non_enum = a.non_enum_variables().to_vec();
    non_enum.extend(b.non_enum_variables().iter().cloned());
    let mut result = Factor::with_order(format!("{}*{}", a.name(), b.name()), order, non_enum)?;
    let exclusive_size = exclusive.target().size();

    trace!(
        a = a.name(),
        b = b.name(),
        shared = shared.len(),
        size = result.len(),
        "factor product"
    );

    let mut partial: Vec<Option<usize>> = vec![None; b_vars.len()];
    for a_index in 0..a.len() {
        let la = a.log_value(a_index);
        if la == f64::NEG_INFINITY && !options.cg_safety {
            continue;
        }
        for (slot, pos) in partial.iter_mut().zip(&overlap) {
            *slot = pos.map(|p| a.table().value_at(a_index, p));
        }
        for b_index in b.table().matching_indices(&partial)? {
            let lb = b.log_value(b_index);
            if lb == f64::NEG_INFINITY && !options.cg_safety {
                continue;
            }
            let target = a_index * exclusive_size + exclusive.project(b_index);
            result.accumulate_log_value(target, la + lb);
            let jdf = merge_jdf(a.get_jdf(a_index), b.get_jdf(b_index))?;
            if jdf.is_some() {
                result.set_jdf(target, jdf);
            }
        }
    }

    result.set_evidenced(a.is_evidenced() || b.is_evidenced());
    result.set_function(true);
    Ok(result)
}

/// Multiply every entry of `table` by the single entry of `atom`.
fn scale(table: &Factor, atom: &Factor, options: &ProductOptions, table_first: bool) -> Result<Factor> {
    let la = atom.log_value(0);
    let mut non_enum = table.non_enum_variables().to_vec();
    non_enum.extend(atom.non_enum_variables().iter().cloned());
    let name = if table_first {
        format!("{}*{}", table.name(), atom.name())
    } else {
        format!("{}*{}", atom.name(), table.name())
    };
    let mut result = Factor::with_order(name, table.enum_variables().to_vec(), non_enum)?;
    let atom_jdf = atom.get_jdf(0);
    if la == f64::NEG_INFINITY && !options.cg_safety {
        result.set_evidenced(table.is_evidenced() || atom.is_evidenced());
        result.set_function(true);
        return Ok(result);
    }
    for index in 0..table.len() {
        let lt = table.log_value(index);
        if lt == f64::NEG_INFINITY && !options.cg_safety {
            continue;
        }
        result.set_log_value_raw(index, lt + la);
        let jdf = merge_jdf(table.get_jdf(index), atom_jdf)?;
        if jdf.is_some() {
            result.set_jdf(index, jdf);
        }
    }
    result.set_evidenced(table.is_evidenced() || atom.is_evidenced());
    result.set_function(true);
    Ok(result)
}

fn merge_jdf(a: Option<&Jdf>, b: Option<&Jdf>) -> Result<Option<Jdf>> {
    Ok(match (a, b) {
        (Some(a), Some(b)) => Some(a.merge(b)?),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    })
}

/// Product of many factors, smallest (fewest enumerable variables) first.
///
/// The ordering only bounds intermediate table sizes; the result denotes the
/// same function for any order. An empty input yields the unit atomic factor.
pub fn product_all(factors: &[Factor], options: &ProductOptions) -> Result<Factor> {
    let mut ordered: Vec<&Factor> = factors.iter().collect();
    ordered.sort_by_key(|f| f.enum_variables().len());

    let mut iter = ordered.into_iter();
    let mut result = match iter.next() {
        Some(first) => first.clone(),
        None => {
            let mut unit = Factor::with_order("1", Vec::new(), Vec::new())?;
            unit.set_log_value_raw(0, 0.0);
            return Ok(unit);
        }
    };
    for factor in iter {
        result = product(&result, factor, options)?;
    }
    Ok(result)
}

/// Joint table size a product of `factors` would allocate.
pub fn product_size(factors: &[Factor]) -> Result<usize> {
    let mut vars: Vec<Variable> = Vec::new();
    for factor in factors {
        for var in factor.enum_variables() {
            if !vars.contains(var) {
                vars.push(var.clone());
            }
        }
    }
    Ok(IndexedTable::new(vars)?.size())
}
