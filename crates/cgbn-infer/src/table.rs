//! Mixed-radix indexing over enumerable variables.
//!
//! A key is one domain index per variable; the linear index is
//! `Σ key[i] * stride[i]` with the last variable varying fastest, which is
//! also the memory order of a standard-layout `ndarray` with the same axes.

use crate::error::{FactorError, Result};
use crate::variable::Variable;

/// Bijection between keys over an ordered variable list and `[0, size)`.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedTable {
    variables: Vec<Variable>,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    size: usize,
}

impl IndexedTable {
    /// Build the table; fails with `Capacity` if the joint domain overflows `usize`.
    pub fn new(variables: Vec<Variable>) -> Result<Self> {
        let mut sizes = Vec::with_capacity(variables.len());
        for var in &variables {
            if !var.is_enumerable() {
                return Err(FactorError::invalid_operation(format!(
                    "{} is continuous and cannot index a table",
                    var.name()
                )));
            }
            sizes.push(var.size());
        }

        let mut strides = vec![1; variables.len()];
        let mut size: usize = 1;
        for i in (0..variables.len()).rev() {
            strides[i] = size;
            size = size.checked_mul(sizes[i]).ok_or_else(|| FactorError::Capacity {
                variables: variables.iter().map(|v| v.name().to_string()).collect(),
            })?;
        }

        Ok(Self {
            variables,
            sizes,
            strides,
            size,
        })
    }

    /// Table with no variables: exactly one entry.
    pub fn atomic() -> Self {
        Self {
            variables: Vec::new(),
            sizes: Vec::new(),
            strides: Vec::new(),
            size: 1,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Number of indices.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` when the table has no variables.
    pub fn is_atomic(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn position(&self, var: &Variable) -> Option<usize> {
        self.variables.iter().position(|v| v == var)
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.position(var).is_some()
    }

    /// Linear index of a fully specified key.
    pub fn index(&self, key: &[usize]) -> Result<usize> {
        if key.len() != self.variables.len() {
            return Err(FactorError::index(format!(
                "key has {} values but the table has {} variables",
                key.len(),
                self.variables.len()
            )));
        }
        let mut index = 0;
        for (i, &value) in key.iter().enumerate() {
            if value >= self.sizes[i] {
                return Err(FactorError::index(format!(
                    "value {} out of domain of {} (size {})",
                    value,
                    self.variables[i].name(),
                    self.sizes[i]
                )));
            }
            index += value * self.strides[i];
        }
        Ok(index)
    }

    /// Strict index of a partial key: every position must be specified.
    pub fn index_partial(&self, key: &[Option<usize>]) -> Result<usize> {
        let full: Option<Vec<usize>> = key.iter().copied().collect();
        match full {
            Some(full) => self.index(&full),
            None => Err(FactorError::index(
                "unspecified position in key passed to strict index",
            )),
        }
    }

    /// Key of a linear index.
    pub fn key(&self, index: usize) -> Result<Vec<usize>> {
        if index >= self.size {
            return Err(FactorError::index(format!(
                "index {} out of range [0, {})",
                index, self.size
            )));
        }
        Ok(self.key_unchecked(index))
    }

    pub(crate) fn key_unchecked(&self, index: usize) -> Vec<usize> {
        self.strides
            .iter()
            .zip(&self.sizes)
            .map(|(&stride, &size)| (index / stride) % size)
            .collect()
    }

    /// Value of one position of the key of `index`.
    pub(crate) fn value_at(&self, index: usize, position: usize) -> usize {
        (index / self.strides[position]) % self.sizes[position]
    }

    /// Every index consistent with the specified positions of a partial key.
    pub fn matching_indices(&self, key: &[Option<usize>]) -> Result<Vec<usize>> {
        if key.len() != self.variables.len() {
            return Err(FactorError::index(format!(
                "partial key has {} values but the table has {} variables",
                key.len(),
                self.variables.len()
            )));
        }

        let mut base = 0;
        let mut free = Vec::new();
        for (i, value) in key.iter().enumerate() {
            match value {
                Some(v) if *v >= self.sizes[i] => {
                    return Err(FactorError::index(format!(
                        "value {} out of domain of {}",
                        v,
                        self.variables[i].name()
                    )))
                }
                Some(v) => base += v * self.strides[i],
                None => free.push(i),
            }
        }

        let count: usize = free.iter().map(|&i| self.sizes[i]).product();
        let mut result = Vec::with_capacity(count);
        let mut counter = vec![0usize; free.len()];
        for _ in 0..count {
            let offset: usize = free
                .iter()
                .zip(&counter)
                .map(|(&i, &c)| c * self.strides[i])
                .sum();
            result.push(base + offset);

            // odometer over the free positions, last fastest
            for j in (0..free.len()).rev() {
                counter[j] += 1;
                if counter[j] < self.sizes[free[j]] {
                    break;
                }
                counter[j] = 0;
            }
        }
        Ok(result)
    }

    /// Precompute the projection dropping `remove` from this table.
    pub fn projection(&self, remove: &[Variable]) -> Result<Projection> {
        let keep: Vec<usize> = (0..self.variables.len())
            .filter(|&i| !remove.contains(&self.variables[i]))
            .collect();
        let target = IndexedTable::new(keep.iter().map(|&i| self.variables[i].clone()).collect())?;
        let source_strides = keep.iter().map(|&i| self.strides[i]).collect();
        let source_sizes = keep.iter().map(|&i| self.sizes[i]).collect();
        Ok(Projection {
            source_strides,
            source_sizes,
            target_strides: target.strides.clone(),
            target,
        })
    }

    /// Index in the reduced space obtained by dropping `remove`.
    pub fn project_index(&self, index: usize, remove: &[Variable]) -> Result<usize> {
        if index >= self.size {
            return Err(FactorError::index(format!(
                "index {} out of range [0, {})",
                index, self.size
            )));
        }
        Ok(self.projection(remove)?.project(index))
    }
}

/// Reusable index mask from a table onto a subset of its variables.
#[derive(Clone, Debug)]
pub struct Projection {
    source_strides: Vec<usize>,
    source_sizes: Vec<usize>,
    target_strides: Vec<usize>,
    target: IndexedTable,
}

impl Projection {
    /// The reduced table (remaining variables in their original order).
    pub fn target(&self) -> &IndexedTable {
        &self.target
    }

    pub fn into_target(self) -> IndexedTable {
        self.target
    }

    /// Project a source index; the caller guarantees it is in range.
    pub fn project(&self, index: usize) -> usize {
        self.source_strides
            .iter()
            .zip(&self.source_sizes)
            .zip(&self.target_strides)
            .map(|((&stride, &size), &target_stride)| ((index / stride) % size) * target_stride)
            .sum()
    }
}
