//! `dispatch` chunks a large batched evaluation along a dynamic
//! dimension and reduces the per-chunk results.
//!
//! The sequential dispatcher invokes the user-provided callable on each
//! chunk in order; the parallel variant exchanges the dispatch loop for
//! a work-stealing one but keeps the same contract. Reduction
//! concatenates the per-chunk results along the same dynamic dimension.

use crate::errors::{MateriaError, Result};
use crate::model::ValueMap;
use crate::tensor::{dynamic_cat, Tensor};
use rayon::prelude::*;
use tracing::debug;

/// The number of entries of a value map along one dynamic dimension.
fn batch_extent(x: &ValueMap, batch_dim: usize) -> Result<usize> {
    let mut extent: Option<usize> = None;
    for (name, t) in x {
        if batch_dim >= t.dynamic_dim() {
            return Err(MateriaError::shape(format!(
                "variable '{}' has {} dynamic dimensions, cannot dispatch along dimension {}",
                name,
                t.dynamic_dim(),
                batch_dim
            )));
        }
        let n = t.dynamic_sizes()[batch_dim];
        match extent {
            Some(existing) if existing != n => {
                return Err(MateriaError::shape(format!(
                    "variable '{}' has extent {} along the dispatched dimension, expected {}",
                    name, n, existing
                )));
            }
            _ => extent = Some(n),
        }
    }
    extent.ok_or_else(|| MateriaError::shape("cannot dispatch an empty value map"))
}

fn chunk(x: &ValueMap, batch_dim: usize, start: usize, len: usize) -> Result<ValueMap> {
    let mut out = ValueMap::new();
    for (name, t) in x {
        out.insert(
            name.clone(),
            t.dynamic_narrow(batch_dim as i64, start, len)?,
        );
    }
    Ok(out)
}

fn reduce(results: Vec<ValueMap>, batch_dim: usize) -> Result<ValueMap> {
    // Re-bin the per-chunk results by variable, then concatenate.
    let mut bins: indexmap::IndexMap<crate::model::VariableName, Vec<Tensor>> =
        indexmap::IndexMap::new();
    for result in results {
        for (name, value) in result {
            bins.entry(name).or_insert_with(Vec::new).push(value);
        }
    }

    let mut reduced = ValueMap::new();
    for (name, values) in bins {
        reduced.insert(name, dynamic_cat(&values, batch_dim as i64)?);
    }
    Ok(reduced)
}

/// Dispatches a value map in uniform chunks along a dynamic dimension,
/// sequentially.
pub struct UniformSequentialValueMapDispatcher {
    batch_dim: usize,
    batch_size: usize,
}

impl UniformSequentialValueMapDispatcher {
    pub fn new(batch_dim: usize, batch_size: usize) -> Self {
        UniformSequentialValueMapDispatcher {
            batch_dim,
            batch_size,
        }
    }

    pub fn run<F>(&self, x: &ValueMap, mut dispatch: F) -> Result<ValueMap>
    where
        F: FnMut(ValueMap) -> Result<ValueMap>,
    {
        let total = batch_extent(x, self.batch_dim)?;
        let mut results = Vec::new();
        let mut at = 0;
        while at < total {
            let len = self.batch_size.min(total - at);
            debug!(start = at, len, "dispatching chunk");
            results.push(dispatch(chunk(x, self.batch_dim, at, len)?)?);
            at += len;
        }
        reduce(results, self.batch_dim)
    }
}

/// Dispatches a value map in uniform chunks along a dynamic dimension,
/// in parallel.
///
/// The callable is shared between worker threads, so it must provide
/// its own per-thread model instances: a model's state is not safe for
/// concurrent evaluation.
pub struct UniformParallelValueMapDispatcher {
    batch_dim: usize,
    batch_size: usize,
}

impl UniformParallelValueMapDispatcher {
    pub fn new(batch_dim: usize, batch_size: usize) -> Self {
        UniformParallelValueMapDispatcher {
            batch_dim,
            batch_size,
        }
    }

    pub fn run<F>(&self, x: &ValueMap, dispatch: F) -> Result<ValueMap>
    where
        F: Fn(ValueMap) -> Result<ValueMap> + Sync,
    {
        let total = batch_extent(x, self.batch_dim)?;
        let mut spans = Vec::new();
        let mut at = 0;
        while at < total {
            let len = self.batch_size.min(total - at);
            spans.push((at, len));
            at += len;
        }

        let results: Result<Vec<ValueMap>> = spans
            .par_iter()
            .map(|(start, len)| dispatch(chunk(x, self.batch_dim, *start, *len)?))
            .collect();
        reduce(results?, self.batch_dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableName;

    fn value_map(n: usize) -> ValueMap {
        let mut x = ValueMap::new();
        let data: Vec<f64> = (0..n).map(|i| i as f64).collect();
        x.insert(
            VariableName::parse("forces.t"),
            Tensor::from_data(data, &[n], &[], &[]).unwrap(),
        );
        x
    }

    #[test]
    fn sequential_roundtrip() {
        let x = value_map(10);
        let dispatcher = UniformSequentialValueMapDispatcher::new(0, 3);

        let mut calls = 0;
        let y = dispatcher
            .run(&x, |chunk| {
                calls += 1;
                let mut out = ValueMap::new();
                for (name, t) in chunk {
                    out.insert(name, t.mul_scalar(2.0));
                }
                Ok(out)
            })
            .unwrap();

        assert_eq!(calls, 4);
        let out = &y[&VariableName::parse("forces.t")];
        assert_eq!(out.dynamic_sizes(), &[10]);
        assert_eq!(out.data()[7], 14.0);
    }

    #[test]
    fn parallel_matches_sequential() {
        let x = value_map(8);
        let sequential = UniformSequentialValueMapDispatcher::new(0, 2);
        let parallel = UniformParallelValueMapDispatcher::new(0, 2);

        let f = |chunk: ValueMap| {
            let mut out = ValueMap::new();
            for (name, t) in chunk {
                out.insert(name, t.add_scalar(1.0));
            }
            Ok(out)
        };

        let a = sequential.run(&x, f).unwrap();
        let b = parallel.run(&x, f).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extent_mismatch() {
        let mut x = value_map(4);
        x.insert(
            VariableName::parse("forces.s"),
            Tensor::zeros(&[5], &[], &[]),
        );
        let dispatcher = UniformSequentialValueMapDispatcher::new(0, 2);
        assert!(dispatcher.run(&x, Ok).is_err());
    }
}
