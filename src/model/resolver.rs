//! `resolver` orders registered models by the variables they consume
//! and provide.
//!
//! The resolver is a bipartite view over (model, variable) pairs: every
//! output variable has at most one providing model, and a model depends
//! on another when it consumes one of its outputs. Evaluation order is
//! a topological sort of that graph; variables nobody provides are
//! *inbound* and must come from the composed model's own inputs.

use super::model::ModelRef;
use super::name::VariableName;
use crate::errors::{MateriaError, Result};
use std::collections::{BTreeMap, BTreeSet};

pub struct DependencyResolver {
    order: Vec<usize>,
    providers: BTreeMap<VariableName, usize>,
    inbound: BTreeSet<VariableName>,
}

impl DependencyResolver {
    pub fn new(submodels: &[ModelRef]) -> Result<Self> {
        let mut providers = BTreeMap::new();
        let mut consumed: Vec<Vec<VariableName>> = Vec::with_capacity(submodels.len());

        for (i, sub) in submodels.iter().enumerate() {
            let sub = sub.borrow();
            for (name, _) in sub.base().output_store().iter() {
                if providers.insert(name.clone(), i).is_some() {
                    return Err(MateriaError::setup(format!(
                        "variable '{}' is provided by more than one registered model",
                        name
                    )));
                }
            }
            consumed.push(
                sub.base()
                    .input_store()
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect(),
            );
        }

        let mut inbound = BTreeSet::new();
        for names in &consumed {
            for name in names {
                if !providers.contains_key(name) {
                    inbound.insert(name.clone());
                }
            }
        }

        // Kahn's algorithm over the model dependency edges.
        let n = submodels.len();
        let mut indegree = vec![0usize; n];
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (j, names) in consumed.iter().enumerate() {
            for name in names {
                if let Some(&i) = providers.get(name) {
                    if i != j && edges[i].insert(j) {
                        indegree[j] += 1;
                    }
                }
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop() {
            order.push(i);
            for &j in &edges[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(j);
                }
            }
        }
        if order.len() != n {
            return Err(MateriaError::setup(
                "the registered models form a dependency cycle",
            ));
        }

        Ok(DependencyResolver {
            order,
            providers,
            inbound,
        })
    }

    /// Model indices in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// The model providing a variable, if any.
    pub fn provider_of(&self, name: &VariableName) -> Option<usize> {
        self.providers.get(name).copied()
    }

    /// Whether a consumed variable comes from outside the registered
    /// models.
    pub fn is_inbound(&self, name: &VariableName) -> bool {
        self.inbound.contains(name)
    }

    /// The inbound variable names.
    pub fn inbound_items(&self) -> impl Iterator<Item = &VariableName> {
        self.inbound.iter()
    }
}
