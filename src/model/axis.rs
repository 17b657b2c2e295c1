//! `axis` associates the layout of an assembled tensor with
//! human-interpretable variable names.
//!
//! A labeled axis is an ordered collection of variables, each carrying
//! an intermediate shape and a base shape. Variables can only be added
//! before the axis is set up; `setup_layout` computes the storage slice
//! of every variable in insertion order, after which the axis is
//! immutable. Sub-axes are recognized from the first path segment of a
//! variable name.

use super::name::VariableName;
use crate::errors::{MateriaError, Result};
use crate::tensor::shape::numel;
use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct LabeledAxis {
    variables: IndexMap<VariableName, (Vec<usize>, Vec<usize>)>,
    slices: Vec<(usize, usize)>,
    size: usize,
    setup: bool,
}

impl LabeledAxis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the axis has been set up.
    pub fn is_setup(&self) -> bool {
        self.setup
    }

    /// De-initializes the axis.
    pub fn clear(&mut self) {
        self.variables.clear();
        self.slices.clear();
        self.size = 0;
        self.setup = false;
    }

    /// Adds a variable with its intermediate and base shapes.
    pub fn add_variable(
        &mut self,
        name: &VariableName,
        intmd_sizes: &[usize],
        base_sizes: &[usize],
    ) -> Result<()> {
        if self.setup {
            return Err(MateriaError::setup(format!(
                "cannot add variable '{}': the axis has already been set up",
                name
            )));
        }
        if self.variables.contains_key(name) {
            return Err(MateriaError::setup(format!(
                "variable '{}' has already been added to the axis",
                name
            )));
        }
        self.variables
            .insert(name.clone(), (intmd_sizes.to_vec(), base_sizes.to_vec()));
        Ok(())
    }

    /// Updates the intermediate shape of a variable. This invalidates
    /// the layout.
    pub fn set_intmd_sizes(&mut self, name: &VariableName, intmd_sizes: &[usize]) -> Result<()> {
        match self.variables.get_mut(name) {
            Some((intmd, _)) => {
                *intmd = intmd_sizes.to_vec();
                self.setup = false;
                Ok(())
            }
            None => Err(MateriaError::setup(format!(
                "variable '{}' is not on the axis",
                name
            ))),
        }
    }

    /// Computes the storage slice of every variable in insertion order.
    pub fn setup_layout(&mut self) {
        self.slices.clear();
        let mut at = 0;
        for (intmd, base) in self.variables.values() {
            let size = numel(intmd) * numel(base);
            self.slices.push((at, at + size));
            at += size;
        }
        self.size = at;
        self.setup = true;
    }

    fn ensure_setup(&self) -> Result<()> {
        if !self.setup {
            return Err(MateriaError::setup(
                "the axis has not been set up; call setup_layout first",
            ));
        }
        Ok(())
    }

    /// The total storage size of the axis.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of variables.
    pub fn nvariable(&self) -> usize {
        self.variables.len()
    }

    pub fn has_variable(&self, name: &VariableName) -> bool {
        self.variables.contains_key(name)
    }

    /// The assembly ID of a variable.
    pub fn variable_id(&self, name: &VariableName) -> Result<usize> {
        self.variables.get_index_of(name).ok_or_else(|| {
            MateriaError::setup(format!("variable '{}' is not on the axis", name))
        })
    }

    /// The variable names in assembly order.
    pub fn variable_names(&self) -> impl Iterator<Item = &VariableName> {
        self.variables.keys()
    }

    /// The storage slice of a variable.
    pub fn variable_slice(&self, name: &VariableName) -> Result<(usize, usize)> {
        self.ensure_setup()?;
        Ok(self.slices[self.variable_id(name)?])
    }

    /// The storage sizes in assembly order.
    pub fn variable_sizes(&self) -> Vec<usize> {
        self.variables
            .values()
            .map(|(intmd, base)| numel(intmd) * numel(base))
            .collect()
    }

    /// The storage size of one variable.
    pub fn variable_size(&self, name: &VariableName) -> Result<usize> {
        let (intmd, base) = self.variables.get(name).ok_or_else(|| {
            MateriaError::setup(format!("variable '{}' is not on the axis", name))
        })?;
        Ok(numel(intmd) * numel(base))
    }

    /// The intermediate shapes in assembly order.
    pub fn variable_intmd_sizes(&self) -> Vec<Vec<usize>> {
        self.variables.values().map(|(i, _)| i.clone()).collect()
    }

    /// The base shapes in assembly order.
    pub fn variable_base_sizes(&self) -> Vec<Vec<usize>> {
        self.variables.values().map(|(_, b)| b.clone()).collect()
    }

    /// Whether any variable lives on the named sub-axis.
    pub fn has_subaxis(&self, subaxis: &str) -> bool {
        self.variables
            .keys()
            .any(|name| name.subaxis() == Some(subaxis))
    }

    /// The sub-axis names, in order of first appearance.
    pub fn subaxis_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.variables.keys() {
            if let Some(subaxis) = name.subaxis() {
                if !names.iter().any(|n| n == subaxis) {
                    names.push(subaxis.to_string());
                }
            }
        }
        names
    }

    /// The names of the variables on one sub-axis, in assembly order.
    pub fn subaxis_variable_names(&self, subaxis: &str) -> Vec<VariableName> {
        self.variables
            .keys()
            .filter(|name| name.subaxis() == Some(subaxis))
            .cloned()
            .collect()
    }

    /// Two axes are equivalent if they hold the same variables with the
    /// same shapes in the same order.
    pub fn equals(&self, other: &LabeledAxis) -> bool {
        self.variables == other.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_in_insertion_order() {
        let mut axis = LabeledAxis::new();
        axis.add_variable(&"state.b".into(), &[], &[6]).unwrap();
        axis.add_variable(&"state.a".into(), &[2], &[3]).unwrap();
        axis.setup_layout();

        assert_eq!(axis.size(), 12);
        assert_eq!(axis.variable_slice(&"state.b".into()).unwrap(), (0, 6));
        assert_eq!(axis.variable_slice(&"state.a".into()).unwrap(), (6, 12));
        assert_eq!(axis.variable_sizes(), vec![6, 6]);
    }

    #[test]
    fn immutable_after_setup() {
        let mut axis = LabeledAxis::new();
        axis.add_variable(&"state.a".into(), &[], &[]).unwrap();
        axis.setup_layout();
        assert!(axis.add_variable(&"state.b".into(), &[], &[]).is_err());
    }

    #[test]
    fn duplicate_rejected() {
        let mut axis = LabeledAxis::new();
        axis.add_variable(&"state.a".into(), &[], &[]).unwrap();
        assert!(axis.add_variable(&"state.a".into(), &[], &[]).is_err());
    }

    #[test]
    fn subaxes() {
        let mut axis = LabeledAxis::new();
        axis.add_variable(&"forces.t".into(), &[], &[]).unwrap();
        axis.add_variable(&"state.a".into(), &[], &[]).unwrap();
        axis.add_variable(&"state.b".into(), &[], &[]).unwrap();
        assert!(axis.has_subaxis("state"));
        assert!(!axis.has_subaxis("residual"));
        assert_eq!(axis.subaxis_names(), vec!["forces", "state"]);
        assert_eq!(axis.subaxis_variable_names("state").len(), 2);
    }
}
