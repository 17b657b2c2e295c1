//! `store` declares and owns the input/output variables of a model.

use super::axis::LabeledAxis;
use super::name::VariableName;
use super::variable::Var;
use super::ValueMap;
use crate::errors::{MateriaError, Result};
use crate::tensor::primitives::PrimitiveTensor;
use crate::tensor::Tensor;
use indexmap::IndexMap;

/// Declared variables and the labeled axis describing their assembly
/// layout.
#[derive(Default)]
pub struct VariableStore {
    variables: IndexMap<VariableName, Var>,
    axis: LabeledAxis,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a variable of a primitive tensor type.
    pub fn declare<T: PrimitiveTensor>(&mut self, name: VariableName) -> Result<Var> {
        self.declare_with_intmd::<T>(name, &[])
    }

    /// Declares a variable with a known intermediate shape.
    pub fn declare_with_intmd<T: PrimitiveTensor>(
        &mut self,
        name: VariableName,
        intmd_sizes: &[usize],
    ) -> Result<Var> {
        if self.variables.contains_key(&name) {
            return Err(MateriaError::setup(format!(
                "variable '{}' has already been declared",
                name
            )));
        }
        let var = Var::new_with_intmd(
            name.clone(),
            T::TYPE_NAME,
            intmd_sizes.to_vec(),
            T::const_base_sizes(),
        );
        self.variables.insert(name, var.clone());
        Ok(var)
    }

    /// Inserts a pre-built variable, e.g. the injected input variable
    /// of a nonlinear parameter.
    pub fn insert_variable(&mut self, name: VariableName, var: Var) -> Result<()> {
        if self.variables.contains_key(&name) {
            return Err(MateriaError::setup(format!(
                "variable '{}' has already been declared",
                name
            )));
        }
        self.variables.insert(name, var);
        Ok(())
    }

    /// Clones another model's variable onto this store, preserving its
    /// name and shapes. An existing variable with the same name is
    /// returned untouched.
    pub fn clone_variable(&mut self, var: &Var) -> Var {
        let name = var.name();
        if let Some(existing) = self.variables.get(&name) {
            return existing.clone();
        }
        let clone = Var::new_with_intmd(
            name.clone(),
            var.type_name(),
            var.intmd_sizes(),
            var.base_sizes(),
        );
        self.variables.insert(name, clone.clone());
        clone
    }

    pub fn has(&self, name: &VariableName) -> bool {
        self.variables.contains_key(name)
    }

    pub fn get(&self, name: &VariableName) -> Result<Var> {
        self.variables.get(name).cloned().ok_or_else(|| {
            MateriaError::setup(format!("there is no variable named '{}'", name))
        })
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Variables in declaration (assembly) order.
    pub fn iter(&self) -> impl Iterator<Item = (&VariableName, &Var)> {
        self.variables.iter()
    }

    /// Recomputes the labeled axis from the declared variables.
    pub fn setup_axis(&mut self) -> Result<()> {
        self.axis.clear();
        for (name, var) in &self.variables {
            self.axis
                .add_variable(name, &var.intmd_sizes(), &var.base_sizes())?;
        }
        self.axis.setup_layout();
        Ok(())
    }

    pub fn axis(&self) -> &LabeledAxis {
        &self.axis
    }

    /// Releases every owned value and all derivatives.
    pub fn clear_values(&self) {
        for var in self.variables.values() {
            var.clear();
        }
    }

    pub fn clear_derivatives(&self) {
        for var in self.variables.values() {
            var.clear_derivatives();
        }
    }

    /// Fills undefined variables with zeros of their declared shape.
    pub fn zero_undefined(&self) -> Result<()> {
        for var in self.variables.values() {
            if !var.defined() {
                var.zero()?;
            }
        }
        Ok(())
    }

    /// Assigns values from a value map. Names absent from the store are
    /// an error; names absent from the map are left untouched.
    pub fn assign(&self, values: &ValueMap) -> Result<()> {
        for (name, value) in values {
            self.get(name)?.set(value.clone())?;
        }
        Ok(())
    }

    /// Collects the defined variable values.
    pub fn collect(&self) -> Result<ValueMap> {
        let mut values = ValueMap::new();
        for (name, var) in &self.variables {
            if var.defined() {
                values.insert(name.clone(), var.value()?);
            }
        }
        Ok(values)
    }

    /// Collects the values of the named variables, in order. Undefined
    /// variables yield `None`.
    pub fn collect_named(&self, names: &[VariableName]) -> Result<Vec<Option<Tensor>>> {
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let var = self.get(name)?;
            values.push(if var.defined() {
                Some(var.value()?)
            } else {
                None
            });
        }
        Ok(values)
    }

    /// Assigns the named variables from a positional tensor list,
    /// skipping `None` entries.
    pub fn assign_named(
        &self,
        names: &[VariableName],
        values: &[Option<Tensor>],
    ) -> Result<()> {
        if names.len() != values.len() {
            return Err(MateriaError::shape(format!(
                "{} values were provided for {} variables",
                values.len(),
                names.len()
            )));
        }
        for (name, value) in names.iter().zip(values) {
            if let Some(value) = value {
                self.get(name)?.set(value.clone())?;
            }
        }
        Ok(())
    }

    /// Collects the variable values in assembly format, in axis order.
    pub fn collect_stack(&self) -> Result<Vec<Tensor>> {
        self.variables.values().map(|var| var.get()).collect()
    }

    /// Assigns the variable values from assembly-format tensors in axis
    /// order.
    pub fn assign_stack<I>(&self, stack: I) -> Result<()>
    where
        I: IntoIterator<Item = Tensor>,
    {
        let mut stack = stack.into_iter();
        for var in self.variables.values() {
            let value = stack.next().ok_or_else(|| {
                MateriaError::trace("the value stack is shorter than the variable store")
            })?;
            var.set_assembly(value)?;
        }
        Ok(())
    }
}
