//! `parameter` holds the named tensor-valued parameters of a model.
//!
//! A parameter is either *literal* (a tensor loaded from options or set
//! programmatically) or *nonlinear*: bound to the output variable of
//! another model, in which case reading the parameter reads the
//! injected `parameters.<name>` input variable of the consuming model.

use super::model::ModelRef;
use super::name::VariableName;
use super::variable::Var;
use crate::errors::{MateriaError, Result};
use crate::tensor::Tensor;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A nonlinear parameter: the model providing it, the output variable
/// on that model, and the injected input variable on the consumer.
#[derive(Clone)]
pub struct NonlinearParameter {
    pub provider: ModelRef,
    pub provider_var: VariableName,
    pub var: Var,
}

/// A handle to a declared parameter.
#[derive(Clone)]
pub enum Param {
    Literal(Rc<RefCell<Tensor>>),
    Nonlinear(Var),
}

impl Param {
    /// The current parameter value. For a nonlinear parameter this is
    /// the value of the injected input variable.
    pub fn value(&self) -> Result<Tensor> {
        match self {
            Param::Literal(slot) => Ok(slot.borrow().clone()),
            Param::Nonlinear(var) => var.value(),
        }
    }

    pub fn is_nonlinear(&self) -> bool {
        matches!(self, Param::Nonlinear(_))
    }
}

/// The parameter storage of one model.
#[derive(Default)]
pub struct ParameterStore {
    params: IndexMap<String, Param>,
    nl_params: IndexMap<String, NonlinearParameter>,
    buffers: IndexMap<String, Tensor>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a literal parameter.
    pub fn declare(&mut self, name: &str, value: Tensor) -> Result<Param> {
        if self.params.contains_key(name) {
            return Err(MateriaError::setup(format!(
                "parameter '{}' has already been declared",
                name
            )));
        }
        let param = Param::Literal(Rc::new(RefCell::new(value)));
        self.params.insert(name.to_string(), param.clone());
        Ok(param)
    }

    /// Declares a nonlinear parameter backed by another model's output
    /// variable and the injected input variable `var`.
    pub fn declare_nonlinear(
        &mut self,
        name: &str,
        provider: ModelRef,
        provider_var: VariableName,
        var: Var,
    ) -> Result<Param> {
        if self.params.contains_key(name) || self.nl_params.contains_key(name) {
            return Err(MateriaError::setup(format!(
                "nonlinear parameter '{}' has already been registered",
                name
            )));
        }
        self.nl_params.insert(
            name.to_string(),
            NonlinearParameter {
                provider,
                provider_var,
                var: var.clone(),
            },
        );
        let param = Param::Nonlinear(var);
        self.params.insert(name.to_string(), param.clone());
        Ok(param)
    }

    /// Whether this store has any nonlinear parameter.
    pub fn has_nl_param(&self) -> bool {
        !self.nl_params.is_empty()
    }

    /// The nonlinear parameter registered under `name`, if any.
    pub fn nl_param(&self, name: &str) -> Option<&NonlinearParameter> {
        self.nl_params.get(name)
    }

    pub fn named_nonlinear_parameters(&self) -> impl Iterator<Item = (&String, &NonlinearParameter)> {
        self.nl_params.iter()
    }

    pub fn get(&self, name: &str) -> Result<Param> {
        self.params.get(name).cloned().ok_or_else(|| {
            MateriaError::setup(format!("there is no parameter named '{}'", name))
        })
    }

    /// Updates the value of a literal parameter.
    pub fn set(&self, name: &str, value: Tensor) -> Result<()> {
        match self.params.get(name) {
            Some(Param::Literal(slot)) => {
                *slot.borrow_mut() = value;
                Ok(())
            }
            Some(Param::Nonlinear(_)) => Err(MateriaError::unsupported(format!(
                "parameter '{}' is nonlinear; its value is provided by another model",
                name
            ))),
            None => Err(MateriaError::setup(format!(
                "there is no parameter named '{}'",
                name
            ))),
        }
    }

    /// The literal parameters in declaration order.
    pub fn iter_literal(&self) -> impl Iterator<Item = (&String, &Rc<RefCell<Tensor>>)> {
        self.params.iter().filter_map(|(name, param)| match param {
            Param::Literal(slot) => Some((name, slot)),
            Param::Nonlinear(_) => None,
        })
    }

    pub fn declare_buffer(&mut self, name: &str, value: Tensor) -> Result<Tensor> {
        if self.buffers.contains_key(name) {
            return Err(MateriaError::setup(format!(
                "buffer '{}' has already been declared",
                name
            )));
        }
        self.buffers.insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub fn named_buffers(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.buffers.iter()
    }

    /// The literal parameter values, in declaration order.
    pub fn collect_stack(&self) -> Vec<Tensor> {
        self.iter_literal().map(|(_, slot)| slot.borrow().clone()).collect()
    }

    /// Replaces the literal parameter values from a stack, in
    /// declaration order.
    pub fn assign_stack<I>(&self, stack: &mut I) -> Result<()>
    where
        I: Iterator<Item = Tensor>,
    {
        for (name, slot) in self.params.iter().filter_map(|(n, p)| match p {
            Param::Literal(slot) => Some((n, slot)),
            Param::Nonlinear(_) => None,
        }) {
            let value = stack.next().ok_or_else(|| {
                MateriaError::trace(format!(
                    "the parameter stack ran out before parameter '{}'",
                    name
                ))
            })?;
            *slot.borrow_mut() = value;
        }
        Ok(())
    }
}
