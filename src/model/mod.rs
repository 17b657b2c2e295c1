//! `model` is the variable/parameter/derivative layer and the base of
//! all constitutive models: labeled axes, variable stores, parameter
//! stores with nonlinear parameters, the derivative assignment
//! machinery, the [`Model`] lifecycle, and composition over a
//! dependency graph.

pub mod axis;
pub mod composed;
#[allow(clippy::module_inception)]
pub mod model;
pub mod name;
pub mod parameter;
pub mod resolver;
pub mod store;
pub mod variable;

use crate::tensor::Tensor;
use indexmap::IndexMap;

pub use axis::LabeledAxis;
pub use composed::ComposedModel;
pub use model::{
    currently_assembling_nonlinear_system, is_dependent, AssemblingNonlinearSystem, Model,
    ModelBase, ModelRef,
};
pub use name::VariableName;
pub use parameter::{NonlinearParameter, Param, ParameterStore};
pub use resolver::DependencyResolver;
pub use store::VariableStore;
pub use variable::Var;

/// Values keyed by variable name, iterated in insertion order.
pub type ValueMap = IndexMap<VariableName, Tensor>;
/// First derivatives keyed by output then input variable name.
pub type DerivMap = IndexMap<VariableName, ValueMap>;
/// Second derivatives keyed by output then the two input variable names.
pub type SecDerivMap = IndexMap<VariableName, DerivMap>;
