//! Convenience re-exports of the types most programs need.

pub use crate::base::{load_input, load_model, Factory, OptionSet, Registry, Settings};
pub use crate::errors::{MateriaError, Result};
pub use crate::model::{
    ComposedModel, DerivMap, Model, ModelBase, ModelRef, Param, SecDerivMap, ValueMap, Var,
    VariableName,
};
pub use crate::system::{
    LinearSystem, ModelNonlinearSystem, NonlinearSystem, SchurComplement, TensorList,
};
pub use crate::tensor::primitives::{
    PrimitiveTensor, Quaternion, Rot, Scalar, Vec3, R2, SR2, SSR4,
};
pub use crate::tensor::{einsum, mm, mv, solve, Group, Tensor};
