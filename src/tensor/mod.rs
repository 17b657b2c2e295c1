//! `tensor` is the batched tensor engine: the [`Tensor`] type with its
//! dynamic/intermediate/base dimension layout, elementwise and
//! shape-manipulating operation families, BLAS-backed linear algebra,
//! assembly-format conversions, and the statically-shaped primitive
//! tensor types built on top.

pub mod assembly;
pub mod core_ops;
pub mod dim_ops;
pub mod linear_algebra;
pub(crate) mod op;
pub mod primitives;
pub mod shape;
#[allow(clippy::module_inception)]
mod tensor;

pub use dim_ops::{base_cat, batch_cat, cat, dynamic_cat};
pub use linear_algebra::{einsum, mm, mv, solve};
pub use tensor::{Group, Tensor};
