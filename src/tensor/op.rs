//! `op` defines the single operation vocabulary shared by the three
//! consumers of tensor operations: eager evaluation, reverse-mode
//! differentiation, and graph capture/replay.
//!
//! Every public tensor operation funnels through [`dispatch`], which
//! evaluates the forward kernel, attaches a differentiation node when an
//! operand participates in a gradient computation, and records the
//! operation into the active trace when one is being captured. Keeping
//! one vocabulary guarantees that anything a model does in its forward
//! operator can be differentiated and replayed.

use super::tensor::{Group, Tensor};
use crate::errors::Result;
use crate::tensor::{core_ops, dim_ops, linear_algebra};
use crate::{ad, jit};

/// The operation vocabulary.
///
/// Movement operations carry the dimension group they act on and their
/// static attributes; linear-algebra operations act on base dimensions
/// and broadcast everything batched.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Leaf marker for differentiation roots; never evaluated.
    Leaf,
    /// Elementwise sum of two tensors.
    Add,
    /// Elementwise difference of two tensors.
    Sub,
    /// Elementwise product of two tensors.
    Mul,
    /// Elementwise quotient of two tensors.
    Div,
    Neg,
    Exp,
    Log,
    Sqrt,
    AddScalar(f64),
    MulScalar(f64),
    PowScalar(f64),
    /// Reinterpretation of the whole shape, including the group split
    /// points. Element count is preserved. The target shape is baked
    /// into captured graphs, so this must not name dynamic extents
    /// inside a traced region; use [`Op::Resplit`] to move split points
    /// without touching the shape.
    ReshapeFull {
        shape: Vec<usize>,
        dynamic_dim: usize,
        intmd_dim: usize,
    },
    /// Moves the group split points without changing the shape. Carries
    /// no extents, so captured graphs replay it at any batch size.
    Resplit {
        dynamic_dim: usize,
        intmd_dim: usize,
    },
    /// Reshape of one dimension group.
    Reshape { group: Group, shape: Vec<usize> },
    /// Broadcast of one dimension group to the given sizes
    /// (`usize::MAX` keeps the existing size).
    Expand { group: Group, sizes: Vec<usize> },
    /// Broadcast of one dimension group to the second operand's sizes
    /// for that group. The target travels as a graph value rather than
    /// a captured constant, so replays read the runtime extent.
    ExpandLike { group: Group },
    Unsqueeze { group: Group, dim: i64 },
    /// Removes a size-1 dimension of a group.
    Squeeze { group: Group, dim: i64 },
    Movedim { group: Group, from: i64, to: i64 },
    /// Reordering of the dimensions of a group.
    Permute { group: Group, perm: Vec<usize> },
    /// Sum over one dimension of a group, removing it.
    Sum { group: Group, dim: i64 },
    /// Broadcast-aware reduction of a group to a target shape.
    SumToSize { group: Group, shape: Vec<usize> },
    /// Broadcast-aware reduction of a group to the second operand's
    /// sizes for that group; the extent-agnostic counterpart of
    /// [`Op::SumToSize`].
    SumToLike { group: Group },
    /// Inserts a duplicate of dimension `dim` right after it and embeds
    /// the input on the diagonal of the resulting pair.
    Diagonalize { group: Group, dim: i64 },
    /// Extracts the diagonal of the dimension pair (`dim`, `dim + 1`).
    TakeDiag { group: Group, dim: i64 },
    Narrow {
        group: Group,
        dim: i64,
        start: usize,
        len: usize,
    },
    /// Zero padding of one dimension.
    Pad {
        group: Group,
        dim: i64,
        before: usize,
        after: usize,
    },
    /// Concatenation of the inputs along one dimension of a group.
    Cat { group: Group, dim: i64 },
    /// Batched matrix-matrix product over the two base dimensions.
    Mm,
    /// Batched matrix-vector product.
    Mv,
    /// Einstein summation over base dimensions; `...` spans the batch.
    Einsum { spec: String },
    /// Gather along one dimension by a static index list.
    IndexSelect {
        group: Group,
        dim: i64,
        indices: Vec<usize>,
    },
    /// Scatter-add along one dimension by a static index list; the
    /// target dimension has size `size`.
    IndexAdd {
        group: Group,
        dim: i64,
        size: usize,
        indices: Vec<usize>,
    },
    /// Zero-filled tensor with the input's layout. Replayed with the
    /// runtime layout, so batch sizes are not baked into traces.
    ZerosLike,
    /// One-filled tensor with the input's layout.
    OnesLike,
    /// The extent of one dynamic dimension as a 0-d tensor. Under
    /// capture this is how a dynamic size becomes an opaque graph
    /// value.
    SizeOf { dim: i64 },
}

/// Evaluates the forward kernel of an operation, with no
/// differentiation or tracing side effects.
pub(crate) fn eval(op: &Op, inputs: &[&Tensor]) -> Result<Tensor> {
    match op {
        Op::Leaf => unreachable!("leaf operations are never evaluated"),
        Op::Add => core_ops::binary_kernel(inputs[0], inputs[1], "add", |a, b| a + b),
        Op::Sub => core_ops::binary_kernel(inputs[0], inputs[1], "sub", |a, b| a - b),
        Op::Mul => core_ops::binary_kernel(inputs[0], inputs[1], "mul", |a, b| a * b),
        Op::Div => core_ops::binary_kernel(inputs[0], inputs[1], "div", |a, b| a / b),
        Op::Neg => Ok(core_ops::unary_kernel(inputs[0], |a| -a)),
        Op::Exp => Ok(core_ops::unary_kernel(inputs[0], f64::exp)),
        Op::Log => Ok(core_ops::unary_kernel(inputs[0], f64::ln)),
        Op::Sqrt => Ok(core_ops::unary_kernel(inputs[0], f64::sqrt)),
        Op::AddScalar(c) => {
            let c = *c;
            Ok(core_ops::unary_kernel(inputs[0], move |a| a + c))
        }
        Op::MulScalar(c) => {
            let c = *c;
            Ok(core_ops::unary_kernel(inputs[0], move |a| a * c))
        }
        Op::PowScalar(p) => {
            let p = *p;
            Ok(core_ops::unary_kernel(inputs[0], move |a| a.powf(p)))
        }
        Op::ReshapeFull {
            shape,
            dynamic_dim,
            intmd_dim,
        } => dim_ops::reshape_full_kernel(inputs[0], shape, *dynamic_dim, *intmd_dim),
        Op::Resplit {
            dynamic_dim,
            intmd_dim,
        } => dim_ops::resplit_kernel(inputs[0], *dynamic_dim, *intmd_dim),
        Op::Reshape { group, shape } => dim_ops::reshape_kernel(inputs[0], *group, shape),
        Op::Expand { group, sizes } => dim_ops::expand_kernel(inputs[0], *group, sizes),
        Op::ExpandLike { group } => {
            dim_ops::expand_kernel(inputs[0], *group, inputs[1].group_sizes(*group))
        }
        Op::Unsqueeze { group, dim } => dim_ops::unsqueeze_kernel(inputs[0], *group, *dim),
        Op::Squeeze { group, dim } => dim_ops::squeeze_kernel(inputs[0], *group, *dim),
        Op::Movedim { group, from, to } => dim_ops::movedim_kernel(inputs[0], *group, *from, *to),
        Op::Permute { group, perm } => dim_ops::permute_kernel(inputs[0], *group, perm),
        Op::Sum { group, dim } => dim_ops::sum_kernel(inputs[0], *group, *dim),
        Op::SumToSize { group, shape } => dim_ops::sum_to_size_kernel(inputs[0], *group, shape),
        Op::SumToLike { group } => {
            dim_ops::sum_to_size_kernel(inputs[0], *group, inputs[1].group_sizes(*group))
        }
        Op::Diagonalize { group, dim } => dim_ops::diagonalize_kernel(inputs[0], *group, *dim),
        Op::TakeDiag { group, dim } => dim_ops::take_diag_kernel(inputs[0], *group, *dim),
        Op::Narrow {
            group,
            dim,
            start,
            len,
        } => dim_ops::narrow_kernel(inputs[0], *group, *dim, *start, *len),
        Op::Pad {
            group,
            dim,
            before,
            after,
        } => dim_ops::pad_kernel(inputs[0], *group, *dim, *before, *after),
        Op::Cat { group, dim } => dim_ops::cat_kernel(inputs, *group, *dim),
        Op::Mm => linear_algebra::mm_kernel(inputs[0], inputs[1]),
        Op::Mv => linear_algebra::mv_kernel(inputs[0], inputs[1]),
        Op::Einsum { spec } => linear_algebra::einsum_kernel(spec, inputs),
        Op::IndexSelect {
            group,
            dim,
            indices,
        } => dim_ops::index_select_kernel(inputs[0], *group, *dim, indices),
        Op::IndexAdd {
            group,
            dim,
            size,
            indices,
        } => dim_ops::index_add_kernel(inputs[0], *group, *dim, *size, indices),
        Op::ZerosLike => Ok(Tensor::full_impl(
            inputs[0].dynamic_sizes(),
            inputs[0].intmd_sizes(),
            inputs[0].base_sizes(),
            0.0,
        )),
        Op::OnesLike => Ok(Tensor::full_impl(
            inputs[0].dynamic_sizes(),
            inputs[0].intmd_sizes(),
            inputs[0].base_sizes(),
            1.0,
        )),
        Op::SizeOf { dim } => {
            let t = inputs[0];
            let i = crate::tensor::shape::normalize_dim(*dim, t.dynamic_dim())?;
            Ok(Tensor::scalar(t.dynamic_sizes()[i] as f64))
        }
    }
}

/// Evaluates an operation and threads it through differentiation and
/// tracing.
pub(crate) fn dispatch(op: Op, inputs: &[&Tensor]) -> Result<Tensor> {
    let mut out = eval(&op, inputs)?;
    ad::track(&op, inputs, &mut out);
    jit::tracer::record(&op, inputs, &out);
    Ok(out)
}
