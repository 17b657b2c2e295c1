//! The batched tensor at the center of the crate.
//!
//! A [`Tensor`] owns one contiguous row-major `f64` buffer and a logical
//! shape partitioned into three contiguous groups of dimensions:
//!
//! ```text
//!  [ dynamic dims | intermediate dims | base dims ]
//!  \____________/ \__________________/ \_________/
//!        batch                            static
//! ```
//!
//! Dynamic dimensions are broadcast across operations and may be traced
//! as opaque sizes during graph capture. Intermediate dimensions are
//! statically known batch dimensions iterated pointwise. Base dimensions
//! are fixed by the tensor's semantic type (3 for a vector, (3, 3) for a
//! second order tensor, and so on).
//!
//! Operations that act on a specific group come in five variants,
//! generated by the `expand_groups` macro: `dynamic_`, `intmd_`,
//! `base_`, `batch_` (dynamic + intermediate) and `static_`
//! (intermediate + base). Rank-changing operations on the composite
//! groups assign the resulting dimensions to the outer group: a
//! `batch_reshape` yields all-dynamic batch dimensions and a
//! `static_reshape` yields all-base static dimensions. The latter is
//! exactly the *assembly format*: no intermediate dimensions, static
//! content flattened into base storage.
//!
//! All operations produce new contiguous tensors; broadcasting is
//! materialized.

use super::shape;
use crate::ad;
use crate::errors::{MateriaError, Result};
use crate::jit::traceable::TraceableShape;
use std::fmt;
use std::sync::Arc;

/// A contiguous group of dimensions an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Dynamic,
    Intmd,
    Base,
    Batch,
    Static,
}

/// Batched tensor with the dynamic/intermediate/base dimension layout.
#[derive(Clone)]
pub struct Tensor {
    data: Arc<Vec<f64>>,
    shape: Vec<usize>,
    dynamic_dim: usize,
    intmd_dim: usize,
    pub(crate) node: Option<Arc<ad::Node>>,
}

impl Tensor {
    // ── Constructors ────────────────────────────────────────────────────

    /// Creates a tensor from a flat row-major buffer and the three shape
    /// groups.
    pub fn from_data(
        data: Vec<f64>,
        dynamic_sizes: &[usize],
        intmd_sizes: &[usize],
        base_sizes: &[usize],
    ) -> Result<Tensor> {
        let full = shape::add_shapes(&[dynamic_sizes, intmd_sizes, base_sizes]);
        if data.len() != shape::numel(&full) {
            return Err(MateriaError::shape(format!(
                "buffer of {} elements cannot fill shape {:?}",
                data.len(),
                full
            )));
        }
        Ok(Tensor {
            data: Arc::new(data),
            shape: full,
            dynamic_dim: dynamic_sizes.len(),
            intmd_dim: intmd_sizes.len(),
            node: None,
        })
    }

    /// Creates a zero-filled tensor.
    pub fn zeros(dynamic_sizes: &[usize], intmd_sizes: &[usize], base_sizes: &[usize]) -> Tensor {
        Self::full_impl(dynamic_sizes, intmd_sizes, base_sizes, 0.0)
    }

    /// Creates a one-filled tensor.
    pub fn ones(dynamic_sizes: &[usize], intmd_sizes: &[usize], base_sizes: &[usize]) -> Tensor {
        Self::full_impl(dynamic_sizes, intmd_sizes, base_sizes, 1.0)
    }

    /// Creates a constant-filled tensor.
    pub fn full(
        dynamic_sizes: &[usize],
        intmd_sizes: &[usize],
        base_sizes: &[usize],
        value: f64,
    ) -> Tensor {
        Self::full_impl(dynamic_sizes, intmd_sizes, base_sizes, value)
    }

    /// Creates an unbatched scalar (0-d) tensor.
    pub fn scalar(value: f64) -> Tensor {
        Self::full_impl(&[], &[], &[], value)
    }

    /// Creates a zero-filled tensor with the same layout as `self`.
    /// Recorded as an operation, so traces replay it with the runtime
    /// layout instead of a captured constant.
    pub fn zeros_like(&self) -> Tensor {
        super::op::dispatch(super::op::Op::ZerosLike, &[self]).expect("zeros_like cannot fail")
    }

    /// Creates a one-filled tensor with the same layout as `self`.
    pub fn ones_like(&self) -> Tensor {
        super::op::dispatch(super::op::Op::OnesLike, &[self]).expect("ones_like cannot fail")
    }

    /// Creates an unbatched identity matrix with base shape `(n, n)`.
    pub fn base_eye(n: usize) -> Tensor {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Tensor {
            data: Arc::new(data),
            shape: vec![n, n],
            dynamic_dim: 0,
            intmd_dim: 0,
            node: None,
        }
    }

    pub(crate) fn full_impl(
        dynamic_sizes: &[usize],
        intmd_sizes: &[usize],
        base_sizes: &[usize],
        value: f64,
    ) -> Tensor {
        let full = shape::add_shapes(&[dynamic_sizes, intmd_sizes, base_sizes]);
        let n = shape::numel(&full);
        Tensor {
            data: Arc::new(vec![value; n]),
            shape: full,
            dynamic_dim: dynamic_sizes.len(),
            intmd_dim: intmd_sizes.len(),
            node: None,
        }
    }

    pub(crate) fn from_parts(
        data: Vec<f64>,
        full_shape: Vec<usize>,
        dynamic_dim: usize,
        intmd_dim: usize,
    ) -> Tensor {
        debug_assert_eq!(
            data.len(),
            shape::numel(&full_shape),
            "Buffer length must match shape. Got {} and {:?}.",
            data.len(),
            full_shape
        );
        debug_assert!(dynamic_dim + intmd_dim <= full_shape.len());
        Tensor {
            data: Arc::new(data),
            shape: full_shape,
            dynamic_dim,
            intmd_dim,
            node: None,
        }
    }

    // ── Shape information ───────────────────────────────────────────────

    /// Total number of dimensions.
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    pub fn dynamic_dim(&self) -> usize {
        self.dynamic_dim
    }

    pub fn intmd_dim(&self) -> usize {
        self.intmd_dim
    }

    pub fn base_dim(&self) -> usize {
        self.shape.len() - self.dynamic_dim - self.intmd_dim
    }

    pub fn batch_dim(&self) -> usize {
        self.dynamic_dim + self.intmd_dim
    }

    pub fn static_dim(&self) -> usize {
        self.shape.len() - self.dynamic_dim
    }

    /// The full shape.
    pub fn sizes(&self) -> &[usize] {
        &self.shape
    }

    pub fn dynamic_sizes(&self) -> &[usize] {
        &self.shape[..self.dynamic_dim]
    }

    pub fn intmd_sizes(&self) -> &[usize] {
        &self.shape[self.dynamic_dim..self.dynamic_dim + self.intmd_dim]
    }

    pub fn base_sizes(&self) -> &[usize] {
        &self.shape[self.dynamic_dim + self.intmd_dim..]
    }

    pub fn batch_sizes(&self) -> &[usize] {
        &self.shape[..self.dynamic_dim + self.intmd_dim]
    }

    pub fn static_sizes(&self) -> &[usize] {
        &self.shape[self.dynamic_dim..]
    }

    /// The dynamic sizes as traceable values. Under graph capture the
    /// entries are opaque scalar tensors recorded in the trace, so
    /// anything derived from them replays with the runtime extents
    /// instead of the capture-time ones.
    pub fn traceable_dynamic_sizes(&self) -> TraceableShape {
        TraceableShape::of(self)
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        shape::numel(&self.shape)
    }

    /// The (start, end) window of a dimension group in the full shape.
    pub fn group_span(&self, group: Group) -> (usize, usize) {
        let d = self.dynamic_dim;
        let b = self.dynamic_dim + self.intmd_dim;
        match group {
            Group::Dynamic => (0, d),
            Group::Intmd => (d, b),
            Group::Base => (b, self.shape.len()),
            Group::Batch => (0, b),
            Group::Static => (d, self.shape.len()),
        }
    }

    /// The sizes of a dimension group.
    pub fn group_sizes(&self, group: Group) -> &[usize] {
        let (start, end) = self.group_span(group);
        &self.shape[start..end]
    }

    /// Whether the tensor is in assembly format: no intermediate
    /// dimensions and at most two base dimensions.
    pub fn is_assembly_format(&self) -> bool {
        self.intmd_dim == 0 && self.base_dim() <= 2
    }

    // ── Data access ─────────────────────────────────────────────────────

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn storage_ptr(&self) -> *const f64 {
        self.data.as_ptr()
    }

    /// The value of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.numel() != 1 {
            return Err(MateriaError::shape(format!(
                "item() requires exactly one element, tensor has shape {:?}",
                self.shape
            )));
        }
        Ok(self.data[0])
    }

    /// The element at a full multi-index.
    pub fn at(&self, index: &[usize]) -> f64 {
        debug_assert_eq!(
            index.len(),
            self.shape.len(),
            "Index length must match tensor rank. Got {:?} and {:?}.",
            index,
            self.shape
        );
        let strides = shape::strides_in_place(self.shape.clone());
        let offset: usize = index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum();
        self.data[offset]
    }

    /// Whether every element is finite.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    // ── Differentiation state ───────────────────────────────────────────

    /// Whether this tensor is part of a differentiation graph.
    pub fn requires_grad(&self) -> bool {
        self.node.is_some()
    }

    /// Marks this tensor as a differentiation leaf.
    pub fn requires_grad_(&mut self) {
        if self.node.is_none() {
            self.node = Some(ad::Node::leaf());
        }
    }

    /// Returns a copy detached from any differentiation graph.
    pub fn detach(&self) -> Tensor {
        Tensor {
            data: Arc::clone(&self.data),
            shape: self.shape.clone(),
            dynamic_dim: self.dynamic_dim,
            intmd_dim: self.intmd_dim,
            node: None,
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Tensor) -> bool {
        self.shape == other.shape
            && self.dynamic_dim == other.dynamic_dim
            && self.intmd_dim == other.intmd_dim
            && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dynamic", &self.dynamic_sizes())
            .field("intmd", &self.intmd_sizes())
            .field("base", &self.base_sizes())
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let t = Tensor::zeros(&[2, 5], &[4], &[3, 3]);
        assert_eq!(t.dim(), 5);
        assert_eq!(t.dynamic_dim(), 2);
        assert_eq!(t.intmd_dim(), 1);
        assert_eq!(t.base_dim(), 2);
        assert_eq!(t.batch_sizes(), &[2, 5, 4]);
        assert_eq!(t.static_sizes(), &[4, 3, 3]);
        assert_eq!(t.numel(), 2 * 5 * 4 * 9);
    }

    #[test]
    fn group_spans() {
        let t = Tensor::zeros(&[2], &[4], &[6]);
        assert_eq!(t.group_span(Group::Dynamic), (0, 1));
        assert_eq!(t.group_span(Group::Intmd), (1, 2));
        assert_eq!(t.group_span(Group::Base), (2, 3));
        assert_eq!(t.group_span(Group::Batch), (0, 2));
        assert_eq!(t.group_span(Group::Static), (1, 3));
    }

    #[test]
    fn eye() {
        let t = Tensor::base_eye(3);
        assert_eq!(t.base_sizes(), &[3, 3]);
        assert_eq!(t.at(&[1, 1]), 1.0);
        assert_eq!(t.at(&[1, 2]), 0.0);
    }

    #[test]
    fn bad_buffer_length() {
        assert!(Tensor::from_data(vec![0.0; 5], &[], &[], &[6]).is_err());
    }
}
