//! `dim_ops` contains the shape-manipulating operations of the tensor
//! engine: reshape, expand, unsqueeze, movedim, reductions, sum-to-size,
//! diagonalization, narrowing, padding, concatenation and index
//! select/add.
//!
//! Every operation exists in one flavor per dimension group. The public
//! families (`dynamic_reshape`, `intmd_reshape`, ...) are generated from
//! a single template by the `expand_groups` procedural macro from the
//! `materia_macros` crate; the kernels below are written once against a
//! `(group, window)` pair.

use super::op::{dispatch, Op};
use super::shape;
use super::tensor::{Group, Tensor};
use crate::errors::{MateriaError, Result};
use materia_macros::expand_groups;

/// Where a dimension at an absolute position lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subgroup {
    Dynamic,
    Intmd,
    Base,
}

fn subgroup_of(t: &Tensor, abs: usize) -> Subgroup {
    if abs < t.dynamic_dim() {
        Subgroup::Dynamic
    } else if abs < t.dynamic_dim() + t.intmd_dim() {
        Subgroup::Intmd
    } else {
        Subgroup::Base
    }
}

/// Gathers a contiguous output from `data` given per-output-dimension
/// input strides (0 where the input is broadcast).
fn materialize(data: &[f64], out_shape: &[usize], strides: &[usize]) -> Vec<f64> {
    let n = shape::numel(out_shape);
    let mut out = vec![0.0; n];
    let mut index = vec![0usize; out_shape.len()];
    let mut offset = 0usize;
    for slot in out.iter_mut() {
        *slot = data[offset];
        for j in (0..out_shape.len()).rev() {
            index[j] += 1;
            offset += strides[j];
            if index[j] < out_shape[j] {
                break;
            }
            offset -= strides[j] * out_shape[j];
            index[j] = 0;
        }
    }
    out
}

/// New (dynamic_dim, intmd_dim) after a rank-changing operation that
/// replaces the whole group window with `rank` dimensions. Composite
/// groups assign the new dimensions to their outer subgroup.
fn regrouped(t: &Tensor, group: Group, rank: usize) -> (usize, usize) {
    match group {
        Group::Dynamic => (rank, t.intmd_dim()),
        Group::Intmd => (t.dynamic_dim(), rank),
        Group::Base => (t.dynamic_dim(), t.intmd_dim()),
        Group::Batch => (rank, 0),
        Group::Static => (t.dynamic_dim(), 0),
    }
}

pub(crate) fn reshape_full_kernel(
    t: &Tensor,
    new_shape: &[usize],
    dynamic_dim: usize,
    intmd_dim: usize,
) -> Result<Tensor> {
    if shape::numel(new_shape) != t.numel() {
        return Err(MateriaError::shape(format!(
            "cannot reshape {:?} into {:?}: element counts differ",
            t.sizes(),
            new_shape
        )));
    }
    Ok(Tensor::from_parts(
        t.data().to_vec(),
        new_shape.to_vec(),
        dynamic_dim,
        intmd_dim,
    ))
}

pub(crate) fn resplit_kernel(t: &Tensor, dynamic_dim: usize, intmd_dim: usize) -> Result<Tensor> {
    if dynamic_dim + intmd_dim > t.dim() {
        return Err(MateriaError::shape(format!(
            "cannot split {} dimensions into {} dynamic and {} intermediate",
            t.dim(),
            dynamic_dim,
            intmd_dim
        )));
    }
    Ok(Tensor::from_parts(
        t.data().to_vec(),
        t.sizes().to_vec(),
        dynamic_dim,
        intmd_dim,
    ))
}

pub(crate) fn reshape_kernel(t: &Tensor, group: Group, new_group: &[usize]) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    if shape::numel(new_group) != shape::numel(&t.sizes()[start..end]) {
        return Err(MateriaError::shape(format!(
            "cannot reshape {:?} dimensions {:?} into {:?}: element counts differ",
            group,
            &t.sizes()[start..end],
            new_group
        )));
    }
    let full = shape::add_shapes(&[&t.sizes()[..start], new_group, &t.sizes()[end..]]);
    let (dd, id) = regrouped(t, group, new_group.len());
    Ok(Tensor::from_parts(t.data().to_vec(), full, dd, id))
}

pub(crate) fn expand_kernel(t: &Tensor, group: Group, sizes: &[usize]) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let window = &t.sizes()[start..end];
    let target = shape::resolve_expand(window, sizes)?;
    if target == window {
        return Ok(t.clone());
    }

    let full = shape::add_shapes(&[&t.sizes()[..start], &target, &t.sizes()[end..]]);
    let in_strides = shape::strides_in_place(t.sizes().to_vec());
    let growth = target.len() - window.len();

    let mut strides = Vec::with_capacity(full.len());
    strides.extend_from_slice(&in_strides[..start]);
    for (j, size) in target.iter().enumerate() {
        if j < growth {
            strides.push(0);
        } else {
            let own = start + j - growth;
            strides.push(if t.sizes()[own] == 1 && *size != 1 {
                0
            } else {
                in_strides[own]
            });
        }
    }
    strides.extend_from_slice(&in_strides[end..]);

    let data = materialize(t.data(), &full, &strides);
    let (dd, id) = match group {
        Group::Dynamic | Group::Batch => (t.dynamic_dim() + growth, t.intmd_dim()),
        Group::Intmd | Group::Static => (t.dynamic_dim(), t.intmd_dim() + growth),
        Group::Base => (t.dynamic_dim(), t.intmd_dim()),
    };
    Ok(Tensor::from_parts(data, full, dd, id))
}

pub(crate) fn unsqueeze_kernel(t: &Tensor, group: Group, dim: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let rank = end - start;
    // Insertion points range over rank + 1 positions.
    let pos = if dim < 0 {
        dim + rank as i64 + 1
    } else {
        dim
    };
    if pos < 0 || pos > rank as i64 {
        return Err(MateriaError::shape(format!(
            "unsqueeze position {} is out of range for {} {:?} dimensions",
            dim, rank, group
        )));
    }
    let abs = start + pos as usize;

    let mut full = t.sizes().to_vec();
    full.insert(abs, 1);
    let (mut dd, mut id) = (t.dynamic_dim(), t.intmd_dim());
    match group {
        Group::Dynamic => dd += 1,
        Group::Intmd => id += 1,
        Group::Base => {}
        Group::Batch => {
            if abs <= t.dynamic_dim() {
                dd += 1;
            } else {
                id += 1;
            }
        }
        Group::Static => {
            if abs <= t.dynamic_dim() + t.intmd_dim() {
                id += 1;
            }
        }
    }
    Ok(Tensor::from_parts(t.data().to_vec(), full, dd, id))
}

pub(crate) fn squeeze_kernel(t: &Tensor, group: Group, dim: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    if t.sizes()[abs] != 1 {
        return Err(MateriaError::shape(format!(
            "cannot squeeze dimension {} of size {}",
            abs,
            t.sizes()[abs]
        )));
    }

    let mut full = t.sizes().to_vec();
    full.remove(abs);
    let (mut dd, mut id) = (t.dynamic_dim(), t.intmd_dim());
    match subgroup_of(t, abs) {
        Subgroup::Dynamic => dd -= 1,
        Subgroup::Intmd => id -= 1,
        Subgroup::Base => {}
    }
    Ok(Tensor::from_parts(t.data().to_vec(), full, dd, id))
}

pub(crate) fn movedim_kernel(t: &Tensor, group: Group, from: i64, to: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let rank = end - start;
    let from = start + shape::normalize_dim(from, rank)?;
    let to = start + shape::normalize_dim(to, rank)?;
    if from == to {
        return Ok(t.clone());
    }

    let mut perm: Vec<usize> = (0..t.dim()).collect();
    let moved = perm.remove(from);
    perm.insert(to, moved);

    let in_strides = shape::strides_in_place(t.sizes().to_vec());
    let out_shape: Vec<usize> = perm.iter().map(|p| t.sizes()[*p]).collect();
    let strides: Vec<usize> = perm.iter().map(|p| in_strides[*p]).collect();
    let data = materialize(t.data(), &out_shape, &strides);
    Ok(Tensor::from_parts(
        data,
        out_shape,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

pub(crate) fn permute_kernel(t: &Tensor, group: Group, perm: &[usize]) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let rank = end - start;
    let mut seen = vec![false; rank];
    if perm.len() != rank || perm.iter().any(|p| *p >= rank || std::mem::replace(&mut seen[*p], true)) {
        return Err(MateriaError::shape(format!(
            "{:?} is not a permutation of {} {:?} dimensions",
            perm, rank, group
        )));
    }

    let mut full_perm: Vec<usize> = (0..start).collect();
    full_perm.extend(perm.iter().map(|p| start + p));
    full_perm.extend(end..t.dim());

    let in_strides = shape::strides_in_place(t.sizes().to_vec());
    let out_shape: Vec<usize> = full_perm.iter().map(|p| t.sizes()[*p]).collect();
    let strides: Vec<usize> = full_perm.iter().map(|p| in_strides[*p]).collect();
    let data = materialize(t.data(), &out_shape, &strides);
    Ok(Tensor::from_parts(
        data,
        out_shape,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

/// Splits the shape at an absolute dimension into (outer, n, inner)
/// element counts.
fn split_at(t: &Tensor, abs: usize) -> (usize, usize, usize) {
    let outer = shape::numel(&t.sizes()[..abs]);
    let n = t.sizes()[abs];
    let inner = shape::numel(&t.sizes()[abs + 1..]);
    (outer, n, inner)
}

pub(crate) fn sum_kernel(t: &Tensor, group: Group, dim: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);

    let mut data = vec![0.0; outer * inner];
    let src = t.data();
    for o in 0..outer {
        for i in 0..n {
            let row = (o * n + i) * inner;
            let dst = o * inner;
            for z in 0..inner {
                data[dst + z] += src[row + z];
            }
        }
    }

    let mut full = t.sizes().to_vec();
    full.remove(abs);
    let (mut dd, mut id) = (t.dynamic_dim(), t.intmd_dim());
    match subgroup_of(t, abs) {
        Subgroup::Dynamic => dd -= 1,
        Subgroup::Intmd => id -= 1,
        Subgroup::Base => {}
    }
    Ok(Tensor::from_parts(data, full, dd, id))
}

pub(crate) fn sum_to_size_kernel(t: &Tensor, group: Group, target: &[usize]) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let window = t.sizes()[start..end].to_vec();
    if !shape::is_expandable_to(target, &window) {
        return Err(MateriaError::shape(format!(
            "cannot sum {:?} dimensions {:?} to size {:?}",
            group, window, target
        )));
    }
    if target == window.as_slice() {
        return Ok(t.clone());
    }

    // Sum away the leading extra dimensions, then every dimension where
    // the (right-aligned) target is 1.
    let mut result = t.clone();
    let extra = window.len() - target.len();
    for _ in 0..extra {
        result = sum_kernel(&result, group, 0)?;
    }
    for (j, size) in target.iter().enumerate() {
        let current = result.group_sizes(group)[j];
        if *size == 1 && current != 1 {
            result = sum_kernel(&result, group, j as i64)?;
            result = unsqueeze_kernel(&result, group, j as i64)?;
        }
    }

    // Restore the group bookkeeping the caller asked for.
    let (dd, id) = regrouped(t, group, target.len());
    let full = shape::add_shapes(&[&t.sizes()[..start], target, &t.sizes()[end..]]);
    reshape_full_kernel(&result, &full, dd, id)
}

pub(crate) fn diagonalize_kernel(t: &Tensor, group: Group, dim: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);

    let mut data = vec![0.0; outer * n * n * inner];
    let src = t.data();
    for o in 0..outer {
        for i in 0..n {
            let dst = ((o * n + i) * n + i) * inner;
            let row = (o * n + i) * inner;
            data[dst..dst + inner].copy_from_slice(&src[row..row + inner]);
        }
    }

    let mut full = t.sizes().to_vec();
    full.insert(abs + 1, n);
    let (mut dd, mut id) = (t.dynamic_dim(), t.intmd_dim());
    match subgroup_of(t, abs) {
        Subgroup::Dynamic => dd += 1,
        Subgroup::Intmd => id += 1,
        Subgroup::Base => {}
    }
    Ok(Tensor::from_parts(data, full, dd, id))
}

pub(crate) fn take_diag_kernel(t: &Tensor, group: Group, dim: i64) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    if abs + 1 >= t.dim() || t.sizes()[abs] != t.sizes()[abs + 1] {
        return Err(MateriaError::shape(format!(
            "cannot take the diagonal of dimensions ({}, {}) of shape {:?}",
            abs,
            abs + 1,
            t.sizes()
        )));
    }
    let n = t.sizes()[abs];
    let outer = shape::numel(&t.sizes()[..abs]);
    let inner = shape::numel(&t.sizes()[abs + 2..]);

    let mut data = vec![0.0; outer * n * inner];
    let src = t.data();
    for o in 0..outer {
        for i in 0..n {
            let srcrow = ((o * n + i) * n + i) * inner;
            let dst = (o * n + i) * inner;
            data[dst..dst + inner].copy_from_slice(&src[srcrow..srcrow + inner]);
        }
    }

    let mut full = t.sizes().to_vec();
    full.remove(abs + 1);
    let (mut dd, mut id) = (t.dynamic_dim(), t.intmd_dim());
    match subgroup_of(t, abs + 1) {
        Subgroup::Dynamic => dd -= 1,
        Subgroup::Intmd => id -= 1,
        Subgroup::Base => {}
    }
    Ok(Tensor::from_parts(data, full, dd, id))
}

pub(crate) fn narrow_kernel(
    t: &Tensor,
    group: Group,
    dim: i64,
    nstart: usize,
    len: usize,
) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);
    if nstart + len > n {
        return Err(MateriaError::shape(format!(
            "narrow [{}, {}) is out of range for dimension of size {}",
            nstart,
            nstart + len,
            n
        )));
    }

    let mut data = vec![0.0; outer * len * inner];
    let src = t.data();
    for o in 0..outer {
        let srcrow = (o * n + nstart) * inner;
        let dst = o * len * inner;
        data[dst..dst + len * inner].copy_from_slice(&src[srcrow..srcrow + len * inner]);
    }

    let mut full = t.sizes().to_vec();
    full[abs] = len;
    Ok(Tensor::from_parts(
        data,
        full,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

pub(crate) fn pad_kernel(
    t: &Tensor,
    group: Group,
    dim: i64,
    before: usize,
    after: usize,
) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);
    let m = before + n + after;

    let mut data = vec![0.0; outer * m * inner];
    let src = t.data();
    for o in 0..outer {
        let dst = (o * m + before) * inner;
        let srcrow = o * n * inner;
        data[dst..dst + n * inner].copy_from_slice(&src[srcrow..srcrow + n * inner]);
    }

    let mut full = t.sizes().to_vec();
    full[abs] = m;
    Ok(Tensor::from_parts(
        data,
        full,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

pub(crate) fn cat_kernel(inputs: &[&Tensor], group: Group, dim: i64) -> Result<Tensor> {
    let first = inputs
        .first()
        .ok_or_else(|| MateriaError::shape("cannot concatenate an empty list of tensors"))?;
    let (start, end) = first.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;

    let mut cat_size = 0;
    for t in inputs {
        let mut other = t.sizes().to_vec();
        let mut this = first.sizes().to_vec();
        other[abs] = 0;
        this[abs] = 0;
        if other != this {
            return Err(MateriaError::shape(format!(
                "cannot concatenate shapes {:?} and {:?} along dimension {}",
                first.sizes(),
                t.sizes(),
                abs
            )));
        }
        cat_size += t.sizes()[abs];
    }

    let outer = shape::numel(&first.sizes()[..abs]);
    let inner = shape::numel(&first.sizes()[abs + 1..]);
    let mut data = vec![0.0; outer * cat_size * inner];
    for o in 0..outer {
        let mut at = 0;
        for t in inputs {
            let n = t.sizes()[abs];
            let src = &t.data()[o * n * inner..(o + 1) * n * inner];
            let dst = (o * cat_size + at) * inner;
            data[dst..dst + n * inner].copy_from_slice(src);
            at += n;
        }
    }

    let mut full = first.sizes().to_vec();
    full[abs] = cat_size;
    Ok(Tensor::from_parts(
        data,
        full,
        first.dynamic_dim(),
        first.intmd_dim(),
    ))
}

pub(crate) fn index_select_kernel(
    t: &Tensor,
    group: Group,
    dim: i64,
    indices: &[usize],
) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);
    if let Some(bad) = indices.iter().find(|i| **i >= n) {
        return Err(MateriaError::shape(format!(
            "index {} is out of range for dimension of size {}",
            bad, n
        )));
    }

    let m = indices.len();
    let mut data = vec![0.0; outer * m * inner];
    let src = t.data();
    for o in 0..outer {
        for (j, i) in indices.iter().enumerate() {
            let srcrow = (o * n + i) * inner;
            let dst = (o * m + j) * inner;
            data[dst..dst + inner].copy_from_slice(&src[srcrow..srcrow + inner]);
        }
    }

    let mut full = t.sizes().to_vec();
    full[abs] = m;
    Ok(Tensor::from_parts(
        data,
        full,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

pub(crate) fn index_add_kernel(
    t: &Tensor,
    group: Group,
    dim: i64,
    size: usize,
    indices: &[usize],
) -> Result<Tensor> {
    let (start, end) = t.group_span(group);
    let abs = start + shape::normalize_dim(dim, end - start)?;
    let (outer, n, inner) = split_at(t, abs);
    if n != indices.len() {
        return Err(MateriaError::shape(format!(
            "index_add requires one index per slice, got {} indices for dimension of size {}",
            indices.len(),
            n
        )));
    }
    if let Some(bad) = indices.iter().find(|i| **i >= size) {
        return Err(MateriaError::shape(format!(
            "index {} is out of range for target dimension of size {}",
            bad, size
        )));
    }

    let mut data = vec![0.0; outer * size * inner];
    let src = t.data();
    for o in 0..outer {
        for (j, i) in indices.iter().enumerate() {
            let srcrow = (o * n + j) * inner;
            let dst = (o * size + i) * inner;
            for z in 0..inner {
                data[dst + z] += src[srcrow + z];
            }
        }
    }

    let mut full = t.sizes().to_vec();
    full[abs] = size;
    Ok(Tensor::from_parts(
        data,
        full,
        t.dynamic_dim(),
        t.intmd_dim(),
    ))
}

#[expand_groups(Dynamic, Intmd, Base, Batch, Static)]
impl Tensor {
    pub fn group_reshape(&self, shape: &[usize]) -> Result<Tensor> {
        dispatch(
            Op::Reshape {
                group: Group::Each,
                shape: shape.to_vec(),
            },
            &[self],
        )
    }

    pub fn group_expand(&self, sizes: &[usize]) -> Result<Tensor> {
        dispatch(
            Op::Expand {
                group: Group::Each,
                sizes: sizes.to_vec(),
            },
            &[self],
        )
    }

    pub fn group_unsqueeze(&self, dim: i64) -> Result<Tensor> {
        dispatch(
            Op::Unsqueeze {
                group: Group::Each,
                dim,
            },
            &[self],
        )
    }

    pub fn group_squeeze(&self, dim: i64) -> Result<Tensor> {
        dispatch(
            Op::Squeeze {
                group: Group::Each,
                dim,
            },
            &[self],
        )
    }

    pub fn group_movedim(&self, from: i64, to: i64) -> Result<Tensor> {
        dispatch(
            Op::Movedim {
                group: Group::Each,
                from,
                to,
            },
            &[self],
        )
    }

    pub fn group_permute(&self, perm: &[usize]) -> Result<Tensor> {
        dispatch(
            Op::Permute {
                group: Group::Each,
                perm: perm.to_vec(),
            },
            &[self],
        )
    }

    pub fn group_sum(&self, dim: i64) -> Result<Tensor> {
        dispatch(
            Op::Sum {
                group: Group::Each,
                dim,
            },
            &[self],
        )
    }

    pub fn group_sum_to_size(&self, shape: &[usize]) -> Result<Tensor> {
        dispatch(
            Op::SumToSize {
                group: Group::Each,
                shape: shape.to_vec(),
            },
            &[self],
        )
    }

    pub fn group_diagonalize(&self, dim: i64) -> Result<Tensor> {
        dispatch(
            Op::Diagonalize {
                group: Group::Each,
                dim,
            },
            &[self],
        )
    }

    pub fn group_take_diag(&self, dim: i64) -> Result<Tensor> {
        dispatch(
            Op::TakeDiag {
                group: Group::Each,
                dim,
            },
            &[self],
        )
    }

    pub fn group_narrow(&self, dim: i64, start: usize, len: usize) -> Result<Tensor> {
        dispatch(
            Op::Narrow {
                group: Group::Each,
                dim,
                start,
                len,
            },
            &[self],
        )
    }

    pub fn group_flatten(&self) -> Result<Tensor> {
        let n = crate::tensor::shape::numel(self.group_sizes(Group::Each));
        dispatch(
            Op::Reshape {
                group: Group::Each,
                shape: vec![n],
            },
            &[self],
        )
    }
}

impl Tensor {
    /// Full reinterpretation of the shape and group split points. The
    /// target shape is baked into captured graphs; inside a traced
    /// region prefer the group families or [`Tensor::resplit`], which
    /// carry no extents.
    pub fn reshape_full(
        &self,
        shape: &[usize],
        dynamic_dim: usize,
        intmd_dim: usize,
    ) -> Result<Tensor> {
        dispatch(
            Op::ReshapeFull {
                shape: shape.to_vec(),
                dynamic_dim,
                intmd_dim,
            },
            &[self],
        )
    }

    /// Moves the group split points without changing the shape.
    pub fn resplit(&self, dynamic_dim: usize, intmd_dim: usize) -> Result<Tensor> {
        dispatch(
            Op::Resplit {
                dynamic_dim,
                intmd_dim,
            },
            &[self],
        )
    }

    /// Zero padding of one dimension of a group.
    pub fn pad(&self, group: Group, dim: i64, before: usize, after: usize) -> Result<Tensor> {
        dispatch(
            Op::Pad {
                group,
                dim,
                before,
                after,
            },
            &[self],
        )
    }

    /// Gather along one dimension of a group by a static index list.
    pub fn index_select(&self, group: Group, dim: i64, indices: &[usize]) -> Result<Tensor> {
        dispatch(
            Op::IndexSelect {
                group,
                dim,
                indices: indices.to_vec(),
            },
            &[self],
        )
    }

    /// Scatter-add along one dimension of a group by a static index list.
    pub fn index_add(
        &self,
        group: Group,
        dim: i64,
        size: usize,
        indices: &[usize],
    ) -> Result<Tensor> {
        dispatch(
            Op::IndexAdd {
                group,
                dim,
                size,
                indices: indices.to_vec(),
            },
            &[self],
        )
    }
}

/// Concatenation along one dimension of a group.
pub fn cat(tensors: &[Tensor], group: Group, dim: i64) -> Result<Tensor> {
    let refs: Vec<&Tensor> = tensors.iter().collect();
    dispatch(Op::Cat { group, dim }, &refs)
}

/// Concatenation along a base dimension.
pub fn base_cat(tensors: &[Tensor], dim: i64) -> Result<Tensor> {
    cat(tensors, Group::Base, dim)
}

/// Concatenation along a dynamic dimension.
pub fn dynamic_cat(tensors: &[Tensor], dim: i64) -> Result<Tensor> {
    cat(tensors, Group::Dynamic, dim)
}

/// Concatenation along a batch dimension.
pub fn batch_cat(tensors: &[Tensor], dim: i64) -> Result<Tensor> {
    cat(tensors, Group::Batch, dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn reshape_groups() {
        let t = Tensor::from_data(iota(12), &[2], &[], &[6]).unwrap();
        let r = t.base_reshape(&[2, 3]).unwrap();
        assert_eq!(r.base_sizes(), &[2, 3]);
        assert_eq!(r.dynamic_sizes(), &[2]);

        let s = r.static_flatten().unwrap();
        assert_eq!(s.base_sizes(), &[6]);
        assert_eq!(s.intmd_dim(), 0);
    }

    #[test]
    fn expand_intmd() {
        let t = Tensor::from_data(iota(3), &[], &[1], &[3]).unwrap();
        let e = t.intmd_expand(&[4]).unwrap();
        assert_eq!(e.intmd_sizes(), &[4]);
        assert_eq!(e.data()[0..3], [0.0, 1.0, 2.0]);
        assert_eq!(e.data()[9..12], [0.0, 1.0, 2.0]);
    }

    #[test]
    fn movedim_base() {
        let t = Tensor::from_data(iota(6), &[], &[], &[2, 3]).unwrap();
        let m = t.base_movedim(0, 1).unwrap();
        assert_eq!(m.base_sizes(), &[3, 2]);
        assert_eq!(m.data(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn sum_and_sum_to_size() {
        let t = Tensor::from_data(iota(6), &[], &[2], &[3]).unwrap();
        let s = t.intmd_sum(0).unwrap();
        assert_eq!(s.intmd_dim(), 0);
        assert_eq!(s.data(), &[3.0, 5.0, 7.0]);

        let u = t.intmd_sum_to_size(&[1]).unwrap();
        assert_eq!(u.intmd_sizes(), &[1]);
        assert_eq!(u.data(), &[3.0, 5.0, 7.0]);
    }

    #[test]
    fn diagonalize_and_take_diag() {
        let t = Tensor::from_data(vec![1.0, 2.0], &[], &[2], &[]).unwrap();
        let d = t.intmd_diagonalize(0).unwrap();
        assert_eq!(d.intmd_sizes(), &[2, 2]);
        assert_eq!(d.data(), &[1.0, 0.0, 0.0, 2.0]);

        let back = d.intmd_take_diag(0).unwrap();
        assert_eq!(back.data(), &[1.0, 2.0]);
    }

    #[test]
    fn narrow_and_pad() {
        let t = Tensor::from_data(iota(6), &[], &[], &[6]).unwrap();
        let n = t.base_narrow(0, 2, 3).unwrap();
        assert_eq!(n.data(), &[2.0, 3.0, 4.0]);

        let p = n.pad(Group::Base, 0, 1, 2).unwrap();
        assert_eq!(p.data(), &[0.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn cat_base() {
        let a = Tensor::from_data(iota(2), &[], &[], &[2]).unwrap();
        let b = Tensor::from_data(vec![7.0], &[], &[], &[1]).unwrap();
        let c = base_cat(&[a, b], 0).unwrap();
        assert_eq!(c.base_sizes(), &[3]);
        assert_eq!(c.data(), &[0.0, 1.0, 7.0]);
    }

    #[test]
    fn index_select_add_roundtrip() {
        let t = Tensor::from_data(iota(8), &[4], &[], &[2]).unwrap();
        let sel = t.index_select(Group::Dynamic, 0, &[1, 3]).unwrap();
        assert_eq!(sel.data(), &[2.0, 3.0, 6.0, 7.0]);

        let added = sel.index_add(Group::Dynamic, 0, 4, &[1, 3]).unwrap();
        assert_eq!(added.data(), &[0.0, 0.0, 2.0, 3.0, 0.0, 0.0, 6.0, 7.0]);
    }

    #[test]
    fn batch_reshape_collapses_to_dynamic() {
        let t = Tensor::zeros(&[2, 3], &[4], &[5]);
        let r = t.batch_reshape(&[24]).unwrap();
        assert_eq!(r.dynamic_sizes(), &[24]);
        assert_eq!(r.intmd_dim(), 0);
        assert_eq!(r.base_sizes(), &[5]);
    }

    #[test]
    fn squeeze_inverts_unsqueeze() {
        let t = Tensor::from_data(iota(6), &[], &[2], &[3]).unwrap();
        let u = t.intmd_unsqueeze(-1).unwrap();
        assert_eq!(u.intmd_sizes(), &[2, 1]);
        let back = u.intmd_squeeze(-1).unwrap();
        assert_eq!(back, t);
        assert!(t.intmd_squeeze(0).is_err());
    }

    #[test]
    fn resplit_moves_split_points() {
        let t = Tensor::zeros(&[2], &[3], &[4]);
        let r = t.resplit(1, 2).unwrap();
        assert_eq!(r.sizes(), t.sizes());
        assert_eq!(r.intmd_sizes(), &[3, 4]);
        assert_eq!(r.base_dim(), 0);
        assert!(t.resplit(3, 1).is_err());
    }
}
