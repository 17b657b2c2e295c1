//! `core_ops` contains the elementwise operations of the tensor engine.
//!
//! Binary operations broadcast the dynamic dimensions with the usual
//! right-aligned rules, align the intermediate dimensions by right-padding
//! the shorter intermediate group with size-1 dimensions, and require the
//! base dimensions to match exactly. Unary operations are plain maps over
//! the buffer.
//!
//! The same-shape fast path runs in parallel over the buffers; the
//! broadcasting path walks an odometer over the output index space.

use super::op::{dispatch, Op};
use super::shape;
use super::tensor::Tensor;
use crate::errors::{MateriaError, Result};
use rayon::prelude::*;

/// Pads `dims` on the left with 1s up to `len`.
fn left_pad(dims: &[usize], len: usize) -> Vec<usize> {
    let mut padded = vec![1; len - dims.len()];
    padded.extend_from_slice(dims);
    padded
}

/// Pads `dims` on the right with 1s up to `len`. This is the alignment
/// rule for intermediate dimensions.
fn right_pad(dims: &[usize], len: usize) -> Vec<usize> {
    let mut padded = dims.to_vec();
    padded.resize(len, 1);
    padded
}

/// Broadcast of two intermediate groups: the shorter one is right-padded
/// with 1s, then dimensions must be equal or 1.
fn broadcast_intmd(a: &[usize], b: &[usize], name: &str) -> Result<Vec<usize>> {
    let len = a.len().max(b.len());
    let pa = right_pad(a, len);
    let pb = right_pad(b, len);
    let mut out = Vec::with_capacity(len);
    for (da, db) in pa.iter().zip(pb.iter()) {
        if da == db || *db == 1 {
            out.push(*da);
        } else if *da == 1 {
            out.push(*db);
        } else {
            return Err(MateriaError::shape(format!(
                "{}: intermediate shapes {:?} and {:?} are incompatible",
                name, a, b
            )));
        }
    }
    Ok(out)
}

/// Broadcast layout of one operand against an output shape: for every
/// output dimension, the operand's stride (0 where broadcast).
fn broadcast_strides(
    full: &[usize],
    out_dynamic: &[usize],
    out_intmd: &[usize],
    t: &Tensor,
) -> Vec<usize> {
    let strides = shape::strides_in_place(t.sizes().to_vec());
    let pad_dyn = out_dynamic.len() - t.dynamic_dim();

    let mut out = Vec::with_capacity(full.len());
    for (j, target) in full.iter().enumerate() {
        // Map the output position back to the operand's own dimension:
        // dynamic dims are right-aligned, intermediate dims are
        // left-aligned (right-padded), base dims match one to one.
        let own = if j < out_dynamic.len() {
            if j < pad_dyn {
                out.push(0);
                continue;
            }
            j - pad_dyn
        } else if j < out_dynamic.len() + out_intmd.len() {
            let k = j - out_dynamic.len();
            if k >= t.intmd_dim() {
                out.push(0);
                continue;
            }
            t.dynamic_dim() + k
        } else {
            let k = j - out_dynamic.len() - out_intmd.len();
            t.dynamic_dim() + t.intmd_dim() + k
        };
        if t.sizes()[own] == 1 && *target != 1 {
            out.push(0);
        } else {
            out.push(strides[own]);
        }
    }
    out
}

pub(crate) fn binary_kernel<F>(a: &Tensor, b: &Tensor, name: &str, f: F) -> Result<Tensor>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    if a.base_sizes() != b.base_sizes() {
        return Err(MateriaError::shape(format!(
            "{}: base shapes {:?} and {:?} must match exactly",
            name,
            a.base_sizes(),
            b.base_sizes()
        )));
    }

    let out_dynamic =
        shape::broadcast_shapes(a.dynamic_sizes(), b.dynamic_sizes()).map_err(|_| {
            MateriaError::shape(format!(
                "{}: dynamic shapes {:?} and {:?} are not broadcastable",
                name,
                a.dynamic_sizes(),
                b.dynamic_sizes()
            ))
        })?;
    let out_intmd = broadcast_intmd(a.intmd_sizes(), b.intmd_sizes(), name)?;
    let full = shape::add_shapes(&[&out_dynamic, &out_intmd, a.base_sizes()]);

    // Fast path: identical layouts.
    if a.sizes() == full.as_slice() && b.sizes() == full.as_slice() {
        let data: Vec<f64> = a
            .data()
            .par_iter()
            .zip(b.data().par_iter())
            .map(|(x, y)| f(*x, *y))
            .collect();
        return Ok(Tensor::from_parts(
            data,
            full,
            out_dynamic.len(),
            out_intmd.len(),
        ));
    }

    let sa = broadcast_strides(&full, &out_dynamic, &out_intmd, a);
    let sb = broadcast_strides(&full, &out_dynamic, &out_intmd, b);

    let n = shape::numel(&full);
    let mut data = vec![0.0; n];
    let mut index = vec![0usize; full.len()];
    let (mut off_a, mut off_b) = (0usize, 0usize);
    let da = a.data();
    let db = b.data();
    for slot in data.iter_mut() {
        *slot = f(da[off_a], db[off_b]);

        // Odometer increment, updating both offsets as we go.
        for j in (0..full.len()).rev() {
            index[j] += 1;
            off_a += sa[j];
            off_b += sb[j];
            if index[j] < full[j] {
                break;
            }
            off_a -= sa[j] * full[j];
            off_b -= sb[j] * full[j];
            index[j] = 0;
        }
    }

    Ok(Tensor::from_parts(
        data,
        full,
        out_dynamic.len(),
        out_intmd.len(),
    ))
}

pub(crate) fn unary_kernel<F>(a: &Tensor, f: F) -> Tensor
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    let data: Vec<f64> = a.data().par_iter().map(|x| f(*x)).collect();
    Tensor::from_parts(data, a.sizes().to_vec(), a.dynamic_dim(), a.intmd_dim())
}

/// Right-pads the intermediate dimensions of whichever operand has fewer
/// of them with size-1 dimensions, so both have the same intermediate
/// rank.
pub fn align_intmd_dim(a: &Tensor, b: &Tensor) -> Result<(Tensor, Tensor)> {
    if a.intmd_dim() == b.intmd_dim() {
        return Ok((a.clone(), b.clone()));
    }
    let rank = a.intmd_dim().max(b.intmd_dim());
    let pad = |t: &Tensor| -> Result<Tensor> {
        if t.intmd_dim() == rank {
            return Ok(t.clone());
        }
        t.intmd_reshape(&right_pad(t.intmd_sizes(), rank))
    };
    Ok((pad(a)?, pad(b)?))
}

impl Tensor {
    /// Elementwise sum, broadcasting batch dimensions.
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        dispatch(Op::Add, &[self, rhs])
    }

    /// Elementwise difference, broadcasting batch dimensions.
    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        dispatch(Op::Sub, &[self, rhs])
    }

    /// Elementwise product, broadcasting batch dimensions.
    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        dispatch(Op::Mul, &[self, rhs])
    }

    /// Elementwise quotient, broadcasting batch dimensions.
    pub fn div(&self, rhs: &Tensor) -> Result<Tensor> {
        dispatch(Op::Div, &[self, rhs])
    }

    pub fn neg(&self) -> Tensor {
        dispatch(Op::Neg, &[self]).expect("negation cannot fail")
    }

    pub fn exp(&self) -> Tensor {
        dispatch(Op::Exp, &[self]).expect("exp cannot fail")
    }

    pub fn ln(&self) -> Tensor {
        dispatch(Op::Log, &[self]).expect("log cannot fail")
    }

    pub fn sqrt(&self) -> Tensor {
        dispatch(Op::Sqrt, &[self]).expect("sqrt cannot fail")
    }

    pub fn add_scalar(&self, c: f64) -> Tensor {
        dispatch(Op::AddScalar(c), &[self]).expect("scalar addition cannot fail")
    }

    pub fn mul_scalar(&self, c: f64) -> Tensor {
        dispatch(Op::MulScalar(c), &[self]).expect("scalar multiplication cannot fail")
    }

    pub fn pow_scalar(&self, p: f64) -> Tensor {
        dispatch(Op::PowScalar(p), &[self]).expect("scalar power cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_same_shape() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0], &[], &[], &[3]).unwrap();
        let b = Tensor::from_data(vec![10.0, 20.0, 30.0], &[], &[], &[3]).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.data(), &[11.0, 22.0, 33.0]);
    }

    #[test]
    fn add_broadcast_dynamic() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2], &[], &[3]).unwrap();
        let b = Tensor::from_data(vec![10.0, 20.0, 30.0], &[], &[], &[3]).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.dynamic_sizes(), &[2]);
        assert_eq!(c.data(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn mul_right_padded_intmd() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[], &[2, 2], &[]).unwrap();
        let b = Tensor::from_data(vec![2.0, 3.0], &[], &[2], &[]).unwrap();
        // b's intermediate group is right-padded to (2, 1) then broadcast
        // along the second intermediate dimension.
        let c = a.mul(&b).unwrap();
        assert_eq!(c.intmd_sizes(), &[2, 2]);
        assert_eq!(c.data(), &[2.0, 4.0, 9.0, 12.0]);
    }

    #[test]
    fn base_mismatch() {
        let a = Tensor::zeros(&[], &[], &[3]);
        let b = Tensor::zeros(&[], &[], &[4]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn scalar_ops() {
        let a = Tensor::from_data(vec![1.0, 4.0], &[], &[], &[2]).unwrap();
        assert_eq!(a.add_scalar(1.0).data(), &[2.0, 5.0]);
        assert_eq!(a.mul_scalar(2.0).data(), &[2.0, 8.0]);
        assert_eq!(a.sqrt().data(), &[1.0, 2.0]);
        assert_eq!(a.neg().data(), &[-1.0, -4.0]);
    }
}
