//! `shape` contains the runtime shape utilities used by the tensor engine
//! together with the `typenum`-based machinery that lets primitive tensor
//! types carry their base shape at the type level.
//!
//! Runtime shapes are plain `Vec<usize>`/`&[usize]` in row-major order.
//! Type-level shapes are `typenum` `TArr`s; marker traits provide
//! conversion to their runtime counterparts. Type-level shapes are only
//! used for the fixed base shapes of primitive tensor types, everything
//! batched is runtime.

use crate::errors::{MateriaError, Result};
use generic_array::ArrayLength;
use std::ops::Mul;
use typenum::operator_aliases::Prod;
use typenum::{ATerm, TArr, Unsigned, U1};

/// Computes the intrinsic row-major strides of a shape, reusing the
/// input allocation.
pub fn strides_in_place(mut shape: Vec<usize>) -> Vec<usize> {
    let mut product = 1;
    for stride in shape.iter_mut().rev() {
        let tmp = product;
        product *= *stride;
        *stride = tmp;
    }

    shape
}

/// Number of elements held by a shape. The empty shape holds one element.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Concatenates shape fragments into one shape.
pub fn add_shapes(parts: &[&[usize]]) -> Vec<usize> {
    let mut shape = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        shape.extend_from_slice(part);
    }
    shape
}

/// Normalizes a possibly negative dimension index into `[0, dim)`.
pub fn normalize_dim(i: i64, dim: usize) -> Result<usize> {
    let j = if i < 0 { i + dim as i64 } else { i };
    if j < 0 || j >= dim as i64 {
        return Err(MateriaError::shape(format!(
            "dimension index {} is out of range for {} dimensions",
            i, dim
        )));
    }
    Ok(j as usize)
}

/// Computes the broadcast of two shapes with the usual right-aligned
/// rules: dimensions must be equal or one of them must be 1.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let max_len = a.len().max(b.len());
    let mut result = Vec::with_capacity(max_len);

    for i in 0..max_len {
        let da = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let db = if i < b.len() { b[b.len() - 1 - i] } else { 1 };

        if da == db || db == 1 {
            result.push(da);
        } else if da == 1 {
            result.push(db);
        } else {
            return Err(MateriaError::shape(format!(
                "shapes {:?} and {:?} are not broadcastable",
                a, b
            )));
        }
    }

    result.reverse();
    Ok(result)
}

/// Whether `from` can be expanded to `to` (right-aligned; every
/// dimension of `from` equals the target or is 1).
pub fn is_expandable_to(from: &[usize], to: &[usize]) -> bool {
    if from.len() > to.len() {
        return false;
    }
    from.iter()
        .rev()
        .zip(to.iter().rev())
        .all(|(f, t)| *f == *t || *f == 1)
}

/// Resolves an expand-size list against an existing shape. A target of
/// `usize::MAX` keeps the existing size (the `-1` convention).
pub fn resolve_expand(from: &[usize], to: &[usize]) -> Result<Vec<usize>> {
    if to.len() < from.len() {
        return Err(MateriaError::shape(format!(
            "cannot expand shape {:?} to the shorter shape {:?}",
            from, to
        )));
    }
    let pad = to.len() - from.len();
    let mut result = Vec::with_capacity(to.len());
    for (i, t) in to.iter().enumerate() {
        let f = if i < pad { 1 } else { from[i - pad] };
        let target = if *t == usize::MAX { f } else { *t };
        if f != target && f != 1 {
            return Err(MateriaError::shape(format!(
                "cannot expand shape {:?} to {:?}: dimension of size {} is not 1",
                from, to, f
            )));
        }
        result.push(target);
    }
    Ok(result)
}

/// Marker trait implemented on `typenum`'s `TArr` containing a collection
/// of type-level unsigned integers. Provides means of conversion for
/// runtime use.
pub unsafe trait StaticShape {
    /// Number of elements in the tensor, i.e. product of all dimensions of the shape.
    const NUM_ELEMENTS: usize;
    /// Number of axes in the shape.
    const LEN: usize;
    /// Outputs a `Vec` containing the runtime version of the shape.
    fn to_vec() -> Vec<usize>;
    /// Outputs a `Vec` containing the intrinsic strides of the shape.
    fn strides() -> Vec<usize>;
}

unsafe impl StaticShape for ATerm {
    const NUM_ELEMENTS: usize = 1;
    const LEN: usize = 0;

    #[inline]
    fn to_vec() -> Vec<usize> {
        Vec::new()
    }

    #[inline]
    fn strides() -> Vec<usize> {
        Vec::new()
    }
}

unsafe impl<D, A> StaticShape for TArr<D, A>
where
    A: StaticShape,
    D: Unsigned,
{
    const NUM_ELEMENTS: usize = D::USIZE * A::NUM_ELEMENTS;
    const LEN: usize = A::LEN + 1;

    #[inline]
    fn to_vec() -> Vec<usize> {
        let mut vec = A::to_vec();
        vec.push(D::USIZE);

        vec
    }

    #[inline]
    fn strides() -> Vec<usize> {
        strides_in_place(Self::to_vec())
    }
}

/// Marker trait implemented on static shapes that provides a type-level
/// number of elements usable as a `generic-array` length, for fixed-size
/// construction of primitive tensors.
pub unsafe trait NumElements<T> {
    type Output: Unsigned + ArrayLength<T>;

    fn num_elements() -> usize {
        <Self::Output as Unsigned>::to_usize()
    }
}

unsafe impl<T> NumElements<T> for ATerm {
    type Output = U1;
}

unsafe impl<T, S, A> NumElements<T> for TArr<S, A>
where
    A: NumElements<T>,
    S: Unsigned + Mul<<A as NumElements<T>>::Output>,
    Prod<S, <A as NumElements<T>>::Output>: Unsigned + ArrayLength<T>,
{
    type Output = Prod<S, <A as NumElements<T>>::Output>;
}

/// 0D shape alias (scalars).
pub type Shape0D = ATerm;
/// 1D shape alias.
pub type Shape1D<S0> = TArr<S0, ATerm>;
/// 2D shape alias.
pub type Shape2D<S0, S1> = TArr<S1, TArr<S0, ATerm>>;
/// 3D shape alias.
pub type Shape3D<S0, S1, S2> = TArr<S2, TArr<S1, TArr<S0, ATerm>>>;
/// 4D shape alias.
pub type Shape4D<S0, S1, S2, S3> = TArr<S3, TArr<S2, TArr<S1, TArr<S0, ATerm>>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use typenum::{U2, U3, U6};

    #[test]
    fn static_shape() {
        assert_eq!(<Shape2D<U3, U2> as StaticShape>::to_vec(), vec![3, 2]);
        assert_eq!(<Shape2D<U3, U2> as StaticShape>::strides(), vec![2, 1]);
        assert_eq!(<Shape2D<U3, U2> as StaticShape>::NUM_ELEMENTS, 6);
        assert_eq!(<Shape1D<U6> as StaticShape>::NUM_ELEMENTS, 6);
        assert_eq!(<Shape0D as StaticShape>::to_vec(), Vec::<usize>::new());
    }

    #[test]
    fn broadcast() {
        assert_eq!(broadcast_shapes(&[2, 1], &[1, 5]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_shapes(&[5], &[2, 5]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_shapes(&[], &[3]).unwrap(), vec![3]);
        assert!(broadcast_shapes(&[2], &[3]).is_err());
    }

    #[test]
    fn expand_resolution() {
        assert_eq!(
            resolve_expand(&[1, 4], &[3, 4]).unwrap(),
            vec![3, 4]
        );
        assert_eq!(
            resolve_expand(&[4], &[3, usize::MAX]).unwrap(),
            vec![3, 4]
        );
        assert!(resolve_expand(&[2, 4], &[3, 4]).is_err());
    }

    #[test]
    fn strides() {
        assert_eq!(strides_in_place(vec![2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(strides_in_place(vec![]), Vec::<usize>::new());
    }
}
