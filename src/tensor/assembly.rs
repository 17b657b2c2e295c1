//! `assembly` converts between the logical tensor layout and the
//! *assembly format* used to exchange values and derivatives with
//! linear-algebra code.
//!
//! A logical value of order N (1 for values, 2 for first derivatives,
//! 3 for second derivatives) has intermediate shape `I1 + ... + IN` and
//! base shape `B1 + ... + BN`. Its assembly form interleaves each
//! variable's intermediate and base dimensions and flattens each pair,
//! yielding N dense base dimensions of sizes `numel(Ii) * numel(Bi)`
//! and no intermediate dimensions.
//!
//! On top of the per-entry conversion, [`assemble_vector`] /
//! [`assemble_matrix`] concatenate a per-variable collection into one
//! flat tensor according to a layout, zero-filling missing entries, and
//! [`disassemble_vector`] / [`disassemble_matrix`] recover the entries.

use super::dim_ops::base_cat;
use super::shape;
use super::tensor::Tensor;
use crate::errors::{MateriaError, Result};

fn check_logical(
    t: &Tensor,
    intmd_shapes: &[&[usize]],
    base_shapes: &[&[usize]],
    debug_name: &str,
) -> Result<()> {
    let intmd = shape::add_shapes(intmd_shapes);
    let base = shape::add_shapes(base_shapes);
    if t.intmd_sizes() != intmd.as_slice() || t.base_sizes() != base.as_slice() {
        return Err(MateriaError::shape(format!(
            "'{}' has intermediate shape {:?} and base shape {:?}, expected {:?} and {:?}",
            debug_name,
            t.intmd_sizes(),
            t.base_sizes(),
            intmd,
            base
        )));
    }
    Ok(())
}

/// The permutation taking `(I1 .. IN, B1 .. BN)` to
/// `(I1, B1, I2, B2, ..)` over the static window.
fn interleave_perm(intmd_shapes: &[&[usize]], base_shapes: &[&[usize]]) -> Vec<usize> {
    let total_intmd: usize = intmd_shapes.iter().map(|s| s.len()).sum();
    let mut perm = Vec::new();
    let mut intmd_at = 0;
    let mut base_at = total_intmd;
    for (i, b) in intmd_shapes.iter().zip(base_shapes.iter()) {
        perm.extend(intmd_at..intmd_at + i.len());
        perm.extend(base_at..base_at + b.len());
        intmd_at += i.len();
        base_at += b.len();
    }
    perm
}

/// Converts a logical tensor of order N to assembly format.
pub fn to_assembly(
    t: &Tensor,
    intmd_shapes: &[&[usize]],
    base_shapes: &[&[usize]],
    debug_name: &str,
) -> Result<Tensor> {
    check_logical(t, intmd_shapes, base_shapes, debug_name)?;
    let perm = interleave_perm(intmd_shapes, base_shapes);
    let interleaved = t.static_permute(&perm)?;

    let flat: Vec<usize> = intmd_shapes
        .iter()
        .zip(base_shapes.iter())
        .map(|(i, b)| shape::numel(i) * shape::numel(b))
        .collect();
    interleaved.static_reshape(&flat)
}

/// Converts an assembly-format tensor of order N back to the logical
/// layout.
pub fn from_assembly(
    t: &Tensor,
    intmd_shapes: &[&[usize]],
    base_shapes: &[&[usize]],
    debug_name: &str,
) -> Result<Tensor> {
    let expected: Vec<usize> = intmd_shapes
        .iter()
        .zip(base_shapes.iter())
        .map(|(i, b)| shape::numel(i) * shape::numel(b))
        .collect();
    if t.intmd_dim() != 0 || t.base_sizes() != expected.as_slice() {
        return Err(MateriaError::shape(format!(
            "'{}' is not in assembly format: expected base shape {:?}, got intermediate {:?} and base {:?}",
            debug_name,
            expected,
            t.intmd_sizes(),
            t.base_sizes()
        )));
    }

    // Unflatten into interleaved (Ii, Bi) runs, undo the permutation,
    // then restore the intermediate split point.
    let mut interleaved_shape = Vec::new();
    for (i, b) in intmd_shapes.iter().zip(base_shapes.iter()) {
        interleaved_shape.extend_from_slice(i);
        interleaved_shape.extend_from_slice(b);
    }
    let unflat = t.base_reshape(&interleaved_shape)?;

    let perm = interleave_perm(intmd_shapes, base_shapes);
    let mut inverse = vec![0usize; perm.len()];
    for (i, p) in perm.iter().enumerate() {
        inverse[*p] = i;
    }
    let unpermuted = unflat.static_permute(&inverse)?;

    let total_intmd: usize = intmd_shapes.iter().map(|s| s.len()).sum();
    unpermuted.resplit(unpermuted.dynamic_dim(), total_intmd)
}

/// Brings an entry into assembly format: logical entries are converted,
/// entries already in assembly format pass through.
fn entry_to_assembly(
    t: &Tensor,
    intmd_shapes: &[&[usize]],
    base_shapes: &[&[usize]],
) -> Result<Tensor> {
    let flat: Vec<usize> = intmd_shapes
        .iter()
        .zip(base_shapes.iter())
        .map(|(i, b)| shape::numel(i) * shape::numel(b))
        .collect();
    if t.intmd_dim() == 0 && t.base_sizes() == flat.as_slice() {
        return Ok(t.clone());
    }
    to_assembly(t, intmd_shapes, base_shapes, "<assemble entry>")
}

fn layout_slices(intmd: Option<&[Vec<usize>]>, base: &[Vec<usize>]) -> Vec<usize> {
    base.iter()
        .enumerate()
        .map(|(i, b)| {
            let bi = shape::numel(b);
            match intmd {
                Some(intmd) => bi * shape::numel(&intmd[i]),
                None => bi,
            }
        })
        .collect()
}

fn intmd_of<'a>(intmd: &'a Option<&[Vec<usize>]>, i: usize) -> &'a [usize] {
    match intmd {
        Some(shapes) => &shapes[i],
        None => &[],
    }
}

/// Common dynamic shape of the present entries.
fn common_dynamic(entries: &[Option<Tensor>]) -> Result<Vec<usize>> {
    entries
        .iter()
        .flatten()
        .try_fold(Vec::new(), |acc, t| {
            shape::broadcast_shapes(&acc, t.dynamic_sizes())
        })
}

/// Assembles a per-variable list of tensors into one flat vector with a
/// single base dimension sized by the layout. Missing entries are
/// zero-filled.
pub fn assemble_vector(
    entries: &[Option<Tensor>],
    intmd_shapes: Option<&[Vec<usize>]>,
    base_shapes: &[Vec<usize>],
) -> Result<Tensor> {
    if entries.len() != base_shapes.len() {
        return Err(MateriaError::shape(format!(
            "assemble received {} entries for a layout of {} variables",
            entries.len(),
            base_shapes.len()
        )));
    }
    let sizes = layout_slices(intmd_shapes, base_shapes);
    let dynamic = common_dynamic(entries)?;

    let mut blocks = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let block = match entry {
            Some(t) => entry_to_assembly(t, &[intmd_of(&intmd_shapes, i)], &[&base_shapes[i]])?
                .dynamic_expand(&dynamic)?,
            None => Tensor::zeros(&dynamic, &[], &[sizes[i]]),
        };
        blocks.push(block);
    }
    base_cat(&blocks, 0)
}

/// Recovers the per-variable entries of a flat vector.
pub fn disassemble_vector(
    t: &Tensor,
    intmd_shapes: Option<&[Vec<usize>]>,
    base_shapes: &[Vec<usize>],
) -> Result<Vec<Tensor>> {
    let sizes = layout_slices(intmd_shapes, base_shapes);
    let total: usize = sizes.iter().sum();
    if t.base_sizes() != [total] {
        return Err(MateriaError::shape(format!(
            "cannot disassemble base shape {:?} with a layout of total size {}",
            t.base_sizes(),
            total
        )));
    }

    let mut entries = Vec::with_capacity(sizes.len());
    let mut at = 0;
    for (i, size) in sizes.iter().enumerate() {
        let block = t.base_narrow(0, at, *size)?;
        entries.push(from_assembly(
            &block,
            &[intmd_of(&intmd_shapes, i)],
            &[&base_shapes[i]],
            "<disassemble entry>",
        )?);
        at += size;
    }
    Ok(entries)
}

/// Assembles a row-major per-variable-pair list of tensors into one flat
/// matrix with two base dimensions sized by the layouts. Missing entries
/// are zero-filled.
pub fn assemble_matrix(
    entries: &[Option<Tensor>],
    row_intmd_shapes: Option<&[Vec<usize>]>,
    col_intmd_shapes: Option<&[Vec<usize>]>,
    row_base_shapes: &[Vec<usize>],
    col_base_shapes: &[Vec<usize>],
) -> Result<Tensor> {
    let nrow = row_base_shapes.len();
    let ncol = col_base_shapes.len();
    if entries.len() != nrow * ncol {
        return Err(MateriaError::shape(format!(
            "assemble received {} entries for a {} x {} block layout",
            entries.len(),
            nrow,
            ncol
        )));
    }
    let row_sizes = layout_slices(row_intmd_shapes, row_base_shapes);
    let col_sizes = layout_slices(col_intmd_shapes, col_base_shapes);
    let dynamic = common_dynamic(entries)?;

    let mut rows = Vec::with_capacity(nrow);
    for i in 0..nrow {
        let mut blocks = Vec::with_capacity(ncol);
        for j in 0..ncol {
            let block = match &entries[i * ncol + j] {
                Some(t) => entry_to_assembly(
                    t,
                    &[
                        intmd_of(&row_intmd_shapes, i),
                        intmd_of(&col_intmd_shapes, j),
                    ],
                    &[&row_base_shapes[i], &col_base_shapes[j]],
                )?
                .dynamic_expand(&dynamic)?,
                None => Tensor::zeros(&dynamic, &[], &[row_sizes[i], col_sizes[j]]),
            };
            blocks.push(block);
        }
        rows.push(base_cat(&blocks, 1)?);
    }
    base_cat(&rows, 0)
}

/// Recovers the row-major per-variable-pair entries of a flat matrix.
pub fn disassemble_matrix(
    t: &Tensor,
    row_intmd_shapes: Option<&[Vec<usize>]>,
    col_intmd_shapes: Option<&[Vec<usize>]>,
    row_base_shapes: &[Vec<usize>],
    col_base_shapes: &[Vec<usize>],
) -> Result<Vec<Tensor>> {
    let row_sizes = layout_slices(row_intmd_shapes, row_base_shapes);
    let col_sizes = layout_slices(col_intmd_shapes, col_base_shapes);
    let m: usize = row_sizes.iter().sum();
    let n: usize = col_sizes.iter().sum();
    if t.base_sizes() != [m, n] {
        return Err(MateriaError::shape(format!(
            "cannot disassemble base shape {:?} with a layout of total size ({}, {})",
            t.base_sizes(),
            m,
            n
        )));
    }

    let mut entries = Vec::with_capacity(row_sizes.len() * col_sizes.len());
    let mut row_at = 0;
    for (i, rsize) in row_sizes.iter().enumerate() {
        let mut col_at = 0;
        for (j, csize) in col_sizes.iter().enumerate() {
            let block = t
                .base_narrow(0, row_at, *rsize)?
                .base_narrow(1, col_at, *csize)?;
            entries.push(from_assembly(
                &block,
                &[
                    intmd_of(&row_intmd_shapes, i),
                    intmd_of(&col_intmd_shapes, j),
                ],
                &[&row_base_shapes[i], &col_base_shapes[j]],
                "<disassemble entry>",
            )?);
            col_at += csize;
        }
        row_at += rsize;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn to_from_assembly_roundtrip() {
        let t = Tensor::from_data(iota(2 * 3 * 4), &[2], &[3], &[4]).unwrap();
        let a = to_assembly(&t, &[&[3]], &[&[4]], "t").unwrap();
        assert_eq!(a.intmd_dim(), 0);
        assert_eq!(a.base_sizes(), &[12]);

        let back = from_assembly(&a, &[&[3]], &[&[4]], "t").unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn to_assembly_second_order() {
        // Derivative layout: Iy = (2,), Ix = (3,), By = (4,), Bx = (5,).
        let t = Tensor::from_data(iota(2 * 3 * 4 * 5), &[], &[2, 3], &[4, 5]).unwrap();
        let a = to_assembly(&t, &[&[2], &[3]], &[&[4], &[5]], "d").unwrap();
        assert_eq!(a.base_sizes(), &[8, 15]);

        let back = from_assembly(&a, &[&[2], &[3]], &[&[4], &[5]], "d").unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn assemble_disassemble_vector() {
        let a = Tensor::from_data(iota(3), &[], &[], &[3]).unwrap();
        let b = Tensor::from_data(iota(4), &[], &[2], &[2]).unwrap();
        let layouts = vec![vec![3], vec![2]];
        let intmd = vec![vec![], vec![2]];

        let flat = assemble_vector(
            &[Some(a.clone()), Some(b.clone())],
            Some(&intmd),
            &layouts,
        )
        .unwrap();
        assert_eq!(flat.base_sizes(), &[7]);

        let parts = disassemble_vector(&flat, Some(&intmd), &layouts).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn assemble_zero_fills_missing() {
        let a = Tensor::from_data(iota(2), &[], &[], &[2]).unwrap();
        let layouts = vec![vec![2], vec![3]];
        let flat = assemble_vector(&[Some(a), None], None, &layouts).unwrap();
        assert_eq!(flat.base_sizes(), &[5]);
        assert_eq!(&flat.data()[2..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn assemble_disassemble_matrix() {
        let d00 = Tensor::from_data(iota(4), &[], &[], &[2, 2]).unwrap();
        let d11 = Tensor::from_data(iota(9), &[], &[], &[3, 3]).unwrap();
        let rows = vec![vec![2], vec![3]];
        let cols = vec![vec![2], vec![3]];

        let flat = assemble_matrix(
            &[Some(d00.clone()), None, None, Some(d11.clone())],
            None,
            None,
            &rows,
            &cols,
        )
        .unwrap();
        assert_eq!(flat.base_sizes(), &[5, 5]);
        assert_eq!(flat.at(&[0, 1]), 1.0);
        assert_eq!(flat.at(&[0, 2]), 0.0);
        assert_eq!(flat.at(&[2, 2]), 0.0);
        assert_eq!(flat.at(&[3, 3]), 4.0);

        let parts = disassemble_matrix(&flat, None, None, &rows, &cols).unwrap();
        assert_eq!(parts[0], d00);
        assert_eq!(parts[3], d11);
    }
}
