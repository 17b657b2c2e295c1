//! `linear_algebra` contains the algebra-specific operations of the
//! tensor engine: batched matrix/matrix and matrix/vector products
//! backed by openblas through C bindings, an Einstein-summation
//! primitive over base dimensions, and a dense LU factor/solve used by
//! the equation-system solvers.
//!
//! All operations here expect their operands in assembly format (no
//! intermediate dimensions); dynamic dimensions broadcast.

extern crate cblas;
extern crate openblas_src;

use super::op::{dispatch, Op};
use super::shape;
use super::tensor::Tensor;
use crate::errors::{MateriaError, Result};
use cblas::{dgemm, dgemv, Layout, Transpose};

fn check_assembly(t: &Tensor, what: &str) -> Result<()> {
    if t.intmd_dim() != 0 {
        return Err(MateriaError::shape(format!(
            "{} expects operands in assembly format (no intermediate dimensions), got {:?}",
            what,
            t.intmd_sizes()
        )));
    }
    Ok(())
}

/// Per-batch-element offsets (in units of one static block) of an
/// operand against a broadcast batch shape.
fn batch_strides(out_dynamic: &[usize], t: &Tensor) -> Vec<usize> {
    let own = t.dynamic_sizes();
    let own_strides = shape::strides_in_place(own.to_vec());
    let pad = out_dynamic.len() - own.len();
    let mut strides = Vec::with_capacity(out_dynamic.len());
    for (j, target) in out_dynamic.iter().enumerate() {
        if j < pad {
            strides.push(0);
        } else if own[j - pad] == 1 && *target != 1 {
            strides.push(0);
        } else {
            strides.push(own_strides[j - pad]);
        }
    }
    strides
}

/// Iterates a broadcast batch space, yielding per-operand block offsets.
fn for_each_batch<F>(out_dynamic: &[usize], strides: &[Vec<usize>], mut f: F)
where
    F: FnMut(usize, &[usize]),
{
    let n = shape::numel(out_dynamic);
    let mut index = vec![0usize; out_dynamic.len()];
    let mut offsets = vec![0usize; strides.len()];
    for flat in 0..n {
        f(flat, &offsets);
        for j in (0..out_dynamic.len()).rev() {
            index[j] += 1;
            for (o, s) in offsets.iter_mut().zip(strides.iter()) {
                *o += s[j];
            }
            if index[j] < out_dynamic[j] {
                break;
            }
            for (o, s) in offsets.iter_mut().zip(strides.iter()) {
                *o -= s[j] * out_dynamic[j];
            }
            index[j] = 0;
        }
    }
}

pub(crate) fn mm_kernel(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_assembly(a, "mm")?;
    check_assembly(b, "mm")?;
    if a.base_dim() != 2 || b.base_dim() != 2 || a.base_sizes()[1] != b.base_sizes()[0] {
        return Err(MateriaError::shape(format!(
            "mm requires base shapes (m, k) and (k, n), got {:?} and {:?}",
            a.base_sizes(),
            b.base_sizes()
        )));
    }
    let (m, k) = (a.base_sizes()[0], a.base_sizes()[1]);
    let n = b.base_sizes()[1];

    let out_dynamic = shape::broadcast_shapes(a.dynamic_sizes(), b.dynamic_sizes())?;
    let nbatch = shape::numel(&out_dynamic);
    let strides = vec![batch_strides(&out_dynamic, a), batch_strides(&out_dynamic, b)];

    let mut data = vec![0.0; nbatch * m * n];
    for_each_batch(&out_dynamic, &strides, |flat, offsets| {
        let ablock = &a.data()[offsets[0] * m * k..offsets[0] * m * k + m * k];
        let bblock = &b.data()[offsets[1] * k * n..offsets[1] * k * n + k * n];
        let cblock = &mut data[flat * m * n..(flat + 1) * m * n];
        unsafe {
            dgemm(
                Layout::RowMajor,
                Transpose::None,
                Transpose::None,
                m as i32,
                n as i32,
                k as i32,
                1.0,
                ablock,
                k as i32,
                bblock,
                n as i32,
                0.0,
                cblock,
                n as i32,
            );
        }
    });

    let full = shape::add_shapes(&[&out_dynamic, &[m, n]]);
    Ok(Tensor::from_parts(data, full, out_dynamic.len(), 0))
}

pub(crate) fn mv_kernel(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_assembly(a, "mv")?;
    check_assembly(b, "mv")?;
    if a.base_dim() != 2 || b.base_dim() != 1 || a.base_sizes()[1] != b.base_sizes()[0] {
        return Err(MateriaError::shape(format!(
            "mv requires base shapes (m, k) and (k,), got {:?} and {:?}",
            a.base_sizes(),
            b.base_sizes()
        )));
    }
    let (m, k) = (a.base_sizes()[0], a.base_sizes()[1]);

    let out_dynamic = shape::broadcast_shapes(a.dynamic_sizes(), b.dynamic_sizes())?;
    let nbatch = shape::numel(&out_dynamic);
    let strides = vec![batch_strides(&out_dynamic, a), batch_strides(&out_dynamic, b)];

    let mut data = vec![0.0; nbatch * m];
    for_each_batch(&out_dynamic, &strides, |flat, offsets| {
        let ablock = &a.data()[offsets[0] * m * k..offsets[0] * m * k + m * k];
        let bblock = &b.data()[offsets[1] * k..offsets[1] * k + k];
        let cblock = &mut data[flat * m..(flat + 1) * m];
        unsafe {
            dgemv(
                Layout::RowMajor,
                Transpose::None,
                m as i32,
                k as i32,
                1.0,
                ablock,
                k as i32,
                bblock,
                1,
                0.0,
                cblock,
                1,
            );
        }
    });

    let full = shape::add_shapes(&[&out_dynamic, &[m]]);
    Ok(Tensor::from_parts(data, full, out_dynamic.len(), 0))
}

/// Batched matrix-matrix product over base dimensions.
pub fn mm(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    dispatch(Op::Mm, &[a, b])
}

/// Batched matrix-vector product over base dimensions.
pub fn mv(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    dispatch(Op::Mv, &[a, b])
}

/// Einstein summation over base dimensions, e.g.
/// `einsum("...ik,...kj", &[&a, &b])`. The ellipsis spans the dynamic
/// dimensions, which broadcast. Without an explicit `->` output, free
/// indices are emitted in alphabetical order.
pub fn einsum(spec: &str, operands: &[&Tensor]) -> Result<Tensor> {
    dispatch(
        Op::Einsum {
            spec: spec.to_string(),
        },
        operands,
    )
}

struct EinsumSpec {
    subscripts: Vec<Vec<char>>,
    output: Vec<char>,
}

fn parse_spec(spec: &str, n_operands: usize) -> Result<EinsumSpec> {
    let (inputs, explicit_out) = match spec.find("->") {
        Some(pos) => (&spec[..pos], Some(&spec[pos + 2..])),
        None => (spec, None),
    };

    let mut subscripts = Vec::new();
    for part in inputs.split(',') {
        let part = part.trim().trim_start_matches("...");
        let letters: Vec<char> = part.chars().collect();
        if letters.iter().any(|c| !c.is_ascii_lowercase()) {
            return Err(MateriaError::shape(format!(
                "invalid einsum subscript '{}' in '{}'",
                part, spec
            )));
        }
        subscripts.push(letters);
    }
    if subscripts.len() != n_operands {
        return Err(MateriaError::shape(format!(
            "einsum '{}' names {} operands but {} were given",
            spec,
            subscripts.len(),
            n_operands
        )));
    }

    let output = match explicit_out {
        Some(out) => out.trim().trim_start_matches("...").chars().collect(),
        None => {
            // Implicit output: letters appearing exactly once, in
            // alphabetical order.
            let mut counts = [0usize; 26];
            for sub in &subscripts {
                for c in sub {
                    counts[(*c as u8 - b'a') as usize] += 1;
                }
            }
            ('a'..='z')
                .filter(|c| counts[(*c as u8 - b'a') as usize] == 1)
                .collect()
        }
    };

    Ok(EinsumSpec { subscripts, output })
}

pub(crate) fn einsum_kernel(spec: &str, operands: &[&Tensor]) -> Result<Tensor> {
    let parsed = parse_spec(spec, operands.len())?;

    // Letter extents, validated across operands.
    let mut extent = [0usize; 26];
    for (t, sub) in operands.iter().zip(&parsed.subscripts) {
        check_assembly(t, "einsum")?;
        if t.base_dim() != sub.len() {
            return Err(MateriaError::shape(format!(
                "einsum '{}': operand with base shape {:?} does not match subscript {:?}",
                spec,
                t.base_sizes(),
                sub
            )));
        }
        for (c, size) in sub.iter().zip(t.base_sizes()) {
            let slot = &mut extent[(*c as u8 - b'a') as usize];
            if *slot == 0 {
                *slot = *size;
            } else if *slot != *size {
                return Err(MateriaError::shape(format!(
                    "einsum '{}': index '{}' has inconsistent extents {} and {}",
                    spec, c, slot, size
                )));
            }
        }
    }

    let size_of = |c: char| extent[(c as u8 - b'a') as usize];

    // Contracted letters: anything not in the output.
    let mut contracted: Vec<char> = Vec::new();
    for sub in &parsed.subscripts {
        for c in sub {
            if !parsed.output.contains(c) && !contracted.contains(c) {
                contracted.push(*c);
            }
        }
    }

    let out_dynamic = operands
        .iter()
        .try_fold(Vec::new(), |acc, t| {
            shape::broadcast_shapes(&acc, t.dynamic_sizes())
        })?;
    let strides: Vec<Vec<usize>> = operands
        .iter()
        .map(|t| batch_strides(&out_dynamic, t))
        .collect();

    // Per-operand stride of each letter within the static block.
    let letter_strides: Vec<Vec<(usize, usize)>> = operands
        .iter()
        .zip(&parsed.subscripts)
        .map(|(t, sub)| {
            let base_strides = shape::strides_in_place(t.base_sizes().to_vec());
            sub.iter()
                .map(|c| ((*c as u8 - b'a') as usize, 0))
                .zip(base_strides)
                .map(|((letter, _), stride)| (letter, stride))
                .collect()
        })
        .collect();

    let out_base: Vec<usize> = parsed.output.iter().map(|c| size_of(*c)).collect();
    let out_base_numel = shape::numel(&out_base);
    let contracted_sizes: Vec<usize> = contracted.iter().map(|c| size_of(*c)).collect();
    let contracted_numel = shape::numel(&contracted_sizes);
    let block_sizes: Vec<usize> = operands
        .iter()
        .map(|t| shape::numel(t.base_sizes()))
        .collect();

    let nbatch = shape::numel(&out_dynamic);
    let mut data = vec![0.0; nbatch * out_base_numel];

    // Current letter assignment, shared by output and contracted loops.
    let mut letter_index = [0usize; 26];
    for_each_batch(&out_dynamic, &strides, |flat, offsets| {
        for o in 0..out_base_numel {
            let mut rem = o;
            for (c, size) in parsed.output.iter().zip(&out_base).rev() {
                letter_index[(*c as u8 - b'a') as usize] = rem % size;
                rem /= size;
            }

            let mut acc = 0.0;
            for k in 0..contracted_numel {
                let mut rem = k;
                for (c, size) in contracted.iter().zip(&contracted_sizes).rev() {
                    letter_index[(*c as u8 - b'a') as usize] = rem % size;
                    rem /= size;
                }

                let mut term = 1.0;
                for (i, t) in operands.iter().enumerate() {
                    let mut offset = offsets[i] * block_sizes[i];
                    for (letter, stride) in &letter_strides[i] {
                        offset += letter_index[*letter] * stride;
                    }
                    term *= t.data()[offset];
                }
                acc += term;
            }
            data[flat * out_base_numel + o] = acc;
        }
    });

    let full = shape::add_shapes(&[&out_dynamic, &out_base]);
    Ok(Tensor::from_parts(data, full, out_dynamic.len(), 0))
}

/// Builds the einsum spec computing the gradient of operand `idx`: the
/// output gradient contracted with the remaining operands, emitted with
/// operand `idx`'s subscript.
pub(crate) fn einsum_backward_spec(spec: &str, idx: usize) -> Result<String> {
    // The operand count is not known here; parse leniently by counting
    // the comma-separated subscripts.
    let n = spec
        .split("->")
        .next()
        .map(|s| s.split(',').count())
        .unwrap_or(0);
    let parsed = parse_spec(spec, n)?;

    let to_string = |letters: &[char]| -> String { letters.iter().collect() };
    let mut inputs = vec![format!("...{}", to_string(&parsed.output))];
    for (j, sub) in parsed.subscripts.iter().enumerate() {
        if j != idx {
            inputs.push(format!("...{}", to_string(sub)));
        }
    }
    Ok(format!(
        "{}->...{}",
        inputs.join(","),
        to_string(&parsed.subscripts[idx])
    ))
}

/// Solves the batched dense linear system `a x = b` by LU factorization
/// with partial pivoting. `a` has base shape (n, n) and `b` has base
/// shape (n,) or (n, p).
pub fn solve(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_assembly(a, "solve")?;
    check_assembly(b, "solve")?;
    if a.base_dim() != 2 || a.base_sizes()[0] != a.base_sizes()[1] {
        return Err(MateriaError::shape(format!(
            "solve requires a square matrix, got base shape {:?}",
            a.base_sizes()
        )));
    }
    let n = a.base_sizes()[0];
    let vector_rhs = b.base_dim() == 1;
    if (b.base_dim() != 1 && b.base_dim() != 2) || b.base_sizes()[0] != n {
        return Err(MateriaError::shape(format!(
            "solve right-hand side base shape {:?} does not match matrix {:?}",
            b.base_sizes(),
            a.base_sizes()
        )));
    }
    let p = if vector_rhs { 1 } else { b.base_sizes()[1] };

    let out_dynamic = shape::broadcast_shapes(a.dynamic_sizes(), b.dynamic_sizes())?;
    let nbatch = shape::numel(&out_dynamic);
    let strides = vec![batch_strides(&out_dynamic, a), batch_strides(&out_dynamic, b)];

    let mut data = vec![0.0; nbatch * n * p];
    let mut failure = None;
    for_each_batch(&out_dynamic, &strides, |flat, offsets| {
        if failure.is_some() {
            return;
        }
        let mut lu = a.data()[offsets[0] * n * n..offsets[0] * n * n + n * n].to_vec();
        let mut x = b.data()[offsets[1] * n * p..offsets[1] * n * p + n * p].to_vec();

        // LU decomposition with partial pivoting, applied to the
        // right-hand side in place.
        for col in 0..n {
            let mut pivot = col;
            let mut best = lu[col * n + col].abs();
            for row in col + 1..n {
                let v = lu[row * n + col].abs();
                if v > best {
                    best = v;
                    pivot = row;
                }
            }
            if best == 0.0 || !best.is_finite() {
                failure = Some(MateriaError::numerical(format!(
                    "LU factorization failed: matrix is singular at column {}",
                    col
                )));
                return;
            }
            if pivot != col {
                for j in 0..n {
                    lu.swap(col * n + j, pivot * n + j);
                }
                for j in 0..p {
                    x.swap(col * p + j, pivot * p + j);
                }
            }
            let diag = lu[col * n + col];
            for row in col + 1..n {
                let factor = lu[row * n + col] / diag;
                lu[row * n + col] = factor;
                for j in col + 1..n {
                    lu[row * n + j] -= factor * lu[col * n + j];
                }
                for j in 0..p {
                    x[row * p + j] -= factor * x[col * p + j];
                }
            }
        }

        // Back substitution.
        for col in (0..n).rev() {
            let diag = lu[col * n + col];
            for j in 0..p {
                let mut v = x[col * p + j];
                for k in col + 1..n {
                    v -= lu[col * n + k] * x[k * p + j];
                }
                x[col * p + j] = v / diag;
            }
        }

        data[flat * n * p..(flat + 1) * n * p].copy_from_slice(&x);
    });
    if let Some(err) = failure {
        return Err(err);
    }

    let base: &[usize] = if vector_rhs { &[n] } else { &[n, p] };
    let full = shape::add_shapes(&[&out_dynamic, base]);
    Ok(Tensor::from_parts(data, full, out_dynamic.len(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mm_plain() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[], &[], &[2, 2]).unwrap();
        let b = Tensor::from_data(vec![5.0, 6.0, 7.0, 8.0], &[], &[], &[2, 2]).unwrap();
        let c = mm(&a, &b).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn mm_batched_broadcast() {
        let a = Tensor::from_data(vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0], &[2], &[], &[2, 2])
            .unwrap();
        let b = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[], &[], &[2, 2]).unwrap();
        let c = mm(&a, &b).unwrap();
        assert_eq!(c.dynamic_sizes(), &[2]);
        assert_eq!(&c.data()[0..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&c.data()[4..8], &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn mv_plain() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[], &[], &[2, 2]).unwrap();
        let b = Tensor::from_data(vec![1.0, 1.0], &[], &[], &[2]).unwrap();
        let c = mv(&a, &b).unwrap();
        assert_eq!(c.data(), &[3.0, 7.0]);
    }

    #[test]
    fn einsum_matmul() {
        let a = Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[], &[], &[2, 2]).unwrap();
        let b = Tensor::from_data(vec![5.0, 6.0, 7.0, 8.0], &[], &[], &[2, 2]).unwrap();
        let c = einsum("...ik,...kj", &[&a, &b]).unwrap();
        assert_eq!(c.base_sizes(), &[2, 2]);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn einsum_explicit_output() {
        let a = Tensor::from_data(vec![1.0, 2.0], &[], &[], &[2]).unwrap();
        let b = Tensor::from_data(vec![3.0, 4.0], &[], &[], &[2]).unwrap();
        let outer = einsum("...i,...k->...ik", &[&a, &b]).unwrap();
        assert_eq!(outer.base_sizes(), &[2, 2]);
        assert_eq!(outer.data(), &[3.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn einsum_bilinear() {
        // The second-order chain rule contraction.
        let d2 = Tensor::from_data(vec![1.0; 8], &[], &[], &[2, 2, 2]).unwrap();
        let du = Tensor::from_data(vec![1.0, 0.0, 0.0, 1.0], &[], &[], &[2, 2]).unwrap();
        let r = einsum("...ijq,...qk", &[&d2, &du]).unwrap();
        assert_eq!(r.base_sizes(), &[2, 2, 2]);
    }

    #[test]
    fn backward_spec() {
        let spec = einsum_backward_spec("...ik,...kj", 0).unwrap();
        assert_eq!(spec, "...ij,...kj->...ik");
    }

    #[test]
    fn solve_identity() {
        let a = Tensor::base_eye(3);
        let b = Tensor::from_data(vec![1.0, 2.0, 3.0], &[], &[], &[3]).unwrap();
        let x = solve(&a, &b).unwrap();
        assert_eq!(x.data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn solve_2x2() {
        let a = Tensor::from_data(vec![1.0, 1.0, 1.0, 2.0], &[], &[], &[2, 2]).unwrap();
        let b = Tensor::from_data(vec![3.0, 5.0], &[], &[], &[2]).unwrap();
        let x = solve(&a, &b).unwrap();
        assert!((x.data()[0] - 1.0).abs() < 1e-12);
        assert!((x.data()[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn solve_singular() {
        let a = Tensor::from_data(vec![1.0, 2.0, 2.0, 4.0], &[], &[], &[2, 2]).unwrap();
        let b = Tensor::from_data(vec![1.0, 2.0], &[], &[], &[2]).unwrap();
        assert!(solve(&a, &b).is_err());
    }
}
