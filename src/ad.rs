//! `ad` extends the tensor engine with reverse-mode automatic
//! differentiation.
//!
//! Whenever an operation runs with at least one operand that is part of
//! a differentiation graph, the result carries a [`Node`] recording the
//! operation and its saved inputs. Gradients are computed by walking the
//! graph in reverse topological order and applying the operation's
//! vector-Jacobian rule, accumulating contributions per node.
//!
//! The gradient rules are themselves expressed with regular tensor
//! operations. This has two important consequences: when `create_graph`
//! is requested the computed gradients are differentiable again (which
//! is how second derivatives are extracted), and the gradient
//! computation is recorded by the tracer like any other part of the
//! forward operator, so captured graphs replay derivatives too.

use crate::errors::{MateriaError, Result};
use crate::tensor::op::{dispatch, Op};
use crate::tensor::{linear_algebra, Group, Tensor};
use std::collections::HashMap;
use std::sync::Arc;

/// A node in the differentiation graph: the operation that produced a
/// tensor and the saved operands.
pub struct Node {
    op: Op,
    inputs: Vec<Tensor>,
}

impl Node {
    /// Creates a leaf node, marking a differentiation root.
    pub(crate) fn leaf() -> Arc<Node> {
        Arc::new(Node {
            op: Op::Leaf,
            inputs: Vec::new(),
        })
    }

    fn id(self: &Arc<Node>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

/// Attaches a differentiation node to `out` if any input participates in
/// a gradient computation. Constant-producing operations never do.
pub(crate) fn track(op: &Op, inputs: &[&Tensor], out: &mut Tensor) {
    match op {
        Op::ZerosLike | Op::OnesLike | Op::SizeOf { .. } => return,
        _ => {}
    }
    if inputs.iter().any(|t| t.node.is_some()) {
        out.node = Some(Arc::new(Node {
            op: op.clone(),
            inputs: inputs.iter().map(|t| (*t).clone()).collect(),
        }));
    }
}

/// Reduces a gradient produced under broadcasting back to the layout of
/// the tensor it belongs to: trailing padded intermediate dimensions and
/// broadcast dimensions are summed away, then the group split points are
/// restored.
///
/// Intermediate shapes are part of the evaluation schema, so their
/// reduction can use concrete targets. Dynamic extents may be opaque
/// under graph capture; when they are, the reduction is recorded against
/// the live target tensor so replays read the runtime extent instead of
/// a trace-time constant.
fn reduce_grad(grad: &Tensor, target: &Tensor) -> Result<Tensor> {
    let dynamic_target = target.traceable_dynamic_sizes();

    if dynamic_target.is_concrete()
        && grad.sizes() == target.sizes()
        && grad.dynamic_dim() == target.dynamic_dim()
        && grad.intmd_dim() == target.intmd_dim()
    {
        return Ok(grad.clone());
    }

    let mut g = grad.clone();
    // Intermediate alignment right-pads, so the extra dimensions are the
    // trailing ones.
    while g.intmd_dim() > target.intmd_dim() {
        g = g.intmd_sum(-1)?;
    }
    if g.intmd_sizes() != target.intmd_sizes() {
        g = g.intmd_sum_to_size(target.intmd_sizes())?;
    }

    if dynamic_target.is_concrete() {
        if g.dynamic_sizes() != target.dynamic_sizes() {
            g = g.dynamic_sum_to_size(&dynamic_target.concrete())?;
        }
    } else {
        g = dispatch(
            Op::SumToLike {
                group: Group::Dynamic,
            },
            &[&g, target],
        )?;
    }

    g.resplit(target.dynamic_dim(), target.intmd_dim())
}

/// The vector-Jacobian rule of one operation: given the gradient of the
/// output, the gradients of the inputs (None where no gradient flows).
fn backward(op: &Op, inputs: &[Tensor], grad: &Tensor) -> Result<Vec<Option<Tensor>>> {
    let g = |t: Result<Tensor>, target: &Tensor| -> Result<Option<Tensor>> {
        Ok(Some(reduce_grad(&t?, target)?))
    };

    match op {
        Op::Leaf | Op::ZerosLike | Op::OnesLike | Op::SizeOf { .. } => Ok(Vec::new()),
        Op::Add => {
            let (a, b) = (&inputs[0], &inputs[1]);
            Ok(vec![
                g(Ok(grad.clone()), a)?,
                g(Ok(grad.clone()), b)?,
            ])
        }
        Op::Sub => {
            let (a, b) = (&inputs[0], &inputs[1]);
            Ok(vec![g(Ok(grad.clone()), a)?, g(Ok(grad.neg()), b)?])
        }
        Op::Mul => {
            let (a, b) = (&inputs[0], &inputs[1]);
            Ok(vec![g(grad.mul(b), a)?, g(grad.mul(a), b)?])
        }
        Op::Div => {
            let (a, b) = (&inputs[0], &inputs[1]);
            let da = grad.div(b);
            let db = grad.mul(&a.div(&b.mul(b)?)?).map(|t| t.neg());
            Ok(vec![g(da, a)?, g(db, b)?])
        }
        Op::Neg => Ok(vec![Some(grad.neg())]),
        Op::Exp => Ok(vec![Some(grad.mul(&inputs[0].exp())?)]),
        Op::Log => Ok(vec![Some(grad.div(&inputs[0])?)]),
        Op::Sqrt => Ok(vec![Some(
            grad.mul_scalar(0.5).div(&inputs[0].sqrt())?,
        )]),
        Op::AddScalar(_) => Ok(vec![Some(grad.clone())]),
        Op::MulScalar(c) => Ok(vec![Some(grad.mul_scalar(*c))]),
        Op::PowScalar(p) => {
            let a = &inputs[0];
            Ok(vec![Some(
                grad.mul(&a.pow_scalar(p - 1.0).mul_scalar(*p))?,
            )])
        }
        Op::ReshapeFull { .. } | Op::Reshape { .. } => {
            let a = &inputs[0];
            Ok(vec![Some(grad.reshape_full(
                a.sizes(),
                a.dynamic_dim(),
                a.intmd_dim(),
            )?)])
        }
        Op::Resplit { .. } => {
            let a = &inputs[0];
            Ok(vec![Some(grad.resplit(a.dynamic_dim(), a.intmd_dim())?)])
        }
        Op::Unsqueeze { group, dim } => Ok(vec![Some(dispatch(
            Op::Squeeze {
                group: *group,
                dim: *dim,
            },
            &[grad],
        )?)]),
        Op::Squeeze { group, dim } => Ok(vec![Some(dispatch(
            Op::Unsqueeze {
                group: *group,
                dim: *dim,
            },
            &[grad],
        )?)]),
        Op::Expand { group, .. } => {
            let a = &inputs[0];
            let back = dispatch(Op::SumToLike { group: *group }, &[grad, a])?;
            Ok(vec![Some(back.resplit(a.dynamic_dim(), a.intmd_dim())?)])
        }
        Op::ExpandLike { group } => {
            let a = &inputs[0];
            let back = dispatch(Op::SumToLike { group: *group }, &[grad, a])?;
            Ok(vec![
                Some(back.resplit(a.dynamic_dim(), a.intmd_dim())?),
                None,
            ])
        }
        Op::Movedim { group, from, to } => Ok(vec![Some(dispatch(
            Op::Movedim {
                group: *group,
                from: *to,
                to: *from,
            },
            &[grad],
        )?)]),
        Op::Permute { group, perm } => {
            let mut inverse = vec![0usize; perm.len()];
            for (i, p) in perm.iter().enumerate() {
                inverse[*p] = i;
            }
            Ok(vec![Some(dispatch(
                Op::Permute {
                    group: *group,
                    perm: inverse,
                },
                &[grad],
            )?)])
        }
        Op::Sum { group, dim } => {
            let a = &inputs[0];
            let unsqueezed = dispatch(
                Op::Unsqueeze {
                    group: *group,
                    dim: *dim,
                },
                &[grad],
            )?;
            let back = dispatch(Op::ExpandLike { group: *group }, &[&unsqueezed, a])?;
            Ok(vec![Some(back.resplit(a.dynamic_dim(), a.intmd_dim())?)])
        }
        Op::SumToSize { group, .. } => {
            let a = &inputs[0];
            let back = dispatch(Op::ExpandLike { group: *group }, &[grad, a])?;
            Ok(vec![Some(back.resplit(a.dynamic_dim(), a.intmd_dim())?)])
        }
        Op::SumToLike { group } => {
            let a = &inputs[0];
            let back = dispatch(Op::ExpandLike { group: *group }, &[grad, a])?;
            Ok(vec![
                Some(back.resplit(a.dynamic_dim(), a.intmd_dim())?),
                None,
            ])
        }
        Op::Diagonalize { group, dim } => Ok(vec![Some(dispatch(
            Op::TakeDiag {
                group: *group,
                dim: *dim,
            },
            &[grad],
        )?)]),
        Op::TakeDiag { group, dim } => Ok(vec![Some(dispatch(
            Op::Diagonalize {
                group: *group,
                dim: *dim,
            },
            &[grad],
        )?)]),
        Op::Narrow {
            group,
            dim,
            start,
            len,
        } => {
            let a = &inputs[0];
            let (gstart, gend) = a.group_span(*group);
            let abs = gstart + crate::tensor::shape::normalize_dim(*dim, gend - gstart)?;
            let n = a.sizes()[abs];
            Ok(vec![Some(grad.pad(*group, *dim, *start, n - start - len)?)])
        }
        Op::Pad {
            group,
            dim,
            before,
            ..
        } => {
            let a = &inputs[0];
            let (gstart, gend) = a.group_span(*group);
            let abs = gstart + crate::tensor::shape::normalize_dim(*dim, gend - gstart)?;
            let n = a.sizes()[abs];
            Ok(vec![Some(dispatch(
                Op::Narrow {
                    group: *group,
                    dim: *dim,
                    start: *before,
                    len: n,
                },
                &[grad],
            )?)])
        }
        Op::Cat { group, dim } => {
            let mut grads = Vec::with_capacity(inputs.len());
            let mut at = 0usize;
            for a in inputs {
                let (gstart, gend) = a.group_span(*group);
                let abs = gstart + crate::tensor::shape::normalize_dim(*dim, gend - gstart)?;
                let n = a.sizes()[abs];
                grads.push(Some(dispatch(
                    Op::Narrow {
                        group: *group,
                        dim: *dim,
                        start: at,
                        len: n,
                    },
                    &[grad],
                )?));
                at += n;
            }
            Ok(grads)
        }
        Op::Mm => {
            let (a, b) = (&inputs[0], &inputs[1]);
            let at = a.base_movedim(0, 1)?;
            let bt = b.base_movedim(0, 1)?;
            Ok(vec![
                g(linear_algebra::mm(grad, &bt), a)?,
                g(linear_algebra::mm(&at, grad), b)?,
            ])
        }
        Op::Mv => {
            let (a, b) = (&inputs[0], &inputs[1]);
            let at = a.base_movedim(0, 1)?;
            let da = linear_algebra::einsum("...i,...k->...ik", &[grad, b]);
            Ok(vec![g(da, a)?, g(linear_algebra::mv(&at, grad), b)?])
        }
        Op::Einsum { spec } => {
            let mut grads = Vec::with_capacity(inputs.len());
            for idx in 0..inputs.len() {
                let back_spec = linear_algebra::einsum_backward_spec(spec, idx)?;
                let mut operands: Vec<&Tensor> = vec![grad];
                for (j, t) in inputs.iter().enumerate() {
                    if j != idx {
                        operands.push(t);
                    }
                }
                let di = linear_algebra::einsum(&back_spec, &operands);
                grads.push(g(di, &inputs[idx])?);
            }
            Ok(grads)
        }
        Op::IndexSelect {
            group,
            dim,
            indices,
        } => {
            let a = &inputs[0];
            let (gstart, gend) = a.group_span(*group);
            let abs = gstart + crate::tensor::shape::normalize_dim(*dim, gend - gstart)?;
            let n = a.sizes()[abs];
            Ok(vec![Some(grad.index_add(*group, *dim, n, indices)?)])
        }
        Op::IndexAdd {
            group,
            dim,
            indices,
            ..
        } => Ok(vec![Some(grad.index_select(*group, *dim, indices)?)]),
    }
}

/// Post-order collection of the graph reachable from `root`, each node
/// once.
fn topo(root: &Arc<Node>) -> Vec<Arc<Node>> {
    let mut order = Vec::new();
    let mut seen = HashMap::new();
    // Iterative DFS with an explicit stack of (node, child cursor).
    let mut stack: Vec<(Arc<Node>, usize)> = vec![(Arc::clone(root), 0)];
    seen.insert(root.id(), ());
    while let Some((node, cursor)) = stack.pop() {
        let mut advanced = false;
        for (i, input) in node.inputs.iter().enumerate().skip(cursor) {
            if let Some(child) = &input.node {
                if !seen.contains_key(&child.id()) {
                    seen.insert(child.id(), ());
                    stack.push((Arc::clone(&node), i + 1));
                    stack.push((Arc::clone(child), 0));
                    advanced = true;
                    break;
                }
            }
        }
        if !advanced {
            order.push(node);
        }
    }
    order
}

/// Computes the vector-Jacobian product of `y` against the leaves `xs`,
/// seeded with `seed`.
///
/// Entries of the result are `None` for arguments the computation never
/// reached (the `allow_unused` behavior). With `create_graph` the
/// returned gradients are differentiable again.
pub fn vjp(
    y: &Tensor,
    seed: &Tensor,
    xs: &[&Tensor],
    create_graph: bool,
) -> Result<Vec<Option<Tensor>>> {
    let root = match &y.node {
        Some(node) => Arc::clone(node),
        None => return Ok(vec![None; xs.len()]),
    };

    let mut grads: HashMap<usize, Tensor> = HashMap::new();
    grads.insert(root.id(), seed.clone());

    let order = topo(&root);
    for node in order.iter().rev() {
        let grad_out = match grads.get(&node.id()) {
            Some(grad) => grad.clone(),
            None => continue,
        };
        if let Op::Leaf = node.op {
            continue;
        }

        let input_grads = backward(&node.op, &node.inputs, &grad_out)?;
        for (input, input_grad) in node.inputs.iter().zip(input_grads) {
            let (child, grad) = match (&input.node, input_grad) {
                (Some(child), Some(grad)) => (child, grad),
                _ => continue,
            };
            let grad = if create_graph { grad } else { grad.detach() };
            let id = child.id();
            match grads.remove(&id) {
                Some(existing) => {
                    let combined = existing.add(&grad)?;
                    let combined = if create_graph {
                        combined
                    } else {
                        combined.detach()
                    };
                    grads.insert(id, combined);
                }
                None => {
                    grads.insert(id, grad);
                }
            }
        }
    }

    let mut results = Vec::with_capacity(xs.len());
    for x in xs {
        let grad = x
            .node
            .as_ref()
            .and_then(|node| grads.get(&node.id()).cloned());
        match grad {
            Some(grad) => {
                let grad = reduce_grad(&grad, x)?;
                results.push(Some(if create_graph { grad } else { grad.detach() }));
            }
            None => results.push(None),
        }
    }
    Ok(results)
}

/// Computes the full Jacobian of `y` with respect to each `x`, one
/// backward pass per base element of `y`.
///
/// The returned tensor for `x` has `x`'s batch layout and base shape
/// `y.base_sizes() + x.base_sizes()`. Arguments that the computation
/// never reached map to `None` (the `allow_unused` behavior).
pub fn jacrev(
    y: &Tensor,
    xs: &[&Tensor],
    create_graph: bool,
    allow_unused: bool,
) -> Result<Vec<Option<Tensor>>> {
    let by: usize = y.base_sizes().iter().product();
    let ones = y.ones_like();

    // One VJP per output base element; rows are collected per argument.
    let mut rows: Vec<Vec<Option<Tensor>>> = vec![Vec::with_capacity(by); xs.len()];
    for i in 0..by {
        let mut unit = vec![0.0; by];
        unit[i] = 1.0;
        let unit = Tensor::from_data(unit, &[], &[], y.base_sizes())
            .map_err(|e| MateriaError::shape(format!("jacrev seed construction failed: {}", e)))?;
        let seed = unit.mul(&ones)?;
        let grads = vjp(y, &seed, xs, create_graph)?;
        for (x_rows, grad) in rows.iter_mut().zip(grads) {
            x_rows.push(grad);
        }
    }

    let mut results = Vec::with_capacity(xs.len());
    for (x, x_rows) in xs.iter().zip(rows) {
        if x_rows.iter().all(|r| r.is_none()) {
            if !allow_unused {
                return Err(MateriaError::unsupported(
                    "a differentiated argument was not used in the computation",
                ));
            }
            results.push(None);
            continue;
        }

        let bx: usize = x.base_sizes().iter().product();
        let mut row_tensors = Vec::with_capacity(by);
        for row in &x_rows {
            let row = match row {
                Some(row) => row.clone(),
                None => x.zeros_like(),
            };
            row_tensors.push(row.base_reshape(&[1, bx])?);
        }
        let stacked = crate::tensor::dim_ops::base_cat(&row_tensors, 0)?;
        let base = crate::tensor::shape::add_shapes(&[y.base_sizes(), x.base_sizes()]);
        results.push(Some(stacked.base_reshape(&base)?));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vjp_linear() {
        let mut x = Tensor::from_data(vec![1.0, 2.0, 3.0], &[3], &[], &[]).unwrap();
        x.requires_grad_();
        let y = x.mul_scalar(2.0).add_scalar(1.0);

        let seed = y.ones_like();
        let grads = vjp(&y, &seed, &[&x], false).unwrap();
        assert_eq!(grads[0].as_ref().unwrap().data(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn vjp_product_rule() {
        let mut a = Tensor::from_data(vec![2.0], &[], &[], &[]).unwrap();
        let mut b = Tensor::from_data(vec![5.0], &[], &[], &[]).unwrap();
        a.requires_grad_();
        b.requires_grad_();
        let y = a.mul(&b).unwrap();

        let grads = vjp(&y, &y.ones_like(), &[&a, &b], false).unwrap();
        assert_eq!(grads[0].as_ref().unwrap().data(), &[5.0]);
        assert_eq!(grads[1].as_ref().unwrap().data(), &[2.0]);
    }

    #[test]
    fn vjp_unused_argument() {
        let mut a = Tensor::scalar(2.0);
        let mut b = Tensor::scalar(3.0);
        a.requires_grad_();
        b.requires_grad_();
        let y = a.mul_scalar(4.0);

        let grads = vjp(&y, &y.ones_like(), &[&a, &b], false).unwrap();
        assert!(grads[0].is_some());
        assert!(grads[1].is_none());
    }

    #[test]
    fn vjp_broadcast_reduction() {
        let mut a = Tensor::from_data(vec![3.0], &[], &[], &[]).unwrap();
        a.requires_grad_();
        let batch = Tensor::from_data(vec![1.0, 2.0, 4.0], &[3], &[], &[]).unwrap();
        let y = a.mul(&batch).unwrap();

        let grads = vjp(&y, &y.ones_like(), &[&a], false).unwrap();
        // dy/da summed over the broadcast batch: 1 + 2 + 4.
        assert_eq!(grads[0].as_ref().unwrap().data(), &[7.0]);
    }

    #[test]
    fn jacrev_diagonal() {
        let mut x = Tensor::from_data(vec![1.0, 2.0], &[], &[], &[2]).unwrap();
        x.requires_grad_();
        let y = x.mul(&x).unwrap();

        let jac = jacrev(&y, &[&x], false, true).unwrap();
        let j = jac[0].as_ref().unwrap();
        assert_eq!(j.base_sizes(), &[2, 2]);
        assert_eq!(j.data(), &[2.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn jacrev_second_order() {
        let mut x = Tensor::from_data(vec![3.0], &[], &[], &[]).unwrap();
        x.requires_grad_();
        let y = x.mul(&x).unwrap().mul(&x).unwrap();

        let first = jacrev(&y, &[&x], true, true).unwrap();
        let dy = first[0].as_ref().unwrap();
        assert_eq!(dy.data(), &[27.0]);

        let second = jacrev(dy, &[&x], false, true).unwrap();
        let d2y = second[0].as_ref().unwrap();
        assert_eq!(d2y.data(), &[18.0]);
    }
}
