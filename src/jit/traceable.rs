//! `traceable` defines shape values that may be either concrete
//! integers or opaque scalar tensors carried through graph tracing.
//!
//! During graph capture a dynamic extent must not be treated as a
//! constant: a captured graph is replayed on inputs whose dynamic
//! extents differ from the trace-time ones. [`TraceableShape::of`]
//! therefore reads the dynamic sizes of a tensor as recorded `SizeOf`
//! values while a trace is open, and the gradient reduction machinery
//! consults [`TraceableShape::is_concrete`] to decide whether a
//! reduction target may be captured concretely or has to travel as a
//! live graph value.

use crate::tensor::op::{dispatch, Op};
use crate::tensor::Tensor;
use std::fmt;
use std::ops::{Add, Mul};

/// A single dimension size: concrete, or an opaque 0-d tensor recorded
/// during tracing.
#[derive(Clone, Debug)]
pub enum TraceableSize {
    Concrete(usize),
    Traced(Tensor),
}

impl TraceableSize {
    /// The tensor representing the traceable size, if it is traceable.
    pub fn traceable(&self) -> Option<&Tensor> {
        match self {
            TraceableSize::Concrete(_) => None,
            TraceableSize::Traced(t) => Some(t),
        }
    }

    /// The concrete size, without any traceable information.
    pub fn concrete(&self) -> usize {
        match self {
            TraceableSize::Concrete(s) => *s,
            TraceableSize::Traced(t) => t.data()[0] as usize,
        }
    }

    /// The size represented as a scalar tensor (possibly traceable).
    pub fn as_tensor(&self) -> Tensor {
        match self {
            TraceableSize::Concrete(s) => Tensor::scalar(*s as f64),
            TraceableSize::Traced(t) => t.clone(),
        }
    }
}

impl From<usize> for TraceableSize {
    fn from(s: usize) -> Self {
        TraceableSize::Concrete(s)
    }
}

/// Comparison is on concrete values.
impl PartialEq for TraceableSize {
    fn eq(&self, other: &Self) -> bool {
        self.concrete() == other.concrete()
    }
}

impl Eq for TraceableSize {}

/// Arithmetic promotes to opaque if either side is opaque.
impl Add for &TraceableSize {
    type Output = TraceableSize;

    fn add(self, rhs: &TraceableSize) -> TraceableSize {
        match (self, rhs) {
            (TraceableSize::Concrete(a), TraceableSize::Concrete(b)) => {
                TraceableSize::Concrete(a + b)
            }
            _ => TraceableSize::Traced(
                self.as_tensor()
                    .add(&rhs.as_tensor())
                    .expect("scalar sizes are always addable"),
            ),
        }
    }
}

impl Mul for &TraceableSize {
    type Output = TraceableSize;

    fn mul(self, rhs: &TraceableSize) -> TraceableSize {
        match (self, rhs) {
            (TraceableSize::Concrete(a), TraceableSize::Concrete(b)) => {
                TraceableSize::Concrete(a * b)
            }
            _ => TraceableSize::Traced(
                self.as_tensor()
                    .mul(&rhs.as_tensor())
                    .expect("scalar sizes are always multipliable"),
            ),
        }
    }
}

impl fmt::Display for TraceableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceableSize::Concrete(s) => write!(f, "{}", s),
            TraceableSize::Traced(_) => write!(f, "{}*", self.concrete()),
        }
    }
}

/// A shape whose entries are traceable sizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceableShape(Vec<TraceableSize>);

impl TraceableShape {
    pub fn from_sizes(sizes: &[usize]) -> Self {
        TraceableShape(sizes.iter().map(|s| TraceableSize::Concrete(*s)).collect())
    }

    /// The dynamic sizes of a tensor. Under active graph capture the
    /// entries are opaque scalar tensors, recorded into the open trace
    /// so replays recompute them from the runtime inputs.
    pub fn of(t: &Tensor) -> Self {
        if super::tracer::is_tracing() && t.dynamic_dim() > 0 {
            TraceableShape(
                (0..t.dynamic_dim())
                    .map(|i| {
                        TraceableSize::Traced(
                            dispatch(Op::SizeOf { dim: i as i64 }, &[t])
                                .expect("dynamic extents are always readable"),
                        )
                    })
                    .collect(),
            )
        } else {
            Self::from_sizes(t.dynamic_sizes())
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sizes(&self) -> &[TraceableSize] {
        &self.0
    }

    /// Whether every entry is a concrete integer. A false return means
    /// a trace is being captured and the extents are opaque.
    pub fn is_concrete(&self) -> bool {
        self.0
            .iter()
            .all(|s| matches!(s, TraceableSize::Concrete(_)))
    }

    /// The concrete shape, without any traceable information.
    pub fn concrete(&self) -> Vec<usize> {
        self.0.iter().map(|s| s.concrete()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_arithmetic() {
        let a = TraceableSize::Concrete(3);
        let b = TraceableSize::Concrete(4);
        assert_eq!((&a + &b).concrete(), 7);
        assert_eq!((&a * &b).concrete(), 12);
    }

    #[test]
    fn opaque_promotes() {
        let a = TraceableSize::Traced(Tensor::scalar(3.0));
        let b = TraceableSize::Concrete(4);
        let sum = &a + &b;
        assert!(sum.traceable().is_some());
        assert_eq!(sum.concrete(), 7);
        assert_eq!(a, TraceableSize::Concrete(3));
    }

    #[test]
    fn as_tensor() {
        let a = TraceableSize::Concrete(5);
        assert_eq!(a.as_tensor().item().unwrap(), 5.0);
    }

    #[test]
    fn opaque_under_capture() {
        let t = Tensor::zeros(&[4], &[], &[2]);
        assert!(TraceableShape::of(&t).is_concrete());

        let inputs = vec![t];
        crate::jit::tracer::trace(&inputs, || {
            let shape = TraceableShape::of(&inputs[0]);
            assert!(!shape.is_concrete());
            assert_eq!(shape.concrete(), vec![4]);
            Ok(vec![inputs[0].clone()])
        })
        .unwrap();
    }
}
