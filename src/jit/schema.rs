//! `schema` defines the equivalence class of inputs a captured graph
//! can serve.

use crate::tensor::Tensor;

/// Schema for the traced forward operators.
///
/// The schema is determined by the dynamic dimension count and
/// intermediate shape of every input variable and model parameter,
/// together with the dispatch key derived from the device and dtype.
/// Two evaluations with equal schemas replay the same graph; dynamic
/// extents may differ.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvaluationSchema {
    pub dispatch_key: String,
    pub dynamic_dims: Vec<usize>,
    pub intmd_shapes: Vec<Vec<usize>>,
}

impl EvaluationSchema {
    pub fn new(dispatch_key: impl Into<String>) -> Self {
        EvaluationSchema {
            dispatch_key: dispatch_key.into(),
            dynamic_dims: Vec::new(),
            intmd_shapes: Vec::new(),
        }
    }

    /// Appends one stack entry's contribution to the schema.
    pub fn push(&mut self, t: &Tensor) {
        self.dynamic_dims.push(t.dynamic_dim());
        self.intmd_shapes.push(t.intmd_sizes().to_vec());
    }
}
