//! `graph` holds captured forward operators and replays them.

use crate::errors::{MateriaError, Result};
use crate::tensor::op::{eval, Op};
use crate::tensor::Tensor;

/// One recorded operation: the opcode, the value slots it reads, and the
/// slot it writes.
#[derive(Debug, Clone)]
pub(crate) struct Instruction {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<usize>,
    pub(crate) output: usize,
}

/// A frozen forward operator: a value table layout, the constants
/// captured during tracing, and the instruction list.
pub struct GraphFunction {
    n_inputs: usize,
    n_values: usize,
    instructions: Vec<Instruction>,
    constants: Vec<(usize, Tensor)>,
    output_ids: Vec<usize>,
}

impl GraphFunction {
    pub(crate) fn new(
        n_inputs: usize,
        n_values: usize,
        instructions: Vec<Instruction>,
        constants: Vec<(usize, Tensor)>,
        output_ids: Vec<usize>,
    ) -> Self {
        GraphFunction {
            n_inputs,
            n_values,
            instructions,
            constants,
            output_ids,
        }
    }

    /// Number of recorded instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Replays the graph on a fresh input stack.
    pub fn run(&self, stack: Vec<Tensor>) -> Result<Vec<Tensor>> {
        if stack.len() != self.n_inputs {
            return Err(MateriaError::trace(format!(
                "graph replay expects {} inputs, got {}",
                self.n_inputs,
                stack.len()
            )));
        }

        let mut values: Vec<Option<Tensor>> = vec![None; self.n_values];
        for (id, t) in stack.into_iter().enumerate() {
            values[id] = Some(t);
        }
        for (id, t) in &self.constants {
            values[*id] = Some(t.clone());
        }

        for instruction in &self.instructions {
            let mut inputs = Vec::with_capacity(instruction.inputs.len());
            for id in &instruction.inputs {
                inputs.push(values[*id].as_ref().ok_or_else(|| {
                    MateriaError::trace(format!(
                        "graph replay read an unset value slot {}",
                        id
                    ))
                })?);
            }
            let out = eval(&instruction.op, &inputs)?;
            values[instruction.output] = Some(out);
        }

        let mut outputs = Vec::with_capacity(self.output_ids.len());
        for id in &self.output_ids {
            outputs.push(values[*id].clone().ok_or_else(|| {
                MateriaError::trace(format!("graph replay output slot {} is unset", id))
            })?);
        }
        Ok(outputs)
    }
}
