//! `tracer` records the forward operator of a model as a frozen graph
//! of tensor operations.
//!
//! Tracing works by interception: while a trace is active on the current
//! thread, every dispatched tensor operation appends an instruction to
//! the open graph. Tensors are identified by their storage; a tensor the
//! tracer has never seen (a literal created inside the forward operator)
//! is captured as a constant.
//!
//! The tracer is not reentrant, and capture is serialized globally by
//! the tracing mutex: all other models in the world wait for the current
//! model to finish tracing.

use super::graph::{GraphFunction, Instruction};
use crate::errors::{MateriaError, Result};
use crate::tensor::op::Op;
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

static TRACE_MUTEX: Mutex<()> = Mutex::new(());

struct TracerState {
    instructions: Vec<Instruction>,
    constants: Vec<(usize, Tensor)>,
    value_ids: HashMap<usize, usize>,
    next_id: usize,
    // Registered tensors are kept alive for the duration of the trace
    // so storage addresses stay unique.
    keep_alive: Vec<Tensor>,
}

thread_local! {
    static TRACER: RefCell<Option<TracerState>> = RefCell::new(None);
}

/// Whether a trace is being captured on the current thread.
pub fn is_tracing() -> bool {
    TRACER.with(|t| t.borrow().is_some())
}

impl TracerState {
    fn id_of(&mut self, t: &Tensor) -> usize {
        let ptr = t.storage_ptr() as usize;
        if let Some(id) = self.value_ids.get(&ptr) {
            return *id;
        }
        // First sighting: capture as a constant.
        let id = self.next_id;
        self.next_id += 1;
        self.value_ids.insert(ptr, id);
        self.constants.push((id, t.detach()));
        self.keep_alive.push(t.clone());
        id
    }

    fn register_output(&mut self, t: &Tensor) -> usize {
        let ptr = t.storage_ptr() as usize;
        let id = self.next_id;
        self.next_id += 1;
        self.value_ids.insert(ptr, id);
        self.keep_alive.push(t.clone());
        id
    }
}

/// Records one dispatched operation into the active trace, if any.
pub(crate) fn record(op: &Op, inputs: &[&Tensor], output: &Tensor) {
    TRACER.with(|tracer| {
        let mut tracer = tracer.borrow_mut();
        let state = match tracer.as_mut() {
            Some(state) => state,
            None => return,
        };
        let input_ids: Vec<usize> = inputs.iter().map(|t| state.id_of(t)).collect();
        let output_id = state.register_output(output);
        state.instructions.push(Instruction {
            op: op.clone(),
            inputs: input_ids,
            output: output_id,
        });
    });
}

/// Clears the tracer on scope exit, so a failed capture does not leave
/// the thread in tracing mode.
struct TracerGuard;

impl Drop for TracerGuard {
    fn drop(&mut self) {
        TRACER.with(|t| *t.borrow_mut() = None);
    }
}

/// Captures the graph of `f` evaluated on `inputs`.
///
/// The input stack order is the replay order: the returned graph reads
/// its inputs positionally. The closure's outputs define the output
/// order of the graph.
pub fn trace<F>(inputs: &[Tensor], f: F) -> Result<GraphFunction>
where
    F: FnOnce() -> Result<Vec<Tensor>>,
{
    let _lock = TRACE_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    if is_tracing() {
        return Err(MateriaError::trace(
            "the tracer is not reentrant: a trace is already being captured on this thread",
        ));
    }

    let mut state = TracerState {
        instructions: Vec::new(),
        constants: Vec::new(),
        value_ids: HashMap::new(),
        next_id: 0,
        keep_alive: Vec::new(),
    };
    for t in inputs {
        let id = state.next_id;
        state.next_id += 1;
        state.value_ids.insert(t.storage_ptr() as usize, id);
        state.keep_alive.push(t.clone());
    }

    TRACER.with(|t| *t.borrow_mut() = Some(state));
    let _guard = TracerGuard;

    let outputs = f().map_err(|e| {
        MateriaError::trace(format!("graph capture failed: {}", e))
    })?;

    let state = TRACER
        .with(|t| t.borrow_mut().take())
        .ok_or_else(|| MateriaError::trace("the tracer vanished during capture"))?;

    // Outputs must be values the tracer has seen; an output that no
    // operation produced (a passthrough or a constant) is looked up or
    // captured here.
    let mut state = state;
    let output_ids: Vec<usize> = outputs.iter().map(|t| state.id_of(t)).collect();

    Ok(GraphFunction::new(
        inputs.len(),
        state.next_id,
        state.instructions,
        state.constants,
        output_ids,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_and_replay() {
        let x = Tensor::from_data(vec![1.0, 2.0], &[2], &[], &[]).unwrap();
        let offset = Tensor::scalar(0.5);

        let inputs = vec![x.clone()];
        let graph = trace(&inputs, || {
            let y = inputs[0].mul_scalar(2.0).add(&offset)?;
            Ok(vec![y])
        })
        .unwrap();

        // Replay on fresh inputs of a different batch size.
        let x2 = Tensor::from_data(vec![10.0, 20.0, 30.0], &[3], &[], &[]).unwrap();
        let out = graph.run(vec![x2]).unwrap();
        assert_eq!(out[0].data(), &[20.5, 40.5, 60.5]);
    }

    #[test]
    fn constants_are_captured() {
        let x = Tensor::from_data(vec![1.0], &[1], &[], &[]).unwrap();
        let inputs = vec![x.clone()];
        let graph = trace(&inputs, || {
            let c = Tensor::scalar(3.0);
            Ok(vec![inputs[0].add(&c)?])
        })
        .unwrap();

        let out = graph
            .run(vec![Tensor::from_data(vec![5.0], &[1], &[], &[]).unwrap()])
            .unwrap();
        assert_eq!(out[0].data(), &[8.0]);
    }

    #[test]
    fn not_tracing_by_default() {
        assert!(!is_tracing());
    }
}
