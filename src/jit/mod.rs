//! `jit` provides just-in-time capture and replay of model forward
//! operators.
//!
//! A model's forward operator is recorded once per *evaluation schema*
//! (see [`schema::EvaluationSchema`]) as a frozen instruction graph and
//! replayed on subsequent evaluations with matching inputs. Capture is
//! serialized globally because the tracer is not reentrant.

pub mod graph;
pub mod schema;
pub mod traceable;
pub mod tracer;

pub use graph::GraphFunction;
pub use schema::EvaluationSchema;
pub use traceable::{TraceableShape, TraceableSize};
