//! `system` packages a model as a linear or nonlinear system of
//! equations for an external solver, including the Schur-complement
//! partitioned solve.

pub mod linear;
pub mod model_system;
pub mod nonlinear;
pub mod schur;

pub use linear::{LinearSystem, TensorList};
pub use model_system::ModelNonlinearSystem;
pub use nonlinear::NonlinearSystem;
pub use schur::SchurComplement;
