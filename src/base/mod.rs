//! `base` is the construction layer: option sets, the hierarchical
//! input-file parser, the model registry/factory, and the global
//! settings.

pub mod factory;
pub mod options;
pub mod parser;
pub mod settings;

pub use factory::{load_input, load_model, Factory, Registry};
pub use options::OptionSet;
pub use parser::InputFile;
pub use settings::{Dtype, Settings, TensorOptions};
