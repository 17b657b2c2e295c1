//! Error types shared by the whole crate.
//!
//! Every fallible public operation returns a `Result` with `MateriaError`.
//! The variants mirror the failure categories of the library: setup-time
//! misconfiguration, tensor shape violations, precision policy violations,
//! trace capture failures, numerical failures, unsupported solver
//! configurations, and I/O failures.

/// Errors raised by tensor operations, model setup and evaluation,
/// equation-system assembly, and input loading.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MateriaError {
    /// Duplicate declaration, missing referent, self-registration,
    /// invalid sub-axis placement. The model must not be used afterward.
    #[error("setup error: {message}")]
    SetupError { message: String },

    /// Base-shape mismatch, non-broadcastable dynamic shapes, illegal
    /// sum-to-size target, assembly-format inconsistency.
    #[error("shape error: {message}")]
    ShapeError { message: String },

    /// The default dtype is not double while the settings require it.
    #[error("precision error: {message}")]
    PrecisionError { message: String },

    /// Tracer failure during graph capture.
    #[error("trace error: {message}")]
    TraceError { message: String },

    /// Factor/solve failure or a non-finite value in a variable assignment.
    #[error("numerical error: {message}")]
    NumericalError { message: String },

    /// The solver received an unexpected group count, or a derivative is
    /// not defined for a requested pair.
    #[error("unsupported configuration: {message}")]
    UnsupportedConfiguration { message: String },

    /// Input file read/parse failure.
    #[error("io error: {message}")]
    IOError { message: String },
}

impl MateriaError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::SetupError {
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeError {
            message: message.into(),
        }
    }

    pub fn precision(message: impl Into<String>) -> Self {
        Self::PrecisionError {
            message: message.into(),
        }
    }

    pub fn trace(message: impl Into<String>) -> Self {
        Self::TraceError {
            message: message.into(),
        }
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::NumericalError {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::IOError {
            message: message.into(),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, MateriaError>;
