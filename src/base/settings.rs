//! `settings` holds the global knobs consulted at model construction
//! and evaluation.

use crate::errors::{MateriaError, Result};
use std::fmt;

/// Element scalar type. The numerical backend of this crate computes in
/// double precision; the enum exists for the precision policy check and
/// the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Float64,
    Float32,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::Float64 => write!(f, "Float64"),
            Dtype::Float32 => write!(f, "Float32"),
        }
    }
}

/// Target options for sending a model graph to a device/dtype.
#[derive(Debug, Clone, Copy)]
pub struct TensorOptions {
    pub dtype: Dtype,
}

impl Default for TensorOptions {
    fn default() -> Self {
        TensorOptions {
            dtype: Dtype::Float64,
        }
    }
}

impl TensorOptions {
    pub fn check_supported(&self) -> Result<()> {
        if self.dtype != Dtype::Float64 {
            return Err(MateriaError::unsupported(format!(
                "this build computes on the CPU in double precision; cannot send models to {}",
                self.dtype
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether evaluation requires the default dtype to be double
    /// precision.
    pub require_double_precision: bool,
    /// The default dtype new tensors are created with.
    pub default_dtype: Dtype,
    /// Globally disables graph capture.
    pub disable_jit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            require_double_precision: true,
            default_dtype: Dtype::Float64,
            disable_jit: false,
        }
    }
}

impl Settings {
    pub fn check_precision(&self) -> Result<()> {
        if self.require_double_precision && self.default_dtype != Dtype::Float64 {
            return Err(MateriaError::precision(format!(
                "double precision is required for all computations, but the default dtype is \
                 {}; either set the default dtype to Float64 or disable this check with \
                 require_double_precision = false",
                self.default_dtype
            )));
        }
        Ok(())
    }

    /// The dispatch key entering the evaluation schema.
    pub fn dispatch_key(&self) -> String {
        format!("cpu/{}", self.default_dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_policy() {
        assert!(Settings::default().check_precision().is_ok());

        let strict_f32 = Settings {
            default_dtype: Dtype::Float32,
            ..Settings::default()
        };
        assert!(strict_f32.check_precision().is_err());

        let relaxed = Settings {
            default_dtype: Dtype::Float32,
            require_double_precision: false,
            ..Settings::default()
        };
        assert!(relaxed.check_precision().is_ok());
    }
}
