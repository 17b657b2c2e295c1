//! `name` defines variable names: dotted paths whose first segment is a
//! recognized sub-axis.

use crate::errors::{MateriaError, Result};
use std::fmt;

pub const STATE: &str = "state";
pub const OLD_STATE: &str = "old_state";
pub const FORCES: &str = "forces";
pub const OLD_FORCES: &str = "old_forces";
pub const RESIDUAL: &str = "residual";
pub const PARAMETERS: &str = "parameters";

/// A fully qualified variable name, e.g. `state.internal.Ee`.
///
/// Serialized forms accept both `.` and `/` as separators; the
/// in-memory form uses `.`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct VariableName {
    path: Vec<String>,
}

impl VariableName {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VariableName {
            path: segments.into_iter().map(|s| s.into()).collect(),
        }
    }

    /// Parses a serialized name, normalizing `/` separators.
    pub fn parse(raw: &str) -> Self {
        VariableName {
            path: raw
                .split(|c| c == '.' || c == '/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// The first path segment, i.e. the sub-axis the variable lives on.
    pub fn subaxis(&self) -> Option<&str> {
        self.path.first().map(|s| s.as_str())
    }

    /// The name without its first segment.
    pub fn without_subaxis(&self) -> VariableName {
        VariableName {
            path: self.path.iter().skip(1).cloned().collect(),
        }
    }

    /// The name with its first segment replaced.
    pub fn remount(&self, subaxis: &str) -> VariableName {
        let mut path = vec![subaxis.to_string()];
        path.extend(self.path.iter().skip(1).cloned());
        VariableName { path }
    }

    /// The name with a segment appended.
    pub fn with_suffix(&self, suffix: &str) -> VariableName {
        let mut path = self.path.clone();
        path.push(suffix.to_string());
        VariableName { path }
    }

    pub fn is_state(&self) -> bool {
        self.subaxis() == Some(STATE)
    }

    pub fn is_old_state(&self) -> bool {
        self.subaxis() == Some(OLD_STATE)
    }

    pub fn is_force(&self) -> bool {
        self.subaxis() == Some(FORCES)
    }

    pub fn is_old_force(&self) -> bool {
        self.subaxis() == Some(OLD_FORCES)
    }

    pub fn is_residual(&self) -> bool {
        self.subaxis() == Some(RESIDUAL)
    }

    pub fn is_parameter(&self) -> bool {
        self.subaxis() == Some(PARAMETERS)
    }

    /// Whether derivatives with respect to this variable matter while a
    /// nonlinear system is being assembled.
    pub fn is_solve_dependent(&self) -> bool {
        self.is_state() || self.is_residual() || self.is_parameter()
    }

    /// The old-step counterpart of a `state`/`forces` variable.
    pub fn old(&self) -> Result<VariableName> {
        match self.subaxis() {
            Some(STATE) => Ok(self.remount(OLD_STATE)),
            Some(FORCES) => Ok(self.remount(OLD_FORCES)),
            _ => Err(MateriaError::setup(format!(
                "variable '{}' has no old-step counterpart",
                self
            ))),
        }
    }

    /// The current-step counterpart of an `old_state`/`old_forces`
    /// variable.
    pub fn current(&self) -> Result<VariableName> {
        match self.subaxis() {
            Some(OLD_STATE) => Ok(self.remount(STATE)),
            Some(OLD_FORCES) => Ok(self.remount(FORCES)),
            _ => Err(MateriaError::setup(format!(
                "variable '{}' has no current-step counterpart",
                self
            ))),
        }
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join("."))
    }
}

impl From<&str> for VariableName {
    fn from(raw: &str) -> Self {
        VariableName::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let name = VariableName::parse("state/internal/Ee");
        assert_eq!(name.to_string(), "state.internal.Ee");
        assert_eq!(name, VariableName::parse("state.internal.Ee"));
        assert_eq!(name.segments().len(), 3);
    }

    #[test]
    fn subaxis_predicates() {
        assert!(VariableName::parse("state.foo").is_state());
        assert!(VariableName::parse("old_state.foo").is_old_state());
        assert!(VariableName::parse("forces.t").is_force());
        assert!(VariableName::parse("residual.foo").is_residual());
        assert!(VariableName::parse("parameters.E").is_parameter());
        assert!(!VariableName::parse("forces.t").is_solve_dependent());
        assert!(VariableName::parse("state.foo").is_solve_dependent());
    }

    #[test]
    fn old_current_mapping() {
        let name = VariableName::parse("state.foo");
        assert_eq!(name.old().unwrap(), VariableName::parse("old_state.foo"));
        assert_eq!(
            name.old().unwrap().current().unwrap(),
            VariableName::parse("state.foo")
        );
        assert!(VariableName::parse("residual.foo").old().is_err());
    }
}
