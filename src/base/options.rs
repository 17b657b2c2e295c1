//! `options` holds the user-supplied options a model is constructed
//! from.
//!
//! Option values are kept as raw strings, the way the hierarchical
//! input format provides them; typed accessors parse on demand and
//! report what they expected on failure.

use crate::errors::{MateriaError, Result};
use indexmap::IndexMap;

/// An ordered set of named options.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    entries: IndexMap<String, String>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_string(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// The raw string value of an option.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.entries.get(name).map(|s| s.as_str()).ok_or_else(|| {
            MateriaError::setup(format!("missing required option '{}'", name))
        })
    }

    pub fn get_str_or(&self, name: &str, default: &str) -> String {
        self.entries
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_real(&self, name: &str) -> Result<f64> {
        let raw = self.get_str(name)?;
        raw.parse().map_err(|_| {
            MateriaError::setup(format!(
                "option '{}' should be a real number, got '{}'",
                name, raw
            ))
        })
    }

    pub fn get_real_or(&self, name: &str, default: f64) -> Result<f64> {
        if self.contains(name) {
            self.get_real(name)
        } else {
            Ok(default)
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        let raw = self.get_str(name)?;
        raw.parse().map_err(|_| {
            MateriaError::setup(format!(
                "option '{}' should be an integer, got '{}'",
                name, raw
            ))
        })
    }

    pub fn get_int_or(&self, name: &str, default: i64) -> Result<i64> {
        if self.contains(name) {
            self.get_int(name)
        } else {
            Ok(default)
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        let raw = self.get_str(name)?;
        match raw {
            "true" | "on" | "yes" => Ok(true),
            "false" | "off" | "no" => Ok(false),
            _ => Err(MateriaError::setup(format!(
                "option '{}' should be a boolean, got '{}'",
                name, raw
            ))),
        }
    }

    pub fn get_bool_or(&self, name: &str, default: bool) -> Result<bool> {
        if self.contains(name) {
            self.get_bool(name)
        } else {
            Ok(default)
        }
    }

    /// A whitespace-separated list of real numbers.
    pub fn get_real_list(&self, name: &str) -> Result<Vec<f64>> {
        let raw = self.get_str(name)?;
        raw.split_whitespace()
            .map(|token| {
                token.parse().map_err(|_| {
                    MateriaError::setup(format!(
                        "option '{}' should be a list of real numbers, got '{}'",
                        name, raw
                    ))
                })
            })
            .collect()
    }

    /// A whitespace-separated list of strings.
    pub fn get_str_list(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .get_str(name)?
            .split_whitespace()
            .map(|s| s.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut options = OptionSet::new();
        options.set("E", "100.0");
        options.set("n", "3");
        options.set("jit", "false");
        options.set("values", "1.0 2.0 3.0");

        assert_eq!(options.get_real("E").unwrap(), 100.0);
        assert_eq!(options.get_int("n").unwrap(), 3);
        assert!(!options.get_bool("jit").unwrap());
        assert_eq!(options.get_real_list("values").unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(options.get_real("n").is_ok());
        assert!(options.get_real("jit").is_err());
        assert!(options.get_str("missing").is_err());
        assert_eq!(options.get_real_or("missing", 0.5).unwrap(), 0.5);
    }
}
