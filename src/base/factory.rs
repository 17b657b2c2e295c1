//! `factory` instantiates models from a parsed input file.
//!
//! The [`Registry`] maps stable type names to constructors; the
//! [`Factory`] resolves model names against the `[Models]` section and
//! guarantees that each requested model is created at most once per
//! load, so a model referenced from several places is shared.

use super::options::OptionSet;
use super::parser::{self, InputFile};
use super::settings::Settings;
use crate::errors::{MateriaError, Result};
use crate::model::{Model, ModelRef};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A model constructor: name, options, and the factory for resolving
/// registered and cross-referenced models.
pub type ModelCtor = fn(&str, &OptionSet, &mut Factory) -> Result<ModelRef>;

/// Maps stable type names to model constructors.
#[derive(Default)]
pub struct Registry {
    ctors: BTreeMap<String, ModelCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in model type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::models::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, type_name: &str, ctor: ModelCtor) {
        self.ctors.insert(type_name.to_string(), ctor);
    }

    pub fn get(&self, type_name: &str) -> Result<ModelCtor> {
        self.ctors.get(type_name).copied().ok_or_else(|| {
            MateriaError::setup(format!(
                "there is no registered model type named '{}'",
                type_name
            ))
        })
    }

    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.ctors.keys()
    }
}

/// Creates models from a parsed input file, at most once each.
pub struct Factory {
    input: InputFile,
    settings: Settings,
    registry: Registry,
    models: IndexMap<String, ModelRef>,
}

impl Factory {
    pub fn new(input: InputFile, registry: Registry) -> Result<Self> {
        let settings = Self::parse_settings(&input)?;
        Ok(Factory {
            input,
            settings,
            registry,
            models: IndexMap::new(),
        })
    }

    fn parse_settings(input: &InputFile) -> Result<Settings> {
        let mut settings = Settings::default();
        if let Some(section) = input.section("Settings") {
            settings.require_double_precision = section
                .options
                .get_bool_or("require_double_precision", true)?;
            settings.disable_jit = section.options.get_bool_or("disable_jit", false)?;
        }
        Ok(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The options of a model block in the input file.
    pub fn model_options(&self, name: &str) -> Result<OptionSet> {
        self.input.object_options("Models", name).cloned()
    }

    /// Gets (creating at most once) the model registered under `name`.
    pub fn get_model(&mut self, name: &str) -> Result<ModelRef> {
        if let Some(model) = self.models.get(name) {
            return Ok(model.clone());
        }

        let options = self.model_options(name)?;
        let type_name = options.get_str("type")?.to_string();
        let ctor = self.registry.get(&type_name)?;

        debug!(model = name, model_type = %type_name, "creating model");
        let model = ctor(name, &options, self)?;
        self.models.insert(name.to_string(), model.clone());

        model.borrow_mut().setup()?;
        model.borrow().diagnose()?;
        Ok(model)
    }
}

/// Loads an input file into a factory with the built-in registry.
pub fn load_input(path: impl AsRef<Path>) -> Result<Factory> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        MateriaError::io(format!("cannot read input file '{}': {}", path.display(), e))
    })?;
    let input = parser::parse(&text)?;
    Factory::new(input, Registry::with_builtins())
}

/// Convenience: loads an input file and gets one model from it.
pub fn load_model(path: impl AsRef<Path>, name: &str) -> Result<ModelRef> {
    load_input(path)?.get_model(name)
}
