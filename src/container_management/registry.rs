//! Table of backend kinds, built once at start-up and handed to the controller.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::container_management::director::Director;
use crate::container_management::{forward, passthrough, sandboxed, stub};
use crate::error_handling::types::DirectorError;
use crate::event::Channel;

pub type DirectorConstructor = fn(DirectorOptions) -> Result<Director, DirectorError>;

pub const DUMMY_KIND: &str = "dummy";

/// Everything a constructor needs to build a director.
#[derive(Clone)]
pub struct DirectorOptions {
    /// Name of the `[directors.NAME]` table.
    pub name: String,
    pub kind: String,
    pub template: String,
    /// Backend specific keys, decoded by the constructor.
    pub settings: toml::Table,
    pub channel: Arc<dyn Channel>,
}

impl DirectorOptions {
    pub fn new(name: &str, kind: &str, template: &str, channel: Arc<dyn Channel>) -> Self {
        DirectorOptions {
            name: name.to_string(),
            kind: kind.to_string(),
            template: template.to_string(),
            settings: toml::Table::new(),
            channel,
        }
    }

    pub fn with_settings(mut self, settings: toml::Table) -> Self {
        self.settings = settings;
        self
    }

    /// Decodes the backend specific settings into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DirectorError> {
        toml::Value::Table(self.settings.clone())
            .try_into()
            .map_err(|e| DirectorError::InvalidConfig(format!("director {}: {}", self.name, e)))
    }
}

pub struct DirectorRegistry {
    ctors: HashMap<String, DirectorConstructor>,
}

impl DirectorRegistry {
    /// Empty registry, only the dummy fallback is known.
    pub fn new() -> Self {
        let mut registry = DirectorRegistry {
            ctors: HashMap::new(),
        };
        registry.register(DUMMY_KIND, stub::new_dummy);
        registry
    }

    /// Registry holding every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("forward", forward::new_director);
        registry.register("sandboxed", sandboxed::new_director);
        registry.register("passthrough", passthrough::new_director);
        registry.register("vm-stub", stub::new_director);
        registry
    }

    /// Last registration for a kind wins.
    pub fn register(&mut self, kind: &str, ctor: DirectorConstructor) {
        if self.ctors.insert(kind.to_string(), ctor).is_some() {
            debug!("Director kind {} re-registered", kind);
        }
    }

    pub fn get(&self, kind: &str) -> Option<DirectorConstructor> {
        self.ctors.get(kind).copied()
    }

    /// Like [`DirectorRegistry::get`], degrading to the inert dummy backend.
    pub fn lookup(&self, kind: &str) -> DirectorConstructor {
        match self.get(kind) {
            Some(ctor) => ctor,
            None => {
                warn!("Unknown director kind {}, falling back to {}", kind, DUMMY_KIND);
                self.get(DUMMY_KIND).unwrap_or(stub::new_dummy)
            }
        }
    }

    pub fn build(&self, options: DirectorOptions) -> Result<Director, DirectorError> {
        (self.lookup(&options.kind))(options)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.ctors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for DirectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
