//! The owning-context collaborator boundary.
//!
//! A broker is initialized against an owning context (typically an application
//! instance) that supplies externally configured settings and exposes an
//! extension slot the broker registers itself into. [`AppContext`] is the
//! in-crate reference implementation, sufficient for embedding and tests.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::broker::LazyBroker;
use crate::config::{settings_from_file, settings_from_toml, OptionValue, SettingsMap};
use crate::error::BrokerError;

pub trait OwnerContext: Send + Sync + Debug {
    /// Stable display name, used in error and warning text.
    fn name(&self) -> &str;

    /// Snapshot of the externally supplied settings.
    fn settings(&self) -> SettingsMap;

    /// Record a broker under this context's extension registry, keyed by the
    /// broker's lower-cased config prefix.
    fn register_extension(&self, key: &str, broker: Arc<LazyBroker>);

    fn extension(&self, key: &str) -> Option<Arc<LazyBroker>>;
}

/// Reference owning-context implementation: a named settings map plus an
/// extension registry.
#[derive(Debug)]
pub struct AppContext {
    name: String,
    settings: RwLock<SettingsMap>,
    extensions: RwLock<BTreeMap<String, Arc<LazyBroker>>>,
}

impl AppContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: RwLock::new(SettingsMap::new()),
            extensions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.settings
            .write()
            .unwrap()
            .insert(key.into(), value.into());
    }

    /// Record a setting carrying the reserved missing sentinel: treated as
    /// absent during resolution, never overriding a code-level default.
    pub fn set_missing(&self, key: impl Into<String>) {
        self.settings
            .write()
            .unwrap()
            .insert(key.into(), OptionValue::Missing);
    }

    /// Merge settings parsed from a TOML string into this context.
    pub fn load_toml(&self, toml_str: &str) -> Result<(), BrokerError> {
        let parsed = settings_from_toml(toml_str)?;
        self.settings.write().unwrap().extend(parsed);
        Ok(())
    }

    /// Merge settings parsed from a TOML file into this context.
    pub fn load_file(&self, path: &Path) -> Result<(), BrokerError> {
        let parsed = settings_from_file(path)?;
        self.settings.write().unwrap().extend(parsed);
        Ok(())
    }
}

impl OwnerContext for AppContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> SettingsMap {
        self.settings.read().unwrap().clone()
    }

    fn register_extension(&self, key: &str, broker: Arc<LazyBroker>) {
        self.extensions
            .write()
            .unwrap()
            .insert(key.to_string(), broker);
    }

    fn extension(&self, key: &str) -> Option<Arc<LazyBroker>> {
        self.extensions.read().unwrap().get(key).cloned()
    }
}
