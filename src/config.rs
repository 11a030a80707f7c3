//! Configuration values and settings sources.
//!
//! Broker options are free-form key/value pairs: code-level defaults supplied at
//! construction time and externally supplied settings looked up under a broker's
//! config prefix. Both sides use the same [`OptionValue`] representation so the
//! resolver can compare them by value. Externally supplied settings can be
//! loaded from TOML files or strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// A single configuration value.
///
/// `Missing` is the reserved sentinel: a setting carrying it is treated as
/// absent and never overrides a code-level default. It is set through the API
/// (see [`crate::context::AppContext::set_missing`]); TOML input never produces
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    #[serde(skip)]
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<OptionValue>),
}

impl OptionValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, OptionValue::Missing)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl<T: Into<OptionValue>> From<Vec<T>> for OptionValue {
    fn from(value: Vec<T>) -> Self {
        OptionValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// Broker option map: lower-cased option name to value.
pub type OptionMap = BTreeMap<String, OptionValue>;

/// Externally supplied settings: uppercase setting key to value.
pub type SettingsMap = BTreeMap<String, OptionValue>;

/// Parse externally supplied settings from a TOML string.
///
/// Keys are kept verbatim; only uppercase keys under a broker's prefix are ever
/// consulted by the resolver.
pub fn settings_from_toml(toml_str: &str) -> Result<SettingsMap, BrokerError> {
    toml::from_str(toml_str)
        .map_err(|e| BrokerError::construction(format!("failed to parse settings TOML: {e}")))
}

/// Parse externally supplied settings from a TOML file.
pub fn settings_from_file(path: &Path) -> Result<SettingsMap, BrokerError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BrokerError::construction(format!(
            "failed to read settings file {}: {e}",
            path.display()
        ))
    })?;
    settings_from_toml(&content)
}

/// The final configuration produced by the resolver.
///
/// Compared by value: the seal-time re-initialization check relies on two
/// resolutions with identical inputs being equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Name of the registered broker class to instantiate.
    pub class: String,

    /// Broker-specific options, `url` included once defaulted.
    pub options: OptionMap,
}

impl Configuration {
    pub fn url(&self) -> Option<&str> {
        self.options.get("url").and_then(OptionValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_settings_toml() {
        let settings = settings_from_toml(
            r#"
            DRAMATIQ_BROKER_URL = "amqp://guest@localhost:5672"
            DRAMATIQ_BROKER_CLASS = "StubBroker"
            DRAMATIQ_BROKER_CONFIRM_DELIVERY = true
            DRAMATIQ_BROKER_PREFETCH = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            settings["DRAMATIQ_BROKER_URL"],
            OptionValue::from("amqp://guest@localhost:5672")
        );
        assert_eq!(settings["DRAMATIQ_BROKER_CLASS"], OptionValue::from("StubBroker"));
        assert_eq!(settings["DRAMATIQ_BROKER_CONFIRM_DELIVERY"], OptionValue::Bool(true));
        assert_eq!(settings["DRAMATIQ_BROKER_PREFETCH"], OptionValue::Int(10));
    }

    #[test]
    fn test_parse_settings_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "EVENTS_BROKER_URL = \"redis://localhost:6379/0\"").unwrap();

        let settings = settings_from_file(file.path()).unwrap();
        assert_eq!(
            settings["EVENTS_BROKER_URL"],
            OptionValue::from("redis://localhost:6379/0")
        );
    }

    #[test]
    fn test_parse_settings_invalid_toml() {
        let result = settings_from_toml("not = = toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_never_parses_from_toml() {
        let settings = settings_from_toml("SOME_KEY = \"value\"").unwrap();
        assert!(settings.values().all(|v| !v.is_missing()));
    }

    #[test]
    fn test_configuration_value_equality() {
        let mut options = OptionMap::new();
        options.insert("url".to_string(), OptionValue::from("amqp://127.0.0.1:5672"));

        let a = Configuration {
            class: "StubBroker".to_string(),
            options: options.clone(),
        };
        let b = Configuration {
            class: "StubBroker".to_string(),
            options,
        };
        assert_eq!(a, b);
        assert_eq!(a.url(), Some("amqp://127.0.0.1:5672"));

        let mut c = b.clone();
        c.options
            .insert("url".to_string(), OptionValue::from("amqp://other:5672"));
        assert_ne!(a, c);
    }
}
