//! The configuration-merge engine.
//!
//! Two layers feed the final configuration: *primary* options fixed in source
//! code (constructor options, plus the broker's concrete class when it was
//! created as a registered kind) and *secondary* options supplied externally
//! under the broker's config prefix. Secondary wins on conflict, with one audit
//! warning per overridden key; when secondary overrides the broker class
//! itself, primary collapses to `{class, middleware}` because its remaining
//! defaults were written for the original class and may not apply to the new
//! one.

use crate::config::{Configuration, OptionMap, OptionValue, SettingsMap};
use crate::error::{describe, BrokerError};
use crate::registry::{BrokerRegistry, DEFAULT_CLASS_NAME};

/// One audit record: an external setting overrode a code-level default.
/// Non-fatal; logged and returned for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideWarning {
    /// Fully qualified setting key, e.g. `EVENTS_BROKER_SOME_ARG`.
    pub setting: String,
    pub code_value: OptionValue,
    pub config_value: OptionValue,
}

/// Result of resolution: the value-comparable configuration plus the audit
/// trail. The audit list does not participate in the idempotence comparison.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub configuration: Configuration,
    pub overrides: Vec<OverrideWarning>,
}

/// `true` when `s` has at least one cased character and none lowercase, the
/// rule config prefixes and external setting keys are held to.
pub(crate) fn is_all_uppercase(s: &str) -> bool {
    let mut has_cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

/// Merge the configuration layers into a final [`Configuration`].
///
/// `class_default` is the broker's own concrete class name, present only when
/// the broker was created as a registered directly-instantiable kind; the
/// dynamically-typed broker contributes no class default. Calling twice with
/// identical inputs yields a value-equal configuration.
pub fn resolve(
    registry: &BrokerRegistry,
    config_prefix: &str,
    class_default: Option<&str>,
    constructor_options: &OptionMap,
    settings: &SettingsMap,
) -> Result<Resolved, BrokerError> {
    let primary = primary_options(registry, class_default, constructor_options);
    let secondary = secondary_options(config_prefix, settings);

    let (mut options, overrides) = merge_options(config_prefix, primary, &secondary);

    let class_name = match options.remove("class") {
        Some(OptionValue::Str(name)) => name,
        Some(other) => {
            return Err(BrokerError::invalid_class(
                format!("{config_prefix}_CLASS"),
                describe(&other),
            ))
        }
        None => DEFAULT_CLASS_NAME.to_string(),
    };

    let class = registry.get_class(&class_name).ok_or_else(|| {
        BrokerError::invalid_class(format!("{config_prefix}_CLASS"), class_name.clone())
    })?;

    if let Some(url) = class.default_url() {
        options
            .entry("url".to_string())
            .or_insert_with(|| OptionValue::from(url));
    }

    Ok(Resolved {
        configuration: Configuration {
            class: class_name,
            options,
        },
        overrides,
    })
}

fn primary_options(
    registry: &BrokerRegistry,
    class_default: Option<&str>,
    constructor_options: &OptionMap,
) -> OptionMap {
    let mut options = constructor_options.clone();
    options.remove("class");
    if let Some(name) = class_default {
        if registry.contains_class(name) {
            options.insert("class".to_string(), OptionValue::from(name));
        }
    }
    options
}

/// Every external setting under `{prefix}_`, stripped of the prefix and
/// lower-cased. Settings carrying the missing sentinel are dropped entirely so
/// they never override a code default.
fn secondary_options(config_prefix: &str, settings: &SettingsMap) -> OptionMap {
    let prefix = format!("{config_prefix}_");
    settings
        .iter()
        .filter(|(key, value)| {
            is_all_uppercase(key) && key.starts_with(&prefix) && !value.is_missing()
        })
        .map(|(key, value)| (key[prefix.len()..].to_lowercase(), value.clone()))
        .collect()
}

fn merge_options(
    config_prefix: &str,
    primary: OptionMap,
    secondary: &OptionMap,
) -> (OptionMap, Vec<OverrideWarning>) {
    let primary_class = primary.get("class");
    let secondary_class = secondary.get("class");
    let class_overridden = match (primary_class, secondary_class) {
        (Some(p), Some(s)) => p != s,
        _ => false,
    };

    let mut options: OptionMap = if class_overridden {
        // The remaining code-level defaults were written for the original
        // class; only the class itself and the middleware chain carry over.
        primary
            .into_iter()
            .filter(|(key, _)| key == "class" || key == "middleware")
            .collect()
    } else {
        primary
    };

    let mut overrides = Vec::new();
    for (key, code_value) in &options {
        if let Some(config_value) = secondary.get(key) {
            if config_value != code_value {
                let setting = format!("{config_prefix}_{}", key.to_uppercase());
                tracing::warn!(
                    "the configuration setting \"{}={}\" overrides the value fixed \
                     in the source code ({}); this could result in incorrect behavior",
                    setting,
                    describe(config_value),
                    describe(code_value),
                );
                overrides.push(OverrideWarning {
                    setting,
                    code_value: code_value.clone(),
                    config_value: config_value.clone(),
                });
            }
        }
    }

    for (key, value) in secondary {
        options.insert(key.clone(), value.clone());
    }
    (options, overrides)
}
