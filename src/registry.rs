//! Process-wide registries: config-prefix uniqueness ledger and broker-class table.
//!
//! Both live on one injectable [`BrokerRegistry`] object, constructed once per
//! process and passed to [`crate::LazyBroker`] constructors. Keeping the
//! registry explicit (rather than an implicit global) keeps tests isolable:
//! each test builds its own registry and tears it down by dropping it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::OptionMap;
use crate::error::BrokerError;
use crate::middleware::Middleware;
use crate::Broker;

/// Class instantiated when neither code nor external settings select one.
pub const DEFAULT_CLASS_NAME: &str = "RabbitmqBroker";

/// Default namespace for externally supplied broker settings.
pub const DEFAULT_CONFIG_PREFIX: &str = "DRAMATIQ_BROKER";

/// Reserved name of the dynamically configurable broker kind. It cannot be
/// registered: it represents "class chosen by external settings", not a class.
pub const DYNAMIC_CLASS_NAME: &str = "Broker";

/// Everything a broker factory receives: the resolved option map plus the
/// constructor-supplied middleware chain.
pub struct FactoryArgs {
    pub options: OptionMap,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

/// Factory callable producing a broker implementation from resolved options.
/// Fails with an implementation-defined error, surfaced unchanged to the caller
/// of `initialize`.
pub type BrokerFactory =
    Arc<dyn Fn(FactoryArgs) -> Result<Arc<dyn Broker>, BrokerError> + Send + Sync>;

/// A registered, directly-instantiable broker kind.
#[derive(Clone)]
pub struct BrokerClass {
    name: String,
    factory: BrokerFactory,
    default_url: Option<String>,
}

impl BrokerClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default connection URL filled into the resolved configuration when no
    /// `url` setting was supplied.
    pub fn default_url(&self) -> Option<&str> {
        self.default_url.as_deref()
    }

    pub fn construct(&self, args: FactoryArgs) -> Result<Arc<dyn Broker>, BrokerError> {
        (self.factory)(args)
    }
}

impl fmt::Debug for BrokerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClass")
            .field("name", &self.name)
            .field("default_url", &self.default_url)
            .finish_non_exhaustive()
    }
}

/// Injectable registry combining the prefix ledger and the class table.
pub struct BrokerRegistry {
    prefixes: Mutex<BTreeSet<String>>,
    classes: RwLock<BTreeMap<String, BrokerClass>>,
}

impl BrokerRegistry {
    /// Empty registry: no classes, no reserved prefixes.
    pub fn new() -> Self {
        Self {
            prefixes: Mutex::new(BTreeSet::new()),
            classes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry seeded with the built-in class table: the in-process
    /// `StubBroker` plus placeholder registrations for the optional transports.
    /// The optional kinds resolve and default their URLs normally; constructing
    /// one fails with [`BrokerError::ClassUnavailable`] because their client
    /// libraries are external collaborators of this crate.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry
            .register_class("StubBroker", crate::stub::StubBroker::factory(), None)
            .and_then(|_| {
                registry.register_unavailable(
                    "RabbitmqBroker",
                    Some("amqp://127.0.0.1:5672"),
                    "no AMQP client is linked into this process",
                )
            })
            .and_then(|_| {
                registry.register_unavailable(
                    "RedisBroker",
                    Some("redis://127.0.0.1:6379/0"),
                    "no Redis client is linked into this process",
                )
            })
            .unwrap_or_else(|e| unreachable!("built-in class table is valid: {e}"));
        registry
    }

    /// Register a directly-instantiable broker class.
    pub fn register_class(
        &self,
        name: &str,
        factory: BrokerFactory,
        default_url: Option<&str>,
    ) -> Result<(), BrokerError> {
        if name == DYNAMIC_CLASS_NAME {
            return Err(BrokerError::ReservedClassName(name.to_string()));
        }
        if let Some(url) = default_url {
            url::Url::parse(url).map_err(|e| BrokerError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        }
        let mut classes = self.classes.write().unwrap();
        if classes.contains_key(name) {
            return Err(BrokerError::ClassAlreadyRegistered(name.to_string()));
        }
        classes.insert(
            name.to_string(),
            BrokerClass {
                name: name.to_string(),
                factory,
                default_url: default_url.map(str::to_string),
            },
        );
        tracing::debug!("registered broker class \"{}\"", name);
        Ok(())
    }

    /// Register a broker class whose transport library is unavailable. The
    /// class participates in resolution like any other; the failure is deferred
    /// until someone actually tries to construct it, so unavailable optional
    /// kinds never break startup.
    pub fn register_unavailable(
        &self,
        name: &str,
        default_url: Option<&str>,
        reason: &str,
    ) -> Result<(), BrokerError> {
        let class = name.to_string();
        let reason = reason.to_string();
        let factory: BrokerFactory = Arc::new(move |_args| {
            Err(BrokerError::class_unavailable(class.clone(), reason.clone()))
        });
        self.register_class(name, factory, default_url)
    }

    pub fn contains_class(&self, name: &str) -> bool {
        self.classes.read().unwrap().contains_key(name)
    }

    pub fn get_class(&self, name: &str) -> Option<BrokerClass> {
        self.classes.read().unwrap().get(name).cloned()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.read().unwrap().keys().cloned().collect()
    }

    /// Reserve a config prefix for a broker being constructed. Mutual exclusion
    /// is provided by the ledger mutex: of two concurrent reservations of one
    /// prefix, exactly one succeeds.
    pub fn reserve_prefix(&self, prefix: &str) -> Result<(), BrokerError> {
        let mut prefixes = self.prefixes.lock().unwrap();
        if !prefixes.insert(prefix.to_string()) {
            return Err(BrokerError::DuplicatePrefix(prefix.to_string()));
        }
        Ok(())
    }

    /// Release a reserved prefix. No-op when the prefix is not reserved;
    /// callers release in teardown, the registry never does it implicitly.
    pub fn release_prefix(&self, prefix: &str) {
        self.prefixes.lock().unwrap().remove(prefix);
    }

    pub fn is_prefix_reserved(&self, prefix: &str) -> bool {
        self.prefixes.lock().unwrap().contains(prefix)
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerRegistry")
            .field("classes", &self.class_names())
            .field("prefixes", &*self.prefixes.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_builtin_class_table() {
        let registry = BrokerRegistry::with_builtin();
        assert!(registry.contains_class("StubBroker"));
        assert!(registry.contains_class("RabbitmqBroker"));
        assert!(registry.contains_class("RedisBroker"));
        assert!(!registry.contains_class(DYNAMIC_CLASS_NAME));

        let rabbit = registry.get_class("RabbitmqBroker").unwrap();
        assert_eq!(rabbit.default_url(), Some("amqp://127.0.0.1:5672"));
    }

    #[test]
    fn test_duplicate_class_registration_fails() {
        let registry = BrokerRegistry::with_builtin();
        let result = registry.register_unavailable("StubBroker", None, "duplicate");
        assert!(matches!(result, Err(BrokerError::ClassAlreadyRegistered(_))));
    }

    #[test]
    fn test_reserved_dynamic_name_rejected() {
        let registry = BrokerRegistry::new();
        let result = registry.register_unavailable(DYNAMIC_CLASS_NAME, None, "reserved");
        assert!(matches!(result, Err(BrokerError::ReservedClassName(_))));
    }

    #[test]
    fn test_invalid_default_url_rejected() {
        let registry = BrokerRegistry::new();
        let result = registry.register_unavailable("BadBroker", Some("not a url"), "n/a");
        assert!(matches!(result, Err(BrokerError::InvalidUrl { .. })));
    }

    #[test]
    fn test_unavailable_class_fails_at_construction_only() {
        let registry = BrokerRegistry::with_builtin();
        // Lookup succeeds; the failure is deferred to construction.
        let class = registry.get_class("RedisBroker").unwrap();
        let result = class.construct(FactoryArgs {
            options: OptionMap::new(),
            middleware: Vec::new(),
        });
        assert!(matches!(result, Err(BrokerError::ClassUnavailable { .. })));
    }

    #[test]
    fn test_prefix_reserve_release_cycle() {
        let registry = BrokerRegistry::new();
        registry.reserve_prefix("EVENTS_BROKER").unwrap();
        assert!(registry.is_prefix_reserved("EVENTS_BROKER"));

        let second = registry.reserve_prefix("EVENTS_BROKER");
        assert!(matches!(second, Err(BrokerError::DuplicatePrefix(_))));

        registry.release_prefix("EVENTS_BROKER");
        assert!(!registry.is_prefix_reserved("EVENTS_BROKER"));
        registry.reserve_prefix("EVENTS_BROKER").unwrap();

        // Releasing an unknown prefix is a no-op.
        registry.release_prefix("NEVER_RESERVED");
    }

    #[test]
    fn test_concurrent_prefix_reservation_single_winner() {
        let registry = Arc::new(BrokerRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.reserve_prefix("SHARED_PREFIX").is_ok())
            })
            .collect();

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
