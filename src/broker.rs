//! The initialize-once broker wrapper.
//!
//! A [`LazyBroker`] is created cheaply, before any connection details are
//! known. Actors declared against it queue up; attribute writes land in a
//! local store. [`LazyBroker::initialize`] resolves the layered configuration,
//! constructs the real implementation through the registry, binds the queued
//! actors, and seals the handle. Further initializations are validated against
//! the stored configuration rather than repeated.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::actor::DeferredActor;
use crate::config::{Configuration, OptionMap, OptionValue};
use crate::error::BrokerError;
use crate::middleware::{ContextMiddleware, Middleware, MultipleOwnersWarning};
use crate::proxy::ProxyHandle;
use crate::registry::{BrokerRegistry, FactoryArgs, DEFAULT_CONFIG_PREFIX};
use crate::resolve::{is_all_uppercase, resolve};
use crate::stub::StubBroker;
use crate::{Broker, Handler, OwnerContext};

/// Handler option names claimed by the broker machinery itself.
const RESERVED_ACTOR_OPTIONS: &[&str] = &["broker", "actor_class"];

pub struct LazyBroker {
    registry: Arc<BrokerRegistry>,
    config_prefix: String,
    class_default: Option<String>,
    constructor_options: OptionMap,
    constructor_middleware: Vec<Arc<dyn Middleware>>,

    handle: ProxyHandle,
    /// Answers structural queries (actor options) until the handle is sealed.
    placeholder: Arc<StubBroker>,
    /// Middleware added after construction but before initialization; carried
    /// onto the real implementation at seal time.
    extra_middleware: Mutex<Vec<Arc<dyn Middleware>>>,
    /// `Some` until initialization drains it; `None` means actors bind
    /// directly to the backing implementation.
    pending: Mutex<Option<Vec<Arc<DeferredActor>>>>,

    init_lock: Mutex<()>,
    resolved: Mutex<Option<Configuration>>,
    owners: Mutex<Vec<Arc<dyn OwnerContext>>>,
    owner_warned: AtomicBool,
    released: AtomicBool,
}

impl LazyBroker {
    pub fn builder(registry: Arc<BrokerRegistry>) -> BrokerBuilder {
        BrokerBuilder {
            registry,
            config_prefix: DEFAULT_CONFIG_PREFIX.to_string(),
            class_default: None,
            constructor_options: OptionMap::new(),
            constructor_middleware: Vec::new(),
            owner: None,
        }
    }

    pub fn config_prefix(&self) -> &str {
        &self.config_prefix
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_sealed()
    }

    /// The sealed implementation, once one exists.
    pub fn implementation(&self) -> Result<Arc<dyn Broker>, BrokerError> {
        self.handle.backing()
    }

    /// The resolved configuration stored by the first initialization.
    pub fn configuration(&self) -> Option<Configuration> {
        self.resolved.lock().unwrap().clone()
    }

    /// Resolve configuration and construct the real broker, exactly once.
    ///
    /// A second call with settings that resolve to the same configuration is
    /// accepted; a differing one fails with
    /// [`BrokerError::Reconfiguration`] and leaves the broker untouched. When
    /// the accepted repeat call comes from a different owning context, a
    /// one-time warning middleware is installed.
    pub fn initialize(
        self: &Arc<Self>,
        owner: &Arc<dyn OwnerContext>,
    ) -> Result<(), BrokerError> {
        let settings = owner.settings();
        // Resolution failures must not leave partial state behind, so resolve
        // before taking the lock or touching anything.
        let resolved = resolve(
            &self.registry,
            &self.config_prefix,
            self.class_default.as_deref(),
            &self.constructor_options,
            &settings,
        )?;

        let _guard = self.init_lock.lock().unwrap();

        if self.handle.is_sealed() {
            let stored = self.resolved.lock().unwrap().clone();
            if stored.as_ref() != Some(&resolved.configuration) {
                return Err(BrokerError::reconfiguration(owner.name()));
            }
            self.note_additional_owner(owner)?;
        } else {
            let class = self
                .registry
                .get_class(&resolved.configuration.class)
                .ok_or_else(|| {
                    BrokerError::invalid_class(
                        format!("{}_CLASS", self.config_prefix),
                        resolved.configuration.class.clone(),
                    )
                })?;

            let implementation = class.construct(FactoryArgs {
                options: resolved.configuration.options.clone(),
                middleware: self.constructor_middleware.clone(),
            })?;

            implementation
                .add_middleware(Arc::new(ContextMiddleware::new(owner.clone())));
            // Copied, not drained: a failed attempt further down must leave
            // the contributions available for the next attempt.
            for mw in self.extra_middleware.lock().unwrap().iter() {
                implementation.add_middleware(mw.clone());
            }

            // The queue must survive a failed attempt intact, so every queued
            // actor is validated against the real schema before any bind, and
            // the queue is drained only after the seal. Holding the queue lock
            // across bind and seal also keeps concurrent declarations out of
            // the window where the queue is gone but the handle not yet sealed.
            let mut pending = self.pending.lock().unwrap();
            if let Some(queue) = pending.as_ref() {
                let recognized = implementation.actor_options();
                for actor in queue {
                    for key in actor.options().keys() {
                        if !recognized.contains(key) {
                            return Err(BrokerError::UnknownActorOption(key.clone()));
                        }
                    }
                }
                // Declaration order is preserved: actors bind in the order
                // they were queued.
                for actor in queue {
                    actor.bind_to(&implementation)?;
                }
            }

            self.placeholder.close();
            self.handle.seal(implementation)?;
            let bound = pending.take().map_or(0, |queue| queue.len());
            drop(pending);
            self.extra_middleware.lock().unwrap().clear();
            *self.resolved.lock().unwrap() = Some(resolved.configuration.clone());
            self.owners.lock().unwrap().push(owner.clone());

            tracing::info!(
                prefix = %self.config_prefix,
                class = %resolved.configuration.class,
                actors = bound,
                "broker initialized"
            );
        }

        owner.register_extension(&self.config_prefix.to_lowercase(), self.clone());
        Ok(())
    }

    fn note_additional_owner(
        self: &Arc<Self>,
        owner: &Arc<dyn OwnerContext>,
    ) -> Result<(), BrokerError> {
        let mut owners = self.owners.lock().unwrap();
        if owners.iter().any(|known| Arc::ptr_eq(known, owner)) {
            return Ok(());
        }
        owners.push(owner.clone());
        if !self.owner_warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                prefix = %self.config_prefix,
                "broker initialized by more than one owning context"
            );
            self.handle
                .backing()?
                .add_middleware(Arc::new(MultipleOwnersWarning));
        }
        Ok(())
    }

    /// Declare an actor. Before initialization it is queued for binding;
    /// afterwards it binds immediately. Either way it is locally invokable
    /// from the moment this returns.
    pub fn declare_actor(
        &self,
        name: &str,
        handler: Handler,
        options: OptionMap,
    ) -> Result<Arc<DeferredActor>, BrokerError> {
        for key in options.keys() {
            if RESERVED_ACTOR_OPTIONS.contains(&key.as_str()) {
                return Err(BrokerError::ReservedActorOption(key.clone()));
            }
        }
        let recognized = self.actor_options();
        for key in options.keys() {
            if !recognized.contains(key) {
                return Err(BrokerError::UnknownActorOption(key.clone()));
            }
        }

        let actor = DeferredActor::new(name, handler, options);
        let mut pending = self.pending.lock().unwrap();
        match pending.as_mut() {
            Some(queue) => queue.push(actor.clone()),
            None => actor.bind_to(&self.handle.backing()?)?,
        }
        Ok(actor)
    }

    /// Option names handlers may declare, middleware contributions included.
    /// Served by the placeholder until the real implementation exists.
    pub fn actor_options(&self) -> BTreeSet<String> {
        match self.handle.backing() {
            Ok(implementation) => implementation.actor_options(),
            Err(_) => self.placeholder.actor_options(),
        }
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        match self.handle.backing() {
            Ok(implementation) => implementation.add_middleware(middleware),
            Err(_) => {
                self.placeholder.add_middleware(middleware.clone());
                self.extra_middleware.lock().unwrap().push(middleware);
            }
        }
    }

    pub fn read_attr(&self, name: &str) -> Result<OptionValue, BrokerError> {
        self.handle.read(name)
    }

    pub fn write_attr(&self, name: &str, value: OptionValue) {
        self.handle.write(name, value);
    }

    /// Release the prefix reservation and close the implementation if one was
    /// built. Safe to call more than once.
    pub fn close(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.registry.release_prefix(&self.config_prefix);
        }
        match self.handle.backing() {
            Ok(implementation) => implementation.close(),
            Err(_) => self.placeholder.close(),
        }
    }
}

impl fmt::Debug for LazyBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBroker")
            .field("config_prefix", &self.config_prefix)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

pub struct BrokerBuilder {
    registry: Arc<BrokerRegistry>,
    config_prefix: String,
    class_default: Option<String>,
    constructor_options: OptionMap,
    constructor_middleware: Vec<Arc<dyn Middleware>>,
    owner: Option<Arc<dyn OwnerContext>>,
}

impl BrokerBuilder {
    /// Namespace for external settings. Must be entirely uppercase.
    pub fn config_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_prefix = prefix.into();
        self
    }

    /// Pin the broker to a concrete registered class. Without this the broker
    /// is dynamically typed and the class comes from configuration alone.
    pub fn class(mut self, name: impl Into<String>) -> Self {
        self.class_default = Some(name.into());
        self
    }

    /// Code-level constructor option, overridable by external settings.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.constructor_options.insert(key.into(), value.into());
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.constructor_middleware.push(middleware);
        self
    }

    /// Initialize immediately from this owning context once built.
    pub fn owner(mut self, owner: Arc<dyn OwnerContext>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn build(self) -> Result<Arc<LazyBroker>, BrokerError> {
        if !is_all_uppercase(&self.config_prefix) {
            return Err(BrokerError::InvalidConfigPrefix(self.config_prefix));
        }
        if let Some(name) = &self.class_default {
            if !self.registry.contains_class(name) {
                return Err(BrokerError::invalid_class("class", name.clone()));
            }
        }
        self.registry.reserve_prefix(&self.config_prefix)?;

        let placeholder = StubBroker::new(self.constructor_middleware.clone());
        let broker = Arc::new(LazyBroker {
            registry: self.registry,
            config_prefix: self.config_prefix,
            class_default: self.class_default,
            constructor_options: self.constructor_options,
            constructor_middleware: self.constructor_middleware,
            handle: ProxyHandle::new(),
            placeholder,
            extra_middleware: Mutex::new(Vec::new()),
            pending: Mutex::new(Some(Vec::new())),
            init_lock: Mutex::new(()),
            resolved: Mutex::new(None),
            owners: Mutex::new(Vec::new()),
            owner_warned: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });

        if let Some(owner) = self.owner {
            broker.initialize(&owner)?;
        }
        Ok(broker)
    }
}
