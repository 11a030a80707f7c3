//! Deferred-construction broker proxy with layered configuration merging.
//!
//! Applications can declare a message broker and register actors against it
//! before the information needed to construct the real client (connection URL,
//! credentials, broker kind) is available. Construction is deferred until an
//! explicit initialization step: configuration is assembled from code-level
//! defaults and externally supplied settings with defined precedence, the real
//! implementation is built, queued actor declarations are bound to it, and the
//! broker handle is sealed.
//!
//! ## Key pieces
//!
//! - [`LazyBroker`]: the initialize-once broker wrapper applications instantiate
//! - [`ProxyHandle`]: stable identity over a not-yet-built implementation
//! - [`DeferredActor`]: a handler that is locally invokable until bound
//! - [`BrokerRegistry`]: injectable prefix ledger and broker-class table
//! - [`resolve`]: the configuration-merge engine
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lazy_broker::{AppContext, BrokerRegistry, LazyBroker, OptionValue, OwnerContext};
//!
//! let registry = Arc::new(BrokerRegistry::with_builtin());
//! let broker = LazyBroker::builder(registry)
//!     .config_prefix("EVENTS_BROKER")
//!     .class("StubBroker")
//!     .build()?;
//!
//! // Declared before initialization: queued until the real broker exists.
//! let task = broker.declare_actor("send_welcome_email", Arc::new(|_args| {
//!     Ok(OptionValue::Bool(true))
//! }), Default::default())?;
//!
//! let app: Arc<dyn OwnerContext> = Arc::new(AppContext::new("app"));
//! broker.initialize(&app)?;
//! task.send(vec![])?;
//! # Ok::<(), lazy_broker::BrokerError>(())
//! ```

pub mod actor;
pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod publish;
pub mod registry;
pub mod resolve;
pub mod stub;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

pub use actor::DeferredActor;
pub use broker::{BrokerBuilder, LazyBroker};
pub use config::{
    settings_from_file, settings_from_toml, Configuration, OptionMap, OptionValue, SettingsMap,
};
pub use context::{AppContext, OwnerContext};
pub use error::BrokerError;
pub use middleware::{current_context, ContextMiddleware, Middleware, MultipleOwnersWarning};
pub use proxy::ProxyHandle;
pub use publish::{ChannelError, OutgoingMessage, PublishChannel, Publisher};
pub use registry::{
    BrokerClass, BrokerFactory, BrokerRegistry, FactoryArgs, DEFAULT_CLASS_NAME,
    DEFAULT_CONFIG_PREFIX, DYNAMIC_CLASS_NAME,
};
pub use resolve::{resolve, OverrideWarning, Resolved};
pub use stub::StubBroker;

/// A message handler: invoked with positional arguments, in the calling thread.
pub type Handler =
    Arc<dyn Fn(&[OptionValue]) -> Result<OptionValue, BrokerError> + Send + Sync>;

/// Capability interface implemented by every broker implementation, placeholder
/// and real alike. The [`ProxyHandle`] dispatches to whichever is active, so no
/// reflection-style universal interception is needed.
pub trait Broker: Send + Sync + Debug {
    /// The set of option names handlers may declare. Consulted when actors are
    /// declared, which is why the placeholder must answer it before the real
    /// implementation exists.
    fn actor_options(&self) -> BTreeSet<String>;

    /// Register a handler under `name` with its declared options.
    fn register_actor(
        &self,
        name: &str,
        handler: Handler,
        options: &OptionMap,
    ) -> Result<(), BrokerError>;

    /// Append a middleware to the processing chain.
    fn add_middleware(&self, middleware: Arc<dyn Middleware>);

    /// Queue a message for the named actor.
    fn enqueue(&self, actor: &str, args: Vec<OptionValue>) -> Result<(), BrokerError>;

    /// Call the registered handler for `actor` synchronously.
    fn dispatch(&self, actor: &str, args: &[OptionValue]) -> Result<OptionValue, BrokerError>;

    /// Read a named attribute of the implementation.
    fn attr(&self, name: &str) -> Option<OptionValue>;

    /// Write a named attribute of the implementation.
    fn set_attr(&self, name: &str, value: OptionValue);

    /// Release resources. Further enqueues fail with [`BrokerError::Closed`].
    fn close(&self);

    /// Downcast support for callers that know the concrete implementation.
    fn as_any(&self) -> &dyn Any;
}
