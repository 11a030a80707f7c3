//! The in-process stub broker.
//!
//! Serves two roles: the placeholder delegate every unsealed `LazyBroker`
//! consults for structural queries (which handler options exist), and a
//! registered, directly-instantiable broker kind in its own right. Messages go
//! onto an in-memory FIFO queue; [`StubBroker::run_pending`] drains it like a
//! worker would, running middleware hooks around each handler.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{OptionMap, OptionValue};
use crate::error::BrokerError;
use crate::middleware::Middleware;
use crate::registry::{BrokerFactory, FactoryArgs};
use crate::{Broker, Handler};

/// Options every handler may declare regardless of middleware.
const BASE_ACTOR_OPTIONS: &[&str] = &["queue_name", "max_retries", "priority"];

/// Configuration options the stub factory recognizes. Anything else is an
/// implementation-defined construction error, surfaced unchanged.
const FACTORY_OPTIONS: &[&str] = &["url"];

struct RegisteredActor {
    handler: Handler,
}

struct QueuedMessage {
    actor: String,
    args: Vec<OptionValue>,
}

pub struct StubBroker {
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    actors: RwLock<BTreeMap<String, RegisteredActor>>,
    queue: Mutex<VecDeque<QueuedMessage>>,
    attrs: RwLock<OptionMap>,
    closed: AtomicBool,
}

impl StubBroker {
    pub fn new(middleware: Vec<Arc<dyn Middleware>>) -> Arc<Self> {
        Arc::new(Self {
            middleware: RwLock::new(middleware),
            actors: RwLock::new(BTreeMap::new()),
            queue: Mutex::new(VecDeque::new()),
            attrs: RwLock::new(OptionMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Factory registered under the `StubBroker` class name.
    pub fn factory() -> BrokerFactory {
        Arc::new(|args: FactoryArgs| {
            let mut url = None;
            for (key, value) in &args.options {
                if !FACTORY_OPTIONS.contains(&key.as_str()) {
                    return Err(BrokerError::construction(format!(
                        "StubBroker got an unexpected option \"{key}\""
                    )));
                }
                if key == "url" {
                    url = value.as_str().map(str::to_string);
                }
            }
            let broker: Arc<dyn Broker> = StubBroker::new(args.middleware);
            // `new` has no url parameter; the resolved one is recorded here.
            if let Some(url) = url {
                broker.set_attr("url", OptionValue::from(url));
            }
            Ok(broker)
        })
    }

    pub fn url(&self) -> Option<String> {
        self.attr("url")
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn has_middleware(&self, label: &str) -> bool {
        self.middleware
            .read()
            .unwrap()
            .iter()
            .any(|mw| mw.label() == label)
    }

    pub fn middleware_labels(&self) -> Vec<&'static str> {
        self.middleware
            .read()
            .unwrap()
            .iter()
            .map(|mw| mw.label())
            .collect()
    }

    /// Run every middleware's boot hook, as a worker does on startup.
    pub fn emit_after_boot(&self) {
        let middleware = self.middleware.read().unwrap().clone();
        for mw in &middleware {
            mw.after_boot(self);
        }
    }

    /// Drain the queue, dispatching each message to its registered handler
    /// with middleware hooks around it. The after-process hook runs on handler
    /// failure too; unknown actors take the skip path. Returns the number of
    /// messages taken off the queue.
    pub fn run_pending(&self) -> usize {
        let mut processed = 0;
        loop {
            let message = match self.queue.lock().unwrap().pop_front() {
                Some(message) => message,
                None => break,
            };
            processed += 1;

            let middleware = self.middleware.read().unwrap().clone();
            let handler = self
                .actors
                .read()
                .unwrap()
                .get(&message.actor)
                .map(|actor| actor.handler.clone());

            let Some(handler) = handler else {
                tracing::warn!("skipping message for unknown actor \"{}\"", message.actor);
                for mw in &middleware {
                    mw.after_skip(self, &message.actor);
                }
                continue;
            };

            for mw in &middleware {
                mw.before_process(self, &message.actor);
            }
            let result = handler(&message.args);
            let error = result.as_ref().err();
            if let Some(e) = error {
                tracing::warn!("actor \"{}\" failed: {}", message.actor, e);
            }
            for mw in &middleware {
                mw.after_process(self, &message.actor, error);
            }
        }
        processed
    }
}

impl Broker for StubBroker {
    fn actor_options(&self) -> BTreeSet<String> {
        let mut options: BTreeSet<String> =
            BASE_ACTOR_OPTIONS.iter().map(|s| s.to_string()).collect();
        for mw in self.middleware.read().unwrap().iter() {
            options.extend(mw.actor_options());
        }
        options
    }

    fn register_actor(
        &self,
        name: &str,
        handler: Handler,
        options: &OptionMap,
    ) -> Result<(), BrokerError> {
        let recognized = self.actor_options();
        for key in options.keys() {
            if !recognized.contains(key) {
                return Err(BrokerError::UnknownActorOption(key.clone()));
            }
        }
        self.actors
            .write()
            .unwrap()
            .insert(name.to_string(), RegisteredActor { handler });
        tracing::debug!("registered actor \"{}\"", name);
        Ok(())
    }

    fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.write().unwrap().push(middleware);
    }

    fn enqueue(&self, actor: &str, args: Vec<OptionValue>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if !self.actors.read().unwrap().contains_key(actor) {
            return Err(BrokerError::UnknownActor(actor.to_string()));
        }
        self.queue.lock().unwrap().push_back(QueuedMessage {
            actor: actor.to_string(),
            args,
        });
        Ok(())
    }

    fn dispatch(&self, actor: &str, args: &[OptionValue]) -> Result<OptionValue, BrokerError> {
        let handler = self
            .actors
            .read()
            .unwrap()
            .get(actor)
            .map(|registered| registered.handler.clone())
            .ok_or_else(|| BrokerError::UnknownActor(actor.to_string()))?;
        handler(args)
    }

    fn attr(&self, name: &str) -> Option<OptionValue> {
        self.attrs.read().unwrap().get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: OptionValue) {
        self.attrs.write().unwrap().insert(name.to_string(), value);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().unwrap().clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for StubBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubBroker")
            .field("actors", &self.actors.read().unwrap().len())
            .field("queued", &self.queued())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
