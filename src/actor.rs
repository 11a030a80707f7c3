//! Actors whose broker binding is deferred.
//!
//! A [`DeferredActor`] is usable from the moment it is declared: direct
//! invocation runs the handler in-process, with or without a broker. Only
//! message sending waits for the one-shot bind that broker initialization
//! performs.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::config::{OptionMap, OptionValue};
use crate::error::BrokerError;
use crate::{Broker, Handler};

pub struct DeferredActor {
    name: String,
    handler: Handler,
    options: OptionMap,
    bound: RwLock<Option<Arc<dyn Broker>>>,
}

impl DeferredActor {
    pub(crate) fn new(name: &str, handler: Handler, options: OptionMap) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            handler,
            options,
            bound: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    pub fn is_bound(&self) -> bool {
        self.bound.read().unwrap().is_some()
    }

    /// Run the handler synchronously. Works before binding (the handler is
    /// called directly) and after (the broker dispatches it).
    pub fn invoke(&self, args: &[OptionValue]) -> Result<OptionValue, BrokerError> {
        let bound = self.bound.read().unwrap().clone();
        match bound {
            Some(broker) => broker.dispatch(&self.name, args),
            None => (self.handler)(args),
        }
    }

    /// Enqueue a message for asynchronous processing. Requires a bound broker.
    pub fn send(&self, args: Vec<OptionValue>) -> Result<(), BrokerError> {
        let bound = self.bound.read().unwrap().clone();
        match bound {
            Some(broker) => broker.enqueue(&self.name, args),
            None => Err(BrokerError::NotInitialized),
        }
    }

    /// One-shot: registers the handler with `broker` and records the binding.
    pub(crate) fn bind_to(&self, broker: &Arc<dyn Broker>) -> Result<(), BrokerError> {
        let mut bound = self.bound.write().unwrap();
        if bound.is_some() {
            return Err(BrokerError::AlreadyBound(self.name.clone()));
        }
        broker.register_actor(&self.name, self.handler.clone(), &self.options)?;
        *bound = Some(broker.clone());
        Ok(())
    }
}

impl fmt::Debug for DeferredActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredActor")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubBroker;

    fn doubling_handler() -> Handler {
        Arc::new(|args| match args.first() {
            Some(OptionValue::Int(n)) => Ok(OptionValue::Int(n * 2)),
            _ => Err(BrokerError::construction("expected an integer")),
        })
    }

    #[test]
    fn test_invoke_before_binding() {
        let actor = DeferredActor::new("double", doubling_handler(), OptionMap::new());
        assert!(!actor.is_bound());

        let result = actor.invoke(&[OptionValue::Int(21)]).unwrap();
        assert_eq!(result, OptionValue::Int(42));
    }

    #[test]
    fn test_send_before_binding_fails() {
        let actor = DeferredActor::new("double", doubling_handler(), OptionMap::new());
        assert!(matches!(
            actor.send(vec![OptionValue::Int(1)]),
            Err(BrokerError::NotInitialized)
        ));
    }

    #[test]
    fn test_send_after_binding_enqueues() {
        let actor = DeferredActor::new("double", doubling_handler(), OptionMap::new());
        let broker = StubBroker::new(Vec::new());
        let as_broker: Arc<dyn Broker> = broker.clone();
        actor.bind_to(&as_broker).unwrap();

        actor.send(vec![OptionValue::Int(3)]).unwrap();
        assert_eq!(broker.queued(), 1);
        assert_eq!(broker.run_pending(), 1);
    }

    #[test]
    fn test_binding_twice_fails() {
        let actor = DeferredActor::new("double", doubling_handler(), OptionMap::new());
        let broker: Arc<dyn Broker> = StubBroker::new(Vec::new());
        actor.bind_to(&broker).unwrap();
        assert!(matches!(
            actor.bind_to(&broker),
            Err(BrokerError::AlreadyBound(_))
        ));
    }

    #[test]
    fn test_binding_rejects_unknown_options() {
        let mut options = OptionMap::new();
        options.insert("no_such_option".to_string(), OptionValue::Int(1));
        let actor = DeferredActor::new("double", doubling_handler(), options);

        let broker: Arc<dyn Broker> = StubBroker::new(Vec::new());
        let result = actor.bind_to(&broker);
        assert!(matches!(result, Err(BrokerError::UnknownActorOption(_))));
        assert!(!actor.is_bound());
    }
}
