//! Middleware hooks and owner-context propagation.
//!
//! `ContextMiddleware` makes the owning context of a broker available to
//! handler bodies while a message is being processed. The active context lives
//! in storage scoped per worker thread, never shared: each in-flight message
//! pushes its context on entry and pops it on exit, with the pop running on
//! failure and skip paths as well, and a clean no-op when nothing was pushed
//! for the thread.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::OwnerContext;
use crate::error::BrokerError;
use crate::Broker;

/// Hooks invoked around broker lifecycle and message processing.
///
/// All hooks default to no-ops; middleware also contributes to the set of
/// options handlers may declare.
pub trait Middleware: Send + Sync {
    /// Short identifier used for introspection and log messages.
    fn label(&self) -> &'static str;

    /// Handler options this middleware recognizes.
    fn actor_options(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn after_boot(&self, _broker: &dyn Broker) {}

    fn before_process(&self, _broker: &dyn Broker, _actor: &str) {}

    fn after_process(&self, _broker: &dyn Broker, _actor: &str, _error: Option<&BrokerError>) {}

    /// Invoked when a queued message is skipped instead of processed.
    fn after_skip(&self, broker: &dyn Broker, actor: &str) {
        self.after_process(broker, actor, None);
    }
}

thread_local! {
    static ACTIVE_CONTEXTS: RefCell<Vec<Arc<dyn OwnerContext>>> = const { RefCell::new(Vec::new()) };
}

/// The owning context of the message currently being processed on this thread,
/// if any.
pub fn current_context() -> Option<Arc<dyn OwnerContext>> {
    ACTIVE_CONTEXTS.with(|stack| stack.borrow().last().cloned())
}

/// Propagates a broker's owning context into handler bodies.
pub struct ContextMiddleware {
    owner: Arc<dyn OwnerContext>,
}

impl ContextMiddleware {
    pub fn new(owner: Arc<dyn OwnerContext>) -> Self {
        Self { owner }
    }
}

impl Middleware for ContextMiddleware {
    fn label(&self) -> &'static str {
        "context"
    }

    fn before_process(&self, _broker: &dyn Broker, _actor: &str) {
        ACTIVE_CONTEXTS.with(|stack| stack.borrow_mut().push(self.owner.clone()));
    }

    fn after_process(&self, _broker: &dyn Broker, _actor: &str, _error: Option<&BrokerError>) {
        // No-op when nothing was pushed for this thread.
        ACTIVE_CONTEXTS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Attached once when a sealed broker gains a second owning context.
pub struct MultipleOwnersWarning;

impl Middleware for MultipleOwnersWarning {
    fn label(&self) -> &'static str {
        "multiple-owners-warning"
    }

    fn after_boot(&self, broker: &dyn Broker) {
        tracing::warn!(
            "{:?} is used by more than one owning context; the actor's \
             owning context may be set incorrectly",
            broker
        );
    }
}
