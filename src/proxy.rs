//! The stable handle standing in for a not-yet-built broker implementation.
//!
//! A handle starts unsealed: attribute writes land on the handle's own store
//! and reads answer from it, failing with `NotInitialized` for anything never
//! set locally. Sealing transfers ownership of the constructed implementation
//! into the handle exactly once; from then on every read and write forwards to
//! the backing implementation and the handle itself is permanently
//! write-through. There is no transition back.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::config::{OptionMap, OptionValue};
use crate::error::BrokerError;
use crate::Broker;

enum HandleState {
    Unsealed { attrs: OptionMap },
    Sealed(Arc<dyn Broker>),
}

pub struct ProxyHandle {
    state: RwLock<HandleState>,
}

impl ProxyHandle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HandleState::Unsealed {
                attrs: OptionMap::new(),
            }),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(&*self.state.read().unwrap(), HandleState::Sealed(_))
    }

    /// The backing implementation, once sealed.
    pub fn backing(&self) -> Result<Arc<dyn Broker>, BrokerError> {
        match &*self.state.read().unwrap() {
            HandleState::Sealed(implementation) => Ok(implementation.clone()),
            HandleState::Unsealed { .. } => Err(BrokerError::NotInitialized),
        }
    }

    /// Read an attribute: from the handle's own store while unsealed, from the
    /// backing implementation once sealed.
    pub fn read(&self, attr: &str) -> Result<OptionValue, BrokerError> {
        match &*self.state.read().unwrap() {
            HandleState::Unsealed { attrs } => {
                attrs.get(attr).cloned().ok_or(BrokerError::NotInitialized)
            }
            HandleState::Sealed(implementation) => implementation
                .attr(attr)
                .ok_or_else(|| BrokerError::UnknownAttribute(attr.to_string())),
        }
    }

    /// Write an attribute: onto the handle while unsealed, through to the
    /// backing implementation once sealed.
    pub fn write(&self, attr: &str, value: OptionValue) {
        match &mut *self.state.write().unwrap() {
            HandleState::Unsealed { attrs } => {
                attrs.insert(attr.to_string(), value);
            }
            HandleState::Sealed(implementation) => implementation.set_attr(attr, value),
        }
    }

    /// Take ownership of the constructed implementation and flip the handle to
    /// sealed, irreversibly. Attributes stored on the handle while unsealed are
    /// carried over onto the implementation so reads keep answering.
    ///
    /// Calling this on a sealed handle is a programming error and fails with
    /// [`BrokerError::AlreadySealed`].
    pub fn seal(&self, implementation: Arc<dyn Broker>) -> Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        match &mut *state {
            HandleState::Sealed(_) => Err(BrokerError::AlreadySealed),
            HandleState::Unsealed { attrs } => {
                for (name, value) in std::mem::take(attrs) {
                    implementation.set_attr(&name, value);
                }
                *state = HandleState::Sealed(implementation);
                Ok(())
            }
        }
    }
}

impl Default for ProxyHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.read().unwrap() {
            HandleState::Unsealed { attrs } => f
                .debug_struct("ProxyHandle")
                .field("sealed", &false)
                .field("attrs", attrs)
                .finish(),
            HandleState::Sealed(implementation) => f
                .debug_struct("ProxyHandle")
                .field("sealed", &true)
                .field("backing", implementation)
                .finish(),
        }
    }
}
