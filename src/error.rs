use crate::config::OptionValue;

/// Errors produced by the lazy-broker layer.
///
/// Configuration and identity errors are detected eagerly and are always fatal
/// to the caller; audit-only conditions (external overrides of code defaults,
/// multiple owning contexts) are reported through `tracing::warn!` instead and
/// never appear here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error(
        "initialize() must be called on brokers before use. \
         Did you forget to pass the owning context to the broker's constructor?"
    )]
    NotInitialized,

    #[error(
        "invalid configuration prefix \"{0}\": configuration prefixes must be all uppercase"
    )]
    InvalidConfigPrefix(String),

    #[error(
        "cannot create a second broker with configuration prefix \"{0}\". \
         Did you forget to pass a distinct config_prefix when creating the broker?"
    )]
    DuplicatePrefix(String),

    #[error("invalid broker class: {setting}={name}")]
    InvalidClass { setting: String, name: String },

    #[error("\"{owner}\" tried to reconfigure an already initialized broker")]
    Reconfiguration { owner: String },

    #[error("broker class \"{class}\" is unavailable: {reason}")]
    ClassUnavailable { class: String, reason: String },

    #[error("broker class \"{0}\" is already registered")]
    ClassAlreadyRegistered(String),

    #[error("\"{0}\" is reserved for the dynamically configurable broker")]
    ReservedClassName(String),

    #[error("invalid default URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Implementation-defined construction failure, surfaced unchanged from the
    /// broker factory (for example an unrecognized option name).
    #[error("broker construction failed: {0}")]
    Construction(String),

    #[error("actor() got an unexpected keyword argument \"{0}\"")]
    ReservedActorOption(String),

    #[error("unknown actor option \"{0}\"")]
    UnknownActorOption(String),

    #[error("actor \"{0}\" is already bound to a broker")]
    AlreadyBound(String),

    #[error("proxy handle is already sealed")]
    AlreadySealed,

    #[error("no attribute \"{0}\" on the broker implementation")]
    UnknownAttribute(String),

    #[error("unknown actor \"{0}\"")]
    UnknownActor(String),

    #[error("broker is closed")]
    Closed,

    #[error("connection closed after {attempts} publish attempts: {reason}")]
    ConnectionClosed { attempts: u32, reason: String },

    #[error("message rejected by transport: {0}")]
    Rejected(String),
}

impl BrokerError {
    pub fn invalid_class(setting: impl Into<String>, name: impl Into<String>) -> Self {
        BrokerError::InvalidClass {
            setting: setting.into(),
            name: name.into(),
        }
    }

    pub fn reconfiguration(owner: impl Into<String>) -> Self {
        BrokerError::Reconfiguration {
            owner: owner.into(),
        }
    }

    pub fn class_unavailable(class: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::ClassUnavailable {
            class: class.into(),
            reason: reason.into(),
        }
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        BrokerError::Construction(msg.into())
    }

    pub fn connection_closed(attempts: u32, reason: impl Into<String>) -> Self {
        BrokerError::ConnectionClosed {
            attempts,
            reason: reason.into(),
        }
    }

    /// Whether the error points at broker configuration rather than usage.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BrokerError::InvalidConfigPrefix(_)
                | BrokerError::DuplicatePrefix(_)
                | BrokerError::InvalidClass { .. }
                | BrokerError::Reconfiguration { .. }
                | BrokerError::InvalidUrl { .. }
        )
    }

    /// Whether the error indicates misuse of an unbound handle or actor.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            BrokerError::NotInitialized
                | BrokerError::AlreadyBound(_)
                | BrokerError::AlreadySealed
                | BrokerError::Closed
        )
    }
}

/// Convenience helper used where audit warnings name both values of a setting.
pub(crate) fn describe(value: &OptionValue) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_classification() {
        assert!(BrokerError::InvalidConfigPrefix("bad".to_string()).is_configuration_error());
        assert!(BrokerError::DuplicatePrefix("EVENTS".to_string()).is_configuration_error());
        assert!(BrokerError::invalid_class("class", "Nope").is_configuration_error());
        assert!(BrokerError::reconfiguration("other-app").is_configuration_error());

        assert!(!BrokerError::NotInitialized.is_configuration_error());
        assert!(!BrokerError::UnknownActor("task".to_string()).is_configuration_error());
    }

    #[test]
    fn test_lifecycle_error_classification() {
        assert!(BrokerError::NotInitialized.is_lifecycle_error());
        assert!(BrokerError::AlreadyBound("task".to_string()).is_lifecycle_error());
        assert!(BrokerError::AlreadySealed.is_lifecycle_error());
        assert!(BrokerError::Closed.is_lifecycle_error());

        assert!(!BrokerError::reconfiguration("app").is_lifecycle_error());
        assert!(!BrokerError::construction("boom").is_lifecycle_error());
    }
}
