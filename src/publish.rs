//! Bounded-retry message publishing.
//!
//! Real broker connections drop; a publish that hits a transient channel
//! failure resets the channel and retries, up to a fixed attempt budget.
//! Exhausting the budget surfaces [`BrokerError::ConnectionClosed`]; a
//! non-transient rejection surfaces immediately without retrying.

use thiserror::Error;

use crate::error::BrokerError;

/// Attempt budget for a single publish.
pub const MAX_PUBLISH_ATTEMPTS: u32 = 6;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Connection-level failure; the channel may recover after a reset.
    #[error("transient channel failure: {0}")]
    Transient(String),

    /// The broker refused the message; retrying cannot help.
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub actor: String,
    pub queue_name: Option<String>,
    pub payload: Vec<u8>,
    pub priority: Option<u8>,
}

impl OutgoingMessage {
    pub fn new(actor: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            actor: actor.into(),
            queue_name: None,
            payload,
            priority: None,
        }
    }

    pub fn routing_key(&self) -> String {
        self.queue_name
            .clone()
            .unwrap_or_else(|| format!("dramatiq.events.{}", self.actor))
    }
}

/// Minimal channel surface a transport must provide.
pub trait PublishChannel {
    fn publish(&self, routing_key: &str, message: &OutgoingMessage) -> Result<(), ChannelError>;

    /// Drop and re-establish channel state after a transient failure.
    fn reset(&self);
}

pub struct Publisher<C: PublishChannel> {
    channel: C,
    max_attempts: u32,
}

impl<C: PublishChannel> Publisher<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            max_attempts: MAX_PUBLISH_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(channel: C, max_attempts: u32) -> Self {
        Self {
            channel,
            max_attempts,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn publish(&self, message: &OutgoingMessage) -> Result<(), BrokerError> {
        let routing_key = message.routing_key();
        let mut attempts = 0;
        loop {
            match self.channel.publish(&routing_key, message) {
                Ok(()) => return Ok(()),
                Err(ChannelError::Rejected(reason)) => {
                    return Err(BrokerError::Rejected(reason));
                }
                Err(ChannelError::Transient(reason)) => {
                    self.channel.reset();
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(BrokerError::connection_closed(self.max_attempts, reason));
                    }
                    tracing::warn!(
                        attempt = attempts,
                        routing_key = %routing_key,
                        "transient publish failure, retrying: {reason}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` publishes with a transient error.
    struct FlakyChannel {
        failures: u32,
        attempts: AtomicU32,
        resets: AtomicU32,
        published: Mutex<Vec<String>>,
    }

    impl FlakyChannel {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                resets: AtomicU32::new(0),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    impl PublishChannel for FlakyChannel {
        fn publish(
            &self,
            routing_key: &str,
            _message: &OutgoingMessage,
        ) -> Result<(), ChannelError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(ChannelError::Transient("connection reset".to_string()));
            }
            self.published.lock().unwrap().push(routing_key.to_string());
            Ok(())
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RejectingChannel {
        attempts: AtomicU32,
    }

    impl PublishChannel for RejectingChannel {
        fn publish(
            &self,
            _routing_key: &str,
            _message: &OutgoingMessage,
        ) -> Result<(), ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::Rejected("queue does not exist".to_string()))
        }

        fn reset(&self) {}
    }

    #[test]
    fn test_publish_retries_transient_failures() {
        let publisher = Publisher::new(FlakyChannel::new(2));
        let message = OutgoingMessage::new("send_email", b"{}".to_vec());
        publisher.publish(&message).unwrap();

        assert_eq!(publisher.channel().resets.load(Ordering::SeqCst), 2);
        assert_eq!(
            publisher.channel().published.lock().unwrap().as_slice(),
            ["dramatiq.events.send_email".to_string()]
        );
    }

    #[test]
    fn test_publish_gives_up_after_attempt_budget() {
        let publisher = Publisher::new(FlakyChannel::new(u32::MAX));
        let message = OutgoingMessage::new("send_email", b"{}".to_vec());

        let result = publisher.publish(&message);
        match result {
            Err(BrokerError::ConnectionClosed { attempts, .. }) => {
                assert_eq!(attempts, MAX_PUBLISH_ATTEMPTS);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            publisher.channel().attempts.load(Ordering::SeqCst),
            MAX_PUBLISH_ATTEMPTS
        );
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let publisher = Publisher::new(RejectingChannel {
            attempts: AtomicU32::new(0),
        });
        let message = OutgoingMessage::new("send_email", b"{}".to_vec());

        let result = publisher.publish(&message);
        assert!(matches!(result, Err(BrokerError::Rejected(_))));
        assert_eq!(publisher.channel().attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_routing_key_carries_events_prefix() {
        let message = OutgoingMessage::new("send_email", Vec::new());
        assert_eq!(message.routing_key(), "dramatiq.events.send_email");
    }

    #[test]
    fn test_explicit_queue_name_becomes_routing_key() {
        let mut message = OutgoingMessage::new("send_email", Vec::new());
        message.queue_name = Some("mail.outbound".to_string());
        assert_eq!(message.routing_key(), "mail.outbound");
    }
}
