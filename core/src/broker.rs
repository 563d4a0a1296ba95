//! External broker abstraction and wire envelope.
//!
//! The [`Broker`] trait bridges instances. Each instance publishes its own
//! events to category topics and subscribes to the same topics to learn about
//! changes made elsewhere. Delivery guarantees, partitioning and topic creation
//! belong to the transport implementation.
//!
//! # Topic Naming Convention
//!
//! Topics follow the pattern `{system}.{category}`:
//! - `accounts.state` - activation, deletion and removal
//! - `accounts.arbitration` - bans, detainments, releases and petitions
//! - `accounts.modification` - profile and role changes
//! - `accounts.activity` - everything else
//!
//! # Envelope
//!
//! Every message is a [`BrokerMessage`]: the event serialized as JSON plus
//! headers naming its fully-qualified type, its content type, a message id and
//! a timestamp (the event's own id and `occurred_at`). The receiving side checks
//! the declared type before it parses the payload.
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `userbridge-testing` - for tests (fast, in-process)
//! - `RedpandaBroker` in `userbridge-redpanda` - for production (Kafka-compatible)

use crate::event::{AccountEvent, EventError, EventKind};
use chrono::{DateTime, Utc};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Content type of every payload this crate produces.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A single inbound message could not be turned into an event.
///
/// Fatal to that message only: handlers log it and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The declared type is not the one the subscription expects.
    #[error("Type mismatch: expected '{expected}', got '{actual}'")]
    TypeMismatch {
        /// Type tag the subscription expects
        expected: String,
        /// Type tag the message declares
        actual: String,
    },

    /// A required header is absent or unreadable.
    #[error("Missing header: {0}")]
    MissingHeader(String),

    /// The payload is not JSON.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The payload does not decode to the declared event.
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// A received message violated the envelope contract
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A serialized event in transit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Fully-qualified event type tag
    pub event_type: String,
    /// Payload content type
    pub content_type: String,
    /// Message identifier (the event id)
    pub message_id: Uuid,
    /// Message timestamp (the event's `occurred_at`)
    pub timestamp: DateTime<Utc>,
    /// Partitioning key (the account id)
    pub key: String,
    /// JSON-encoded [`AccountEvent`]
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Wrap an event for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be serialized.
    pub fn encode(event: &AccountEvent) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.kind().type_tag().to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            message_id: event.id,
            timestamp: event.occurred_at,
            key: event.account.id.to_string(),
            payload: event.to_json()?,
        })
    }

    /// Unwrap an event of the `expected` kind.
    ///
    /// Headers are checked before the payload is parsed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TypeMismatch`] if the declared type is not `expected`
    /// - [`ProtocolError::UnsupportedContentType`] if the payload is not JSON
    /// - [`ProtocolError::Malformed`] if the payload does not decode, or decodes
    ///   to a different kind than the header declares
    pub fn decode(&self, expected: EventKind) -> Result<AccountEvent, ProtocolError> {
        if self.event_type != expected.type_tag() {
            return Err(ProtocolError::TypeMismatch {
                expected: expected.type_tag().to_string(),
                actual: self.event_type.clone(),
            });
        }
        if self.content_type != JSON_CONTENT_TYPE {
            return Err(ProtocolError::UnsupportedContentType(self.content_type.clone()));
        }

        let event = AccountEvent::from_json(&self.payload)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if event.kind() != expected {
            return Err(ProtocolError::Malformed(format!(
                "payload is a {} event but the header declares {}",
                event.kind(),
                expected
            )));
        }
        Ok(event)
    }
}

impl fmt::Display for BrokerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BrokerMessage {{ type: {}, id: {}, size: {} bytes }}",
            self.event_type,
            self.message_id,
            self.payload.len()
        )
    }
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BrokerMessage, BrokerError>> + Send>>;

/// Transport between instances.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so handlers can hold an `Arc<dyn Broker>`.
pub trait Broker: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the transport rejects the message.
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Subscribe to the messages of one event type on a topic.
    ///
    /// The stream yields messages on `topic` declaring `event_type`. Messages the
    /// transport cannot classify are passed through so the subscriber can reject
    /// them as protocol errors.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(
        &self,
        topic: &str,
        event_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountId};
    use crate::event::EventPayload;

    fn event(payload: EventPayload) -> AccountEvent {
        let account = Account::new(AccountId::new(), "default", "Ada", "iss", "sub", Utc::now());
        AccountEvent::new("accounts-eu", account, payload, Utc::now())
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if encoding fails
    fn envelope_headers_come_from_the_event() {
        let event = event(EventPayload::Banned);
        let message = BrokerMessage::encode(&event).expect("encoding should succeed");

        assert_eq!(message.event_type, "userbridge.account.Banned.v1");
        assert_eq!(message.content_type, JSON_CONTENT_TYPE);
        assert_eq!(message.message_id, event.id);
        assert_eq!(message.timestamp, event.occurred_at);
        assert_eq!(message.key, event.account.id.to_string());
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if encoding fails
    fn decode_with_matching_type_returns_the_event() {
        let event = event(EventPayload::Detained { days: 45 });
        let message = BrokerMessage::encode(&event).expect("encoding should succeed");

        assert_eq!(message.decode(EventKind::Detained), Ok(event));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if encoding fails
    fn decode_checks_type_before_payload() {
        let mut message =
            BrokerMessage::encode(&event(EventPayload::Banned)).expect("encoding should succeed");
        message.payload = b"not json".to_vec();

        assert!(matches!(
            message.decode(EventKind::Released),
            Err(ProtocolError::TypeMismatch { .. })
        ));
        assert!(matches!(
            message.decode(EventKind::Banned),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if encoding fails
    fn decode_rejects_non_json_content() {
        let mut message =
            BrokerMessage::encode(&event(EventPayload::Deleted)).expect("encoding should succeed");
        message.content_type = "application/octet-stream".to_string();

        assert_eq!(
            message.decode(EventKind::Deleted),
            Err(ProtocolError::UnsupportedContentType(
                "application/octet-stream".to_string()
            ))
        );
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if encoding fails
    fn decode_rejects_header_payload_disagreement() {
        let mut message =
            BrokerMessage::encode(&event(EventPayload::Deleted)).expect("encoding should succeed");
        message.event_type = EventKind::Removed.type_tag().to_string();

        assert!(matches!(
            message.decode(EventKind::Removed),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn broker_error_wraps_protocol_error() {
        let err: BrokerError = ProtocolError::MissingHeader("type".to_string()).into();
        assert_eq!(err.to_string(), "Protocol error: Missing header: type");
    }
}
