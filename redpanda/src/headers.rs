//! Envelope headers on Kafka records.
//!
//! | Header | Value |
//! |---|---|
//! | `type` | event type tag |
//! | `contentType` | payload content type |
//! | `id` | message id (UUID) |
//! | `timestamp` | RFC 3339 timestamp |

use chrono::{DateTime, Utc};
use rdkafka::message::{Header, OwnedHeaders};
use userbridge_core::broker::{BrokerMessage, ProtocolError};
use uuid::Uuid;

/// Header carrying the event type tag.
pub const TYPE: &str = "type";
/// Header carrying the payload content type.
pub const CONTENT_TYPE: &str = "contentType";
/// Header carrying the message id.
pub const ID: &str = "id";
/// Header carrying the message timestamp.
pub const TIMESTAMP: &str = "timestamp";

/// Kafka headers for a message.
#[must_use]
pub fn encode(message: &BrokerMessage) -> OwnedHeaders {
    let id = message.message_id.to_string();
    let timestamp = message.timestamp.to_rfc3339();
    OwnedHeaders::new_with_capacity(4)
        .insert(Header {
            key: TYPE,
            value: Some(message.event_type.as_str()),
        })
        .insert(Header {
            key: CONTENT_TYPE,
            value: Some(message.content_type.as_str()),
        })
        .insert(Header {
            key: ID,
            value: Some(id.as_str()),
        })
        .insert(Header {
            key: TIMESTAMP,
            value: Some(timestamp.as_str()),
        })
}

/// Envelope headers read off a record, before the payload is looked at.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    event_type: Option<String>,
    content_type: Option<String>,
    id: Option<String>,
    timestamp: Option<String>,
}

impl Envelope {
    /// Collect the envelope headers from `(name, value)` pairs. Unknown headers
    /// are ignored; non-UTF-8 values count as absent.
    pub fn read<'a>(headers: impl IntoIterator<Item = (&'a str, Option<&'a [u8]>)>) -> Self {
        let mut envelope = Self::default();
        for (name, value) in headers {
            let value = value
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .map(str::to_string);
            match name {
                TYPE => envelope.event_type = value,
                CONTENT_TYPE => envelope.content_type = value,
                ID => envelope.id = value,
                TIMESTAMP => envelope.timestamp = value,
                _ => {},
            }
        }
        envelope
    }

    /// Declared event type, if any.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Build the message.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingHeader`] if a header is absent
    /// - [`ProtocolError::Malformed`] if the id or timestamp does not parse
    pub fn into_message(self, key: Option<&[u8]>, payload: &[u8]) -> Result<BrokerMessage, ProtocolError> {
        let missing = |name: &str| ProtocolError::MissingHeader(name.to_string());

        let event_type = self.event_type.ok_or_else(|| missing(TYPE))?;
        let content_type = self.content_type.ok_or_else(|| missing(CONTENT_TYPE))?;
        let message_id = self
            .id
            .ok_or_else(|| missing(ID))?
            .parse::<Uuid>()
            .map_err(|e| ProtocolError::Malformed(format!("bad {ID} header: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp.ok_or_else(|| missing(TIMESTAMP))?)
            .map_err(|e| ProtocolError::Malformed(format!("bad {TIMESTAMP} header: {e}")))?
            .with_timezone(&Utc);

        Ok(BrokerMessage {
            event_type,
            content_type,
            message_id,
            timestamp,
            key: key
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            payload: payload.to_vec(),
        })
    }
}
