//! Account event taxonomy.
//!
//! Every change to an account is announced as an [`AccountEvent`]. Events are
//! immutable once built and carry the post-change snapshot together with the
//! identifier of the application where the change originated. That origin is
//! what the replication layer compares against to avoid echoing events between
//! instances.
//!
//! # Categories
//!
//! Kinds are grouped into [`Category`] values that select the broker topic.
//! A kind may belong to several categories; they form a hierarchy from most to
//! least specific:
//!
//! ```text
//! activity
//! ├── state          (Activated, Deleted, Removed)
//! │   └── arbitration (Banned, Detained, Released)
//! ├── arbitration    (Petitioned)
//! └── modification   (profile and role changes)
//! ```
//!
//! # Type Tags
//!
//! Each kind has a stable, versioned, fully-qualified type tag such as
//! `"userbridge.account.Banned.v1"`. The tag travels as a message header so the
//! receiving side can check it before decoding the payload.

use crate::account::{Account, AccountId, RoleRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while encoding or decoding events.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during decoding.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Topic category an event is routed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Any account activity (the catch-all)
    Activity,
    /// Penalties and appeals
    Arbitration,
    /// Profile and role changes
    Modification,
    /// Lifecycle state changes
    State,
}

impl Category {
    /// Fixed specificity order used when choosing a topic.
    pub const SPECIFICITY: [Self; 4] = [
        Self::Arbitration,
        Self::Modification,
        Self::State,
        Self::Activity,
    ];

    /// Lowercase name, also the default topic suffix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Arbitration => "arbitration",
            Self::Modification => "modification",
            Self::State => "state",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of an [`EventPayload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Account was created
    Created,
    /// Account was (re)activated
    Activated,
    /// Account was banned
    Banned,
    /// Account was detained for a number of days
    Detained,
    /// Penalties were lifted
    Released,
    /// Account was soft-deleted
    Deleted,
    /// Account was permanently removed
    Removed,
    /// Account holder appealed
    Petitioned,
    /// Namespace changed
    NamespaceChanged,
    /// Display name changed
    NameChanged,
    /// Issuer or subject changed
    IdentityChanged,
    /// Email changed
    EmailChanged,
    /// Contact handle changed
    ContactChanged,
    /// Role granted
    RoleAdded,
    /// Role revoked
    RoleRemoved,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Created,
        Self::Activated,
        Self::Banned,
        Self::Detained,
        Self::Released,
        Self::Deleted,
        Self::Removed,
        Self::Petitioned,
        Self::NamespaceChanged,
        Self::NameChanged,
        Self::IdentityChanged,
        Self::EmailChanged,
        Self::ContactChanged,
        Self::RoleAdded,
        Self::RoleRemoved,
    ];

    /// Categories this kind belongs to, most specific first.
    #[must_use]
    pub const fn categories(self) -> &'static [Category] {
        use Category::{Activity, Arbitration, Modification, State};
        match self {
            Self::Created => &[Activity],
            Self::Activated | Self::Deleted | Self::Removed => &[State, Activity],
            Self::Banned | Self::Detained | Self::Released => &[Arbitration, State, Activity],
            Self::Petitioned => &[Arbitration, Activity],
            Self::NamespaceChanged
            | Self::NameChanged
            | Self::IdentityChanged
            | Self::EmailChanged
            | Self::ContactChanged
            | Self::RoleAdded
            | Self::RoleRemoved => &[Modification, Activity],
        }
    }

    /// Whether this kind belongs to `category`.
    #[must_use]
    pub fn is_in(self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    /// Stable fully-qualified type tag.
    #[must_use]
    pub const fn type_tag(self) -> &'static str {
        match self {
            Self::Created => "userbridge.account.Created.v1",
            Self::Activated => "userbridge.account.Activated.v1",
            Self::Banned => "userbridge.account.Banned.v1",
            Self::Detained => "userbridge.account.Detained.v1",
            Self::Released => "userbridge.account.Released.v1",
            Self::Deleted => "userbridge.account.Deleted.v1",
            Self::Removed => "userbridge.account.Removed.v1",
            Self::Petitioned => "userbridge.account.Petitioned.v1",
            Self::NamespaceChanged => "userbridge.account.NamespaceChanged.v1",
            Self::NameChanged => "userbridge.account.NameChanged.v1",
            Self::IdentityChanged => "userbridge.account.IdentityChanged.v1",
            Self::EmailChanged => "userbridge.account.EmailChanged.v1",
            Self::ContactChanged => "userbridge.account.ContactChanged.v1",
            Self::RoleAdded => "userbridge.account.RoleAdded.v1",
            Self::RoleRemoved => "userbridge.account.RoleRemoved.v1",
        }
    }

    /// Look a kind up by its type tag.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] if no kind carries `tag`.
    pub fn from_type_tag(tag: &str) -> Result<Self, EventError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_tag() == tag)
            .ok_or_else(|| EventError::UnknownEventType(tag.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind-specific event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Account was created
    Created,
    /// Account was (re)activated
    Activated,
    /// Account was banned
    Banned,
    /// Account was detained
    Detained {
        /// Days added by this detainment
        days: u32,
    },
    /// Penalties were lifted
    Released,
    /// Account was soft-deleted
    Deleted,
    /// Account was permanently removed
    Removed,
    /// Account holder appealed a decision
    Petitioned {
        /// Identifier of the appeal request
        request_id: Uuid,
    },
    /// Namespace changed
    NamespaceChanged {
        /// Namespace before the change
        previous: String,
    },
    /// Display name changed
    NameChanged {
        /// Name before the change
        previous: String,
    },
    /// Issuer or subject changed
    IdentityChanged {
        /// Issuer before the change
        previous_issuer: String,
        /// Subject before the change
        previous_subject: String,
    },
    /// Email changed
    EmailChanged {
        /// Email before the change
        previous: Option<String>,
    },
    /// Contact handle changed
    ContactChanged {
        /// Contact before the change
        previous: Option<String>,
    },
    /// Role granted
    RoleAdded {
        /// The granted role
        role: RoleRef,
    },
    /// Role revoked
    RoleRemoved {
        /// The revoked role
        role: RoleRef,
    },
}

impl EventPayload {
    /// The discriminant of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Created => EventKind::Created,
            Self::Activated => EventKind::Activated,
            Self::Banned => EventKind::Banned,
            Self::Detained { .. } => EventKind::Detained,
            Self::Released => EventKind::Released,
            Self::Deleted => EventKind::Deleted,
            Self::Removed => EventKind::Removed,
            Self::Petitioned { .. } => EventKind::Petitioned,
            Self::NamespaceChanged { .. } => EventKind::NamespaceChanged,
            Self::NameChanged { .. } => EventKind::NameChanged,
            Self::IdentityChanged { .. } => EventKind::IdentityChanged,
            Self::EmailChanged { .. } => EventKind::EmailChanged,
            Self::ContactChanged { .. } => EventKind::ContactChanged,
            Self::RoleAdded { .. } => EventKind::RoleAdded,
            Self::RoleRemoved { .. } => EventKind::RoleRemoved,
        }
    }
}

/// An account event.
///
/// Built once by a lifecycle or data-management operation and never mutated
/// afterwards; listeners only ever see it by reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    /// Unique event identifier, reused as the broker message id
    pub id: Uuid,
    /// When the change happened
    pub occurred_at: DateTime<Utc>,
    /// Application where the change originated
    pub application: String,
    /// Account snapshot after the change
    pub account: Account,
    /// Kind-specific data
    pub payload: EventPayload,
}

impl AccountEvent {
    /// Build an event with a fresh identifier.
    #[must_use]
    pub fn new(
        application: impl Into<String>,
        account: Account,
        payload: EventPayload,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at,
            application: application.into(),
            account,
            payload,
        }
    }

    /// The event's kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The affected account's identifier.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account.id
    }

    /// Categories of this event, most specific first.
    #[must_use]
    pub const fn categories(&self) -> &'static [Category] {
        self.kind().categories()
    }

    /// Whether the event originated at `application`.
    #[must_use]
    pub fn originated_at(&self, application: &str) -> bool {
        self.application == application
    }

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be serialized.
    pub fn to_json(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are not a valid event.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for AccountEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccountEvent {{ kind: {}, account: {}, application: {} }}",
            self.kind(),
            self.account.id,
            self.application
        )
    }
}
