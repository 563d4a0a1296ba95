//! Internal (per-instance) event bus.
//!
//! The [`EventBus`] trait is the in-process publish/subscribe channel every
//! component of one instance shares. Lifecycle operations post to it, and
//! persistence, replication and audit listeners react to it.
//!
//! # Delivery
//!
//! - **Synchronous**: [`EventBus::post`] invokes listeners on the caller's thread
//!   before returning
//! - **Ordered**: listeners run in registration order
//! - **Filtered**: a listener only sees events matching its [`Interest`]
//! - **Isolated**: a failing listener is logged and counted; later listeners
//!   still run and the change that produced the event is not undone
//!
//! ```text
//! post(event)
//!    │
//!    ├──▶ listener #1 (All)          ✓
//!    ├──▶ listener #2 (State)        ✗ error logged, delivery continues
//!    └──▶ listener #3 (Kinds{..})    skipped, not interested
//! ```
//!
//! The external broker is a separate abstraction; see [`crate::broker`].

use crate::event::{AccountEvent, Category, EventKind};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failure raised by a single listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Listener '{listener}' failed: {reason}")]
pub struct ListenerError {
    /// Name of the failing listener
    pub listener: String,
    /// What went wrong
    pub reason: String,
}

impl ListenerError {
    /// Create a listener error.
    #[must_use]
    pub fn new(listener: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            reason: reason.into(),
        }
    }
}

/// Which events a listener wants to receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interest {
    /// Every event
    All,
    /// Events belonging to a category
    Category(Category),
    /// Events of specific kinds
    Kinds(BTreeSet<EventKind>),
}

impl Interest {
    /// Interest in exactly one kind.
    #[must_use]
    pub fn kind(kind: EventKind) -> Self {
        Self::Kinds(BTreeSet::from([kind]))
    }

    /// Whether an event of `kind` matches.
    #[must_use]
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Category(category) => kind.is_in(*category),
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

/// Receiver of events posted on an [`EventBus`].
pub trait Listener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Events this listener should receive.
    fn interest(&self) -> Interest {
        Interest::All
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] if handling fails. The bus logs the error and
    /// keeps delivering to the remaining listeners.
    fn on_event(&self, event: &AccountEvent) -> Result<(), ListenerError>;
}

/// Handle returned by [`EventBus::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Outcome of one [`EventBus::post`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that handled the event successfully
    pub delivered: usize,
    /// Listeners that returned an error
    pub failures: Vec<ListenerError>,
}

impl Delivery {
    /// Whether every interested listener succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-instance publish/subscribe channel.
pub trait EventBus: Send + Sync {
    /// Register a listener; it receives events posted after this call.
    fn register(&self, listener: Arc<dyn Listener>) -> ListenerId;

    /// Remove a listener. Returns `false` if it was not registered.
    fn unregister(&self, id: ListenerId) -> bool;

    /// Deliver an event to every interested listener, in registration order.
    fn post(&self, event: AccountEvent) -> Delivery;
}

/// In-process [`EventBus`].
///
/// The listener list is snapshotted at the start of each post, so listeners may
/// register, unregister or post from inside `on_event` without deadlocking.
#[derive(Default)]
pub struct LocalEventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Listener>)>>,
    next_id: AtomicU64,
}

impl LocalEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map_or(0, |listeners| listeners.len())
    }

    fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            // Poisoned by a panic inside register/unregister; the list itself is intact
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect(),
        }
    }
}

impl EventBus for LocalEventBus {
    fn register(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(listener = listener.name(), id = id.0, "Registering bus listener");
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push((id, listener)),
            Err(poisoned) => poisoned.into_inner().push((id, listener)),
        }
        id
    }

    fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn post(&self, event: AccountEvent) -> Delivery {
        let kind = event.kind();
        let mut delivery = Delivery::default();

        for listener in self.snapshot() {
            if !listener.interest().matches(kind) {
                continue;
            }
            match listener.on_event(&event) {
                Ok(()) => delivery.delivered += 1,
                Err(error) => {
                    tracing::error!(
                        listener = listener.name(),
                        event_id = %event.id,
                        kind = %kind,
                        account_id = %event.account.id,
                        error = %error.reason,
                        "Bus listener failed"
                    );
                    delivery.failures.push(error);
                },
            }
        }

        tracing::trace!(
            event_id = %event.id,
            kind = %kind,
            delivered = delivery.delivered,
            failed = delivery.failures.len(),
            "Event posted"
        );
        delivery
    }
}

/// Listener that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditListener;

impl Listener for AuditListener {
    fn name(&self) -> &str {
        "audit"
    }

    fn on_event(&self, event: &AccountEvent) -> Result<(), ListenerError> {
        tracing::info!(
            event_id = %event.id,
            kind = %event.kind(),
            account_id = %event.account.id,
            application = %event.application,
            occurred_at = %event.occurred_at,
            "Account event"
        );
        Ok(())
    }
}
