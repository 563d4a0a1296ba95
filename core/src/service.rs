//! Account commands and replica persistence.
//!
//! [`AccountService`] is the command boundary: it loads a snapshot, runs the
//! lifecycle or a profile change against it, persists the result and only then
//! posts the resulting events on the bus. Domain errors (not found, version
//! conflict) are reported to the caller; deleting or removing an account that
//! does not exist is a successful no-op.
//!
//! [`ReplicaApplier`] is the other half of replication: a bus listener that
//! writes snapshots carried by foreign events into local storage.

use crate::account::{Account, AccountId, RoleRef};
use crate::bus::{Delivery, EventBus, Interest, Listener, ListenerError, ListenerId};
use crate::environment::Clock;
use crate::event::{AccountEvent, EventKind, EventPayload};
use crate::lifecycle::{AccountState, Lifecycle, LifecycleError};
use crate::metrics::LifecycleMetrics;
use crate::store::{AccountStore, StoreError};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors returned by account commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Storage failed, including not-found and version conflicts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lifecycle refused the operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The account does not hold the role.
    #[error("Account {id} has no role '{role}'")]
    RoleNotFound {
        /// Account
        id: AccountId,
        /// Missing role
        role: RoleRef,
    },
}

/// Result type alias for account commands.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result of a lifecycle command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Snapshot after the command (as persisted, unless removed)
    pub account: Account,
    /// State the lifecycle ended in
    pub state: AccountState,
    /// Kinds of the events posted, in order
    pub events: Vec<EventKind>,
}

/// Bus that holds events until the command that produced them has been
/// persisted.
#[derive(Default)]
struct Outbox(Mutex<Vec<AccountEvent>>);

impl Outbox {
    fn take(&self) -> Vec<AccountEvent> {
        match self.0.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventBus for Outbox {
    fn register(&self, _listener: Arc<dyn Listener>) -> ListenerId {
        ListenerId(0)
    }

    fn unregister(&self, _id: ListenerId) -> bool {
        false
    }

    fn post(&self, event: AccountEvent) -> Delivery {
        match self.0.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Delivery::default()
    }
}

/// Command boundary for one instance.
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    application: String,
}

impl AccountService {
    /// Create a service posting events as `application`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AccountStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            application: application.into(),
        }
    }

    /// Store a new account and announce it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    pub async fn create(&self, account: Account) -> Result<Account> {
        let stored = self.store.insert(&account).await?;
        tracing::info!(account_id = %stored.id, "Account created");
        self.bus.post(AccountEvent::new(
            self.application.clone(),
            stored.clone(),
            EventPayload::Created,
            self.clock.now(),
        ));
        Ok(stored)
    }

    /// Load an account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the account does not exist.
    pub async fn find(&self, id: AccountId) -> Result<Account> {
        Ok(self.store.load_by_id(id).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Reactivate an account.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn activate(&self, id: AccountId) -> Result<Outcome> {
        self.transition(id, |l| Ok(l.activate())).await
    }

    /// Ban an account.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn ban(&self, id: AccountId) -> Result<Outcome> {
        self.transition(id, |l| Ok(l.ban())).await
    }

    /// Detain an account for `days`.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Lifecycle`] if `days` is invalid
    /// - [`ServiceError::Store`] if loading or saving fails
    pub async fn detain(&self, id: AccountId, days: u32) -> Result<Outcome> {
        self.transition(id, |l| l.detain(days)).await
    }

    /// Lift any penalty.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn release(&self, id: AccountId) -> Result<Outcome> {
        self.transition(id, |l| Ok(l.release())).await
    }

    /// Record an appeal.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn petition(&self, id: AccountId, request_id: Uuid) -> Result<Outcome> {
        self.transition(id, |l| Ok(l.petition(request_id))).await
    }

    /// Soft-delete an account. A missing account yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if saving fails.
    pub async fn delete(&self, id: AccountId) -> Result<Option<Outcome>> {
        Self::missing_is_done(self.transition(id, |l| Ok(l.delete())).await)
    }

    /// Remove an account. A missing account yields `Ok(None)`.
    ///
    /// An account that ends up [`AccountState::Removed`] is erased from storage;
    /// a banned or detained one is only soft-deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if saving or erasing fails.
    pub async fn remove(&self, id: AccountId, broadcast: bool) -> Result<Option<Outcome>> {
        Self::missing_is_done(self.transition(id, |l| Ok(l.remove(broadcast))).await)
    }

    fn missing_is_done(result: Result<Outcome>) -> Result<Option<Outcome>> {
        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(ServiceError::Store(StoreError::NotFound(id))) => {
                tracing::debug!(account_id = %id, "Account already gone");
                Ok(None)
            },
            Err(other) => Err(other),
        }
    }

    async fn transition<F>(&self, id: AccountId, operation: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Lifecycle) -> std::result::Result<AccountState, LifecycleError>,
    {
        let account = self.store.load_by_id(id).await?;
        let outbox = Arc::new(Outbox::default());
        let mut lifecycle = Lifecycle::new(
            account,
            Arc::clone(&outbox) as Arc<dyn EventBus>,
            Arc::clone(&self.clock),
            self.application.clone(),
        )
        .unmetered();

        operation(&mut lifecycle)?;
        let (account, state) = lifecycle.into_parts();
        let events = outbox.take();

        if events.is_empty() {
            return Ok(Outcome {
                account,
                state,
                events: Vec::new(),
            });
        }

        let account = if state == AccountState::Removed {
            self.store.delete_by_id(id).await?;
            account
        } else {
            self.store.save(&account).await?
        };

        tracing::info!(account_id = %id, state = %state, events = events.len(), "Lifecycle command applied");
        let kinds = events.iter().map(AccountEvent::kind).collect();
        for mut event in events {
            event.account.version = account.version;
            let kind = event.kind();
            self.bus.post(event);
            LifecycleMetrics::record_event(kind);
        }

        Ok(Outcome {
            account,
            state,
            events: kinds,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Profile and role changes
    // ═══════════════════════════════════════════════════════════════════════

    /// Change the display name.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn rename(&self, id: AccountId, name: impl Into<String>) -> Result<Account> {
        let name = name.into();
        self.modify(id, move |account| {
            (account.name != name).then(|| EventPayload::NameChanged {
                previous: std::mem::replace(&mut account.name, name),
            })
        })
        .await
    }

    /// Move the account to another namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn change_namespace(&self, id: AccountId, namespace: impl Into<String>) -> Result<Account> {
        let namespace = namespace.into();
        self.modify(id, move |account| {
            (account.namespace != namespace).then(|| EventPayload::NamespaceChanged {
                previous: std::mem::replace(&mut account.namespace, namespace),
            })
        })
        .await
    }

    /// Change the issuer and subject the account authenticates as.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn change_identity(
        &self,
        id: AccountId,
        issuer: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Account> {
        let (issuer, subject) = (issuer.into(), subject.into());
        self.modify(id, move |account| {
            (account.issuer != issuer || account.subject != subject).then(|| {
                EventPayload::IdentityChanged {
                    previous_issuer: std::mem::replace(&mut account.issuer, issuer),
                    previous_subject: std::mem::replace(&mut account.subject, subject),
                }
            })
        })
        .await
    }

    /// Change or clear the email address.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn change_email(&self, id: AccountId, email: Option<String>) -> Result<Account> {
        self.modify(id, move |account| {
            (account.email != email).then(|| EventPayload::EmailChanged {
                previous: std::mem::replace(&mut account.email, email),
            })
        })
        .await
    }

    /// Change or clear the contact handle.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn change_contact(&self, id: AccountId, contact: Option<String>) -> Result<Account> {
        self.modify(id, move |account| {
            (account.contact != contact).then(|| EventPayload::ContactChanged {
                previous: std::mem::replace(&mut account.contact, contact),
            })
        })
        .await
    }

    /// Grant a role. Granting a role already held changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if loading or saving fails.
    pub async fn add_role(&self, id: AccountId, role: RoleRef) -> Result<Account> {
        self.modify(id, move |account| {
            account
                .roles
                .insert(role.clone())
                .then_some(EventPayload::RoleAdded { role })
        })
        .await
    }

    /// Revoke a role.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::RoleNotFound`] if the account does not hold `role`
    /// - [`ServiceError::Store`] if loading or saving fails
    pub async fn remove_role(&self, id: AccountId, role: RoleRef) -> Result<Account> {
        let account = self.store.load_by_id(id).await?;
        if !account.roles.contains(&role) {
            return Err(ServiceError::RoleNotFound { id, role });
        }
        self.apply(account, move |account| {
            account
                .roles
                .remove(&role)
                .then_some(EventPayload::RoleRemoved { role })
        })
        .await
    }

    async fn modify<F>(&self, id: AccountId, change: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) -> Option<EventPayload>,
    {
        let account = self.store.load_by_id(id).await?;
        self.apply(account, change).await
    }

    async fn apply<F>(&self, mut account: Account, change: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) -> Option<EventPayload>,
    {
        let Some(payload) = change(&mut account) else {
            return Ok(account);
        };

        let saved = self.store.save(&account).await?;
        tracing::info!(account_id = %saved.id, kind = %payload.kind(), "Account modified");
        self.bus.post(AccountEvent::new(
            self.application.clone(),
            saved.clone(),
            payload,
            self.clock.now(),
        ));
        Ok(saved)
    }
}

/// Bus listener that persists snapshots carried by foreign events.
///
/// Locally originated events are skipped: the command that produced them has
/// already saved the snapshot. Like the outbound replicator, the listener only
/// queues; [`ReplicaWriter::run`] does the storage work.
pub struct ReplicaApplier {
    application: String,
    queue: mpsc::UnboundedSender<AccountEvent>,
}

impl ReplicaApplier {
    /// Create the listener and the writer that drains its queue.
    #[must_use]
    pub fn new(application: impl Into<String>, store: Arc<dyn AccountStore>) -> (Self, ReplicaWriter) {
        let (queue, pending) = mpsc::unbounded_channel();
        (
            Self {
                application: application.into(),
                queue,
            },
            ReplicaWriter {
                store,
                pending,
                removed: HashSet::new(),
                removal_order: VecDeque::new(),
                tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
            },
        )
    }
}

impl Listener for ReplicaApplier {
    fn name(&self) -> &str {
        "replica-applier"
    }

    fn interest(&self) -> Interest {
        Interest::All
    }

    fn on_event(&self, event: &AccountEvent) -> std::result::Result<(), ListenerError> {
        if event.originated_at(&self.application) {
            return Ok(());
        }
        self.queue
            .send(event.clone())
            .map_err(|_| ListenerError::new(self.name(), "replica writer has shut down"))
    }
}

/// Removed ids a [`ReplicaWriter`] remembers by default.
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 10_000;

/// Task writing replicated snapshots into local storage.
///
/// Each event kind arrives on its own subscription, so a removal can overtake
/// the delete event that preceded it. Removed ids are remembered and later
/// snapshots for them are ignored.
///
/// The tombstones live in memory only and hold the most recent
/// `tombstone_capacity` removals. After a restart, or once an id has been
/// evicted, a late snapshot for a removed account is written again.
pub struct ReplicaWriter {
    store: Arc<dyn AccountStore>,
    pending: mpsc::UnboundedReceiver<AccountEvent>,
    removed: HashSet<AccountId>,
    removal_order: VecDeque<AccountId>,
    tombstone_capacity: usize,
}

impl ReplicaWriter {
    /// Remember at most `capacity` removed ids, oldest evicted first.
    #[must_use]
    pub fn with_tombstone_capacity(mut self, capacity: usize) -> Self {
        self.tombstone_capacity = capacity;
        self.trim_tombstones();
        self
    }

    /// Number of removed ids currently remembered.
    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.removed.len()
    }

    fn remember_removal(&mut self, id: AccountId) {
        if self.removed.insert(id) {
            self.removal_order.push_back(id);
            self.trim_tombstones();
        }
    }

    fn trim_tombstones(&mut self) {
        while self.removal_order.len() > self.tombstone_capacity {
            if let Some(oldest) = self.removal_order.pop_front() {
                self.removed.remove(&oldest);
            }
        }
    }

    /// Apply queued events until the applier is dropped. Returns how many
    /// were applied.
    pub async fn run(mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.pending.recv().await {
            match self.apply(&event).await {
                Ok(()) => applied += 1,
                Err(error) => tracing::error!(
                    event_id = %event.id,
                    account_id = %event.account.id,
                    kind = %event.kind(),
                    error = %error,
                    "Failed to apply replicated event"
                ),
            }
        }
        applied
    }

    /// Write one replicated event.
    ///
    /// A removal erases the local copy (already gone counts as done); anything
    /// else upserts the carried snapshot over whatever version is stored,
    /// unless the account was removed earlier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn apply(&mut self, event: &AccountEvent) -> std::result::Result<(), StoreError> {
        let id = event.account.id;
        if event.kind() == EventKind::Removed {
            self.remember_removal(id);
            return match self.store.delete_by_id(id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                Err(other) => Err(other),
            };
        }
        if self.removed.contains(&id) {
            tracing::debug!(account_id = %id, kind = %event.kind(), "Ignoring event for removed account");
            return Ok(());
        }

        let mut replica = event.account.clone();
        match self.store.load_by_id(id).await {
            Ok(local) => {
                replica.version = local.version;
                self.store.save(&replica).await?;
            },
            Err(StoreError::NotFound(_)) => {
                self.store.insert(&replica).await?;
            },
            Err(other) => return Err(other),
        }
        tracing::debug!(account_id = %id, kind = %event.kind(), origin = %event.application, "Replica updated");
        Ok(())
    }
}
