//! Account lifecycle state machine.
//!
//! An account's lifecycle state is not stored. It is derived from the
//! snapshot's `deleted`, `banned_on` and `detained_till` fields by
//! [`AccountState::from_account`], and then carried by a [`Lifecycle`] wrapper
//! for the duration of one command.
//!
//! # Transitions
//!
//! | Operation       | Active        | Banned          | Detained        | Deleted / Removed   |
//! |-----------------|---------------|-----------------|-----------------|---------------------|
//! | `activate`      | no-op         | re-derive, post | re-derive, post | undelete, re-derive, post |
//! | `ban`           | → Banned      | no-op           | → Banned        | flag + post, stays  |
//! | `detain(d)`     | → Detained    | no-op           | extend, post    | no-op               |
//! | `release`       | no-op         | → Active        | → Active        | clear + post, stays |
//! | `delete`        | → Deleted     | → Deleted       | → Deleted       | no-op               |
//! | `remove(b)`     | → Removed     | → Deleted       | → Deleted       | no-op               |
//! | `petition(id)`  | post          | post            | post            | post                |
//!
//! Removing a banned or detained account degrades to a soft delete so the
//! penalty record survives; the remove event is suppressed in that case.
//! `ban` and `release` on a deleted account still update the penalty fields and
//! post their event, but only `activate` re-derives the state from scratch.
//!
//! `Removed` is terminal and never persisted. It only prevents further
//! transitions within the current command and triggers the remove event.

use crate::account::Account;
use crate::bus::EventBus;
use crate::environment::Clock;
use crate::event::{AccountEvent, EventPayload};
use crate::metrics::LifecycleMetrics;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Detainment length is zero or pushes the end date out of range.
    #[error("Invalid detainment of {days} days")]
    InvalidDetainment {
        /// Requested length
        days: u32,
    },
}

/// Behavioral mode governing transition outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    /// No penalty, not deleted
    Active,
    /// A ban is in effect
    Banned,
    /// A detainment is running
    Detained,
    /// Soft-deleted
    Deleted,
    /// Permanently removed; in-memory only
    Removed,
}

impl AccountState {
    /// Derive the state from a snapshot's raw fields.
    ///
    /// Precedence: deleted, then banned, then a detainment ending after `now`,
    /// otherwise active.
    #[must_use]
    pub fn from_account(account: &Account, now: DateTime<Utc>) -> Self {
        if account.is_deleted() {
            Self::Deleted
        } else if account.is_banned() {
            Self::Banned
        } else if account.is_detained_at(now) {
            Self::Detained
        } else {
            Self::Active
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Whether a penalty governs behavior.
    #[must_use]
    pub const fn is_penalized(self) -> bool {
        matches!(self, Self::Banned | Self::Detained)
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Banned => "banned",
            Self::Detained => "detained",
            Self::Deleted => "deleted",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// An account snapshot together with its resolved state and the bus its
/// events go to.
///
/// The wrapper owns the snapshot for the duration of one command. Every
/// operation returns the resulting state; the updated snapshot is recovered
/// with [`Lifecycle::into_account`].
pub struct Lifecycle {
    account: Account,
    state: AccountState,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    application: String,
    metered: bool,
}

impl Lifecycle {
    /// Wrap a snapshot, deriving its state.
    #[must_use]
    pub fn new(
        account: Account,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        application: impl Into<String>,
    ) -> Self {
        let state = AccountState::from_account(&account, clock.now());
        Self::with_state(account, state, bus, clock, application)
    }

    /// Wrap a snapshot with an explicit state.
    ///
    /// Used to continue an operation chain in a state the factory cannot
    /// produce, such as [`AccountState::Removed`].
    #[must_use]
    pub fn with_state(
        account: Account,
        state: AccountState,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            account,
            state,
            bus,
            clock,
            application: application.into(),
            metered: true,
        }
    }

    /// Leave event counting to the caller, for buses that hold events back
    /// until the change is persisted.
    #[must_use]
    pub(crate) fn unmetered(mut self) -> Self {
        self.metered = false;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AccountState {
        self.state
    }

    /// Current snapshot.
    #[must_use]
    pub const fn account(&self) -> &Account {
        &self.account
    }

    /// Give the snapshot back.
    #[must_use]
    pub fn into_account(self) -> Account {
        self.account
    }

    /// Give the snapshot and final state back.
    #[must_use]
    pub fn into_parts(self) -> (Account, AccountState) {
        (self.account, self.state)
    }

    /// Reactivate the account.
    ///
    /// Clears the soft-delete marker if set, then re-derives the state from the
    /// snapshot, so a deleted account that is still banned comes back banned.
    pub fn activate(&mut self) -> AccountState {
        match self.state {
            AccountState::Active => {},
            AccountState::Banned | AccountState::Detained => {
                self.rederive();
                self.post(EventPayload::Activated);
            },
            AccountState::Deleted | AccountState::Removed => {
                self.account.deleted = None;
                self.rederive();
                self.post(EventPayload::Activated);
            },
        }
        self.state
    }

    /// Ban the account.
    pub fn ban(&mut self) -> AccountState {
        match self.state {
            AccountState::Banned => {},
            AccountState::Active | AccountState::Detained => {
                self.account.banned_on = Some(self.clock.now());
                self.state = AccountState::Banned;
                self.post(EventPayload::Banned);
            },
            AccountState::Deleted | AccountState::Removed => {
                self.account.banned_on = Some(self.clock.now());
                self.post(EventPayload::Banned);
            },
        }
        self.state
    }

    /// Detain the account for `days`, or extend a running detainment.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidDetainment`] if `days` is zero or the
    /// resulting end date is out of range.
    pub fn detain(&mut self, days: u32) -> Result<AccountState, LifecycleError> {
        if days == 0 {
            return Err(LifecycleError::InvalidDetainment { days });
        }
        let now = self.clock.now();

        match self.state {
            AccountState::Active => {
                let till = Self::add_days(now, days)?;
                self.account.detainment_days = Some(days);
                self.account.detained_till = Some(till);
                self.state = AccountState::Detained;
                self.post(EventPayload::Detained { days });
            },
            AccountState::Detained => {
                let from = self.account.detained_till.map_or(now, |till| till.max(now));
                let till = Self::add_days(from, days)?;
                self.account.detained_till = Some(till);
                self.account.detainment_days =
                    Some(self.account.detainment_days.unwrap_or(0).saturating_add(days));
                self.post(EventPayload::Detained { days });
            },
            // A ban outranks a detainment; deleted accounts are left alone
            AccountState::Banned | AccountState::Deleted | AccountState::Removed => {},
        }
        Ok(self.state)
    }

    /// Lift any ban or detainment.
    pub fn release(&mut self) -> AccountState {
        match self.state {
            AccountState::Active => {},
            AccountState::Banned | AccountState::Detained => {
                self.account.clear_penalties();
                self.state = if self.account.is_deleted() {
                    AccountState::Deleted
                } else {
                    AccountState::Active
                };
                self.post(EventPayload::Released);
            },
            AccountState::Deleted | AccountState::Removed => {
                self.account.clear_penalties();
                self.post(EventPayload::Released);
            },
        }
        self.state
    }

    /// Soft-delete the account.
    pub fn delete(&mut self) -> AccountState {
        match self.state {
            AccountState::Active | AccountState::Banned | AccountState::Detained => {
                self.account.deleted = Some(self.clock.now());
                self.state = AccountState::Deleted;
                self.post(EventPayload::Deleted);
            },
            AccountState::Deleted | AccountState::Removed => {},
        }
        self.state
    }

    /// Permanently remove the account.
    ///
    /// A delete event is always posted. An active account then becomes
    /// [`AccountState::Removed`], and a remove event follows when `broadcast`
    /// is set. A banned or detained account only becomes
    /// [`AccountState::Deleted`] and never posts a remove event.
    pub fn remove(&mut self, broadcast: bool) -> AccountState {
        match self.state {
            AccountState::Active => {
                self.account.deleted = Some(self.clock.now());
                self.post(EventPayload::Deleted);
                self.state = AccountState::Removed;
                if broadcast {
                    self.post(EventPayload::Removed);
                }
            },
            AccountState::Banned | AccountState::Detained => {
                tracing::info!(
                    account_id = %self.account.id,
                    state = %self.state,
                    "Removal downgraded to deletion to keep the penalty record"
                );
                self.account.deleted = Some(self.clock.now());
                self.state = AccountState::Deleted;
                self.post(EventPayload::Deleted);
            },
            AccountState::Deleted | AccountState::Removed => {},
        }
        self.state
    }

    /// Record an appeal. The state never changes.
    pub fn petition(&mut self, request_id: Uuid) -> AccountState {
        self.post(EventPayload::Petitioned { request_id });
        self.state
    }

    fn rederive(&mut self) {
        self.state = AccountState::from_account(&self.account, self.clock.now());
    }

    fn add_days(from: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, LifecycleError> {
        from.checked_add_signed(Duration::days(i64::from(days)))
            .ok_or(LifecycleError::InvalidDetainment { days })
    }

    fn post(&self, payload: EventPayload) {
        let kind = payload.kind();
        let event = AccountEvent::new(
            self.application.clone(),
            self.account.clone(),
            payload,
            self.clock.now(),
        );
        tracing::debug!(
            account_id = %self.account.id,
            kind = %kind,
            state = %self.state,
            "Lifecycle transition"
        );
        self.bus.post(event);
        if self.metered {
            LifecycleMetrics::record_event(kind);
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("account", &self.account.id)
            .field("state", &self.state)
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use crate::bus::{Listener, ListenerError, LocalEventBus};
    use crate::event::EventKind;
    use std::sync::Mutex;

    const APP: &str = "accounts-eu";

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AccountEvent>>);

    impl Recorder {
        fn kinds(&self) -> Vec<EventKind> {
            self.0
                .lock()
                .map(|events| events.iter().map(AccountEvent::kind).collect())
                .unwrap_or_default()
        }

        fn last(&self) -> Option<AccountEvent> {
            self.0.lock().ok().and_then(|events| events.last().cloned())
        }
    }

    impl Listener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &AccountEvent) -> Result<(), ListenerError> {
            if let Ok(mut events) = self.0.lock() {
                events.push(event.clone());
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn account() -> Account {
        Account::new(AccountId::new(), "default", "Ada", "https://id.example", "ada", now())
    }

    fn banned() -> Account {
        let mut account = account();
        account.banned_on = Some(now() - Duration::days(1));
        account
    }

    fn detained() -> Account {
        let mut account = account();
        account.detainment_days = Some(90);
        account.detained_till = Some(now() + Duration::days(30));
        account
    }

    fn deleted() -> Account {
        let mut account = account();
        account.deleted = Some(now() - Duration::days(2));
        account
    }

    fn lifecycle(account: Account) -> (Lifecycle, Arc<Recorder>) {
        let bus = Arc::new(LocalEventBus::new());
        let recorder = Arc::new(Recorder::default());
        bus.register(recorder.clone());
        let lifecycle = Lifecycle::new(account, bus, Arc::new(FixedClock(now())), APP);
        (lifecycle, recorder)
    }

    fn removed(account: Account) -> (Lifecycle, Arc<Recorder>) {
        let bus = Arc::new(LocalEventBus::new());
        let recorder = Arc::new(Recorder::default());
        bus.register(recorder.clone());
        let lifecycle = Lifecycle::with_state(
            account,
            AccountState::Removed,
            bus,
            Arc::new(FixedClock(now())),
            APP,
        );
        (lifecycle, recorder)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Factory
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn factory_precedence() {
        assert_eq!(AccountState::from_account(&account(), now()), AccountState::Active);
        assert_eq!(AccountState::from_account(&banned(), now()), AccountState::Banned);
        assert_eq!(AccountState::from_account(&detained(), now()), AccountState::Detained);
        assert_eq!(AccountState::from_account(&deleted(), now()), AccountState::Deleted);

        let mut both = banned();
        both.deleted = Some(now());
        assert_eq!(AccountState::from_account(&both, now()), AccountState::Deleted);

        let mut banned_and_detained = detained();
        banned_and_detained.banned_on = Some(now());
        assert_eq!(
            AccountState::from_account(&banned_and_detained, now()),
            AccountState::Banned
        );
    }

    #[test]
    fn factory_ignores_elapsed_detainment() {
        let mut account = detained();
        account.detained_till = Some(now() - Duration::seconds(1));
        assert_eq!(AccountState::from_account(&account, now()), AccountState::Active);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // activate
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn activate_active_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.activate(), AccountState::Active);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn activate_banned_keeps_ban_but_posts() {
        let (mut lifecycle, recorder) = lifecycle(banned());
        assert_eq!(lifecycle.activate(), AccountState::Banned);
        assert!(lifecycle.account().is_banned());
        assert_eq!(recorder.kinds(), vec![EventKind::Activated]);
    }

    #[test]
    fn activate_deleted_undeletes() {
        let (mut lifecycle, recorder) = lifecycle(deleted());
        assert_eq!(lifecycle.activate(), AccountState::Active);
        assert!(!lifecycle.account().is_deleted());
        assert_eq!(recorder.kinds(), vec![EventKind::Activated]);
    }

    #[test]
    fn activate_removed_banned_and_deleted_resolves_to_banned() {
        let mut account = banned();
        account.deleted = Some(now());
        let (mut lifecycle, recorder) = removed(account);

        assert_eq!(lifecycle.activate(), AccountState::Banned);
        assert!(!lifecycle.account().is_deleted());
        assert_eq!(recorder.kinds(), vec![EventKind::Activated]);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ban
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn ban_active() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.ban(), AccountState::Banned);
        assert_eq!(lifecycle.account().banned_on, Some(now()));
        assert_eq!(recorder.kinds(), vec![EventKind::Banned]);
    }

    #[test]
    fn ban_is_idempotent() {
        let (mut lifecycle, recorder) = lifecycle(banned());
        let before = lifecycle.account().banned_on;
        assert_eq!(lifecycle.ban(), AccountState::Banned);
        assert_eq!(lifecycle.account().banned_on, before);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn ban_detained() {
        let (mut lifecycle, recorder) = lifecycle(detained());
        assert_eq!(lifecycle.ban(), AccountState::Banned);
        assert_eq!(recorder.kinds(), vec![EventKind::Banned]);
    }

    #[test]
    fn ban_deleted_posts_but_stays_deleted() {
        let (mut lifecycle, recorder) = lifecycle(deleted());
        assert_eq!(lifecycle.ban(), AccountState::Deleted);
        assert!(lifecycle.account().is_banned());
        assert_eq!(recorder.kinds(), vec![EventKind::Banned]);
    }

    #[test]
    fn ban_removed_posts_but_stays_removed() {
        let (mut lifecycle, recorder) = removed(deleted());
        assert_eq!(lifecycle.ban(), AccountState::Removed);
        assert_eq!(recorder.kinds(), vec![EventKind::Banned]);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // detain
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn detain_active() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.detain(10), Ok(AccountState::Detained));
        assert_eq!(lifecycle.account().detainment_days, Some(10));
        assert_eq!(lifecycle.account().detained_till, Some(now() + Duration::days(10)));
        assert_eq!(
            recorder.last().map(|e| e.payload),
            Some(EventPayload::Detained { days: 10 })
        );
    }

    #[test]
    fn detain_banned_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(banned());
        assert_eq!(lifecycle.detain(45), Ok(AccountState::Banned));
        assert_eq!(lifecycle.account().detained_till, None);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn detain_detained_extends() {
        let (mut lifecycle, recorder) = lifecycle(detained());
        assert_eq!(lifecycle.detain(5), Ok(AccountState::Detained));
        assert_eq!(lifecycle.account().detainment_days, Some(95));
        assert_eq!(lifecycle.account().detained_till, Some(now() + Duration::days(35)));
        assert_eq!(recorder.kinds(), vec![EventKind::Detained]);
    }

    #[test]
    fn detain_deleted_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(deleted());
        assert_eq!(lifecycle.detain(5), Ok(AccountState::Deleted));
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn detain_zero_days_is_rejected() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(
            lifecycle.detain(0),
            Err(LifecycleError::InvalidDetainment { days: 0 })
        );
        assert_eq!(lifecycle.state(), AccountState::Active);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn detain_out_of_range_leaves_account_untouched() {
        for original in [account(), detained()] {
            let (mut lifecycle, recorder) = lifecycle(original.clone());
            let state = lifecycle.state();

            assert_eq!(
                lifecycle.detain(u32::MAX),
                Err(LifecycleError::InvalidDetainment { days: u32::MAX })
            );
            assert_eq!(lifecycle.state(), state);
            assert_eq!(lifecycle.into_account(), original);
            assert!(recorder.kinds().is_empty());
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // release
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn release_active_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.release(), AccountState::Active);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn release_detained() {
        let (mut lifecycle, recorder) = lifecycle(detained());
        assert_eq!(lifecycle.release(), AccountState::Active);
        assert_eq!(lifecycle.account().detained_till, None);
        assert_eq!(lifecycle.account().detainment_days, None);
        assert_eq!(recorder.kinds(), vec![EventKind::Released]);
    }

    #[test]
    fn release_banned() {
        let (mut lifecycle, recorder) = lifecycle(banned());
        assert_eq!(lifecycle.release(), AccountState::Active);
        assert!(!lifecycle.account().is_banned());
        assert_eq!(recorder.kinds(), vec![EventKind::Released]);
    }

    #[test]
    fn release_deleted_clears_but_stays_deleted() {
        let mut account = deleted();
        account.banned_on = Some(now());
        let (mut lifecycle, recorder) = lifecycle(account);

        assert_eq!(lifecycle.release(), AccountState::Deleted);
        assert!(!lifecycle.account().is_banned());
        assert!(lifecycle.account().is_deleted());
        assert_eq!(recorder.kinds(), vec![EventKind::Released]);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // delete
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn delete_from_every_live_state() {
        for account in [account(), banned(), detained()] {
            let (mut lifecycle, recorder) = lifecycle(account);
            assert_eq!(lifecycle.delete(), AccountState::Deleted);
            assert_eq!(lifecycle.account().deleted, Some(now()));
            assert_eq!(recorder.kinds(), vec![EventKind::Deleted]);
        }
    }

    #[test]
    fn delete_deleted_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(deleted());
        assert_eq!(lifecycle.delete(), AccountState::Deleted);
        assert!(recorder.kinds().is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // remove
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn remove_active_with_broadcast() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.remove(true), AccountState::Removed);
        assert_eq!(recorder.kinds(), vec![EventKind::Deleted, EventKind::Removed]);
    }

    #[test]
    fn remove_active_without_broadcast() {
        let (mut lifecycle, recorder) = lifecycle(account());
        assert_eq!(lifecycle.remove(false), AccountState::Removed);
        assert_eq!(recorder.kinds(), vec![EventKind::Deleted]);
    }

    #[test]
    fn remove_penalized_degrades_to_delete() {
        for account in [banned(), detained()] {
            let (mut lifecycle, recorder) = lifecycle(account);
            assert_eq!(lifecycle.remove(true), AccountState::Deleted);
            assert!(lifecycle.account().is_deleted());
            assert_eq!(recorder.kinds(), vec![EventKind::Deleted]);
        }
    }

    #[test]
    fn remove_keeps_penalty_fields() {
        let (mut lifecycle, _recorder) = lifecycle(detained());
        lifecycle.remove(true);
        assert_eq!(lifecycle.account().detainment_days, Some(90));
    }

    #[test]
    fn remove_deleted_is_silent() {
        let (mut lifecycle, recorder) = lifecycle(deleted());
        assert_eq!(lifecycle.remove(true), AccountState::Deleted);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn removed_blocks_further_removal() {
        let (mut lifecycle, recorder) = lifecycle(account());
        lifecycle.remove(true);
        assert_eq!(lifecycle.delete(), AccountState::Removed);
        assert_eq!(lifecycle.remove(true), AccountState::Removed);
        assert_eq!(lifecycle.detain(3), Ok(AccountState::Removed));
        assert_eq!(recorder.kinds(), vec![EventKind::Deleted, EventKind::Removed]);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // petition
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn petition_posts_without_changing_state() {
        let request_id = Uuid::new_v4();
        for account in [account(), banned(), detained(), deleted()] {
            let (mut lifecycle, recorder) = lifecycle(account);
            let before = lifecycle.state();
            assert_eq!(lifecycle.petition(request_id), before);
            assert_eq!(
                recorder.last().map(|e| e.payload),
                Some(EventPayload::Petitioned { request_id })
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event contents
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn events_carry_post_transition_snapshot_and_origin() {
        let (mut lifecycle, recorder) = lifecycle(account());
        lifecycle.ban();

        let event = recorder.last();
        assert_eq!(event.as_ref().map(|e| e.application.as_str()), Some(APP));
        assert_eq!(event.as_ref().and_then(|e| e.account.banned_on), Some(now()));
        assert_eq!(event.map(|e| e.occurred_at), Some(now()));
    }
}
