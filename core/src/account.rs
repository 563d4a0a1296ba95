//! Account snapshot.
//!
//! The snapshot is the persisted record of one user. Lifecycle state is never
//! stored on it directly; it is derived from the penalty and deletion fields by
//! [`AccountState::from_account`](crate::lifecycle::AccountState::from_account).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Stable unique identifier of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a role granted to an account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleRef(String);

impl RoleRef {
    /// Create a role reference from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one user account.
///
/// More than one of `banned_on`, `detained_till` and `deleted` may be set at the
/// same time (a banned account can also be deleted); the lifecycle resolves
/// which one governs behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier
    pub id: AccountId,
    /// Optimistic concurrency version, bumped by the store on every save
    pub version: u64,
    /// When the account was first created
    pub created_on: DateTime<Utc>,

    /// Set while a ban is in effect
    pub banned_on: Option<DateTime<Utc>>,
    /// Total length of the current detainment, in days
    pub detainment_days: Option<u32>,
    /// End of the current detainment; only meaningful while in the future
    pub detained_till: Option<DateTime<Utc>>,
    /// Soft-delete marker (recoverable through activation)
    pub deleted: Option<DateTime<Utc>>,

    /// Tenant namespace the account lives in
    pub namespace: String,
    /// Display name
    pub name: String,
    /// Identity provider that issued the account's credentials
    pub issuer: String,
    /// Subject identifier at the issuer
    pub subject: String,
    /// Email address, if known
    pub email: Option<String>,
    /// Free-form contact handle, if known
    pub contact: Option<String>,
    /// Granted roles
    pub roles: BTreeSet<RoleRef>,
}

impl Account {
    /// Create a fresh account with no penalties and no roles.
    #[must_use]
    pub fn new(
        id: AccountId,
        namespace: impl Into<String>,
        name: impl Into<String>,
        issuer: impl Into<String>,
        subject: impl Into<String>,
        created_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            version: 0,
            created_on,
            banned_on: None,
            detainment_days: None,
            detained_till: None,
            deleted: None,
            namespace: namespace.into(),
            name: name.into(),
            issuer: issuer.into(),
            subject: subject.into(),
            email: None,
            contact: None,
            roles: BTreeSet::new(),
        }
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the contact handle.
    #[must_use]
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    /// Grant a role.
    #[must_use]
    pub fn with_role(mut self, role: RoleRef) -> Self {
        self.roles.insert(role);
        self
    }

    /// Whether a ban is recorded.
    #[must_use]
    pub const fn is_banned(&self) -> bool {
        self.banned_on.is_some()
    }

    /// Whether a detainment is running at `now`.
    #[must_use]
    pub fn is_detained_at(&self, now: DateTime<Utc>) -> bool {
        self.detained_till.is_some_and(|till| till > now)
    }

    /// Whether the account is soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Drop every penalty field.
    pub(crate) fn clear_penalties(&mut self) {
        self.banned_on = None;
        self.detainment_days = None;
        self.detained_till = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account() -> Account {
        Account::new(AccountId::new(), "default", "Ada", "https://id.example", "ada", Utc::now())
    }

    #[test]
    fn new_account_has_no_penalties() {
        let account = account();
        assert!(!account.is_banned());
        assert!(!account.is_deleted());
        assert!(!account.is_detained_at(Utc::now()));
        assert_eq!(account.version, 0);
    }

    #[test]
    fn detainment_in_the_past_is_not_running() {
        let now = Utc::now();
        let mut account = account();
        account.detained_till = Some(now - Duration::days(1));
        assert!(!account.is_detained_at(now));

        account.detained_till = Some(now + Duration::days(1));
        assert!(account.is_detained_at(now));
    }

    #[test]
    fn detainment_ending_exactly_now_is_not_running() {
        let now = Utc::now();
        let mut account = account();
        account.detained_till = Some(now);
        assert!(!account.is_detained_at(now));
    }

    #[test]
    fn clear_penalties_leaves_deletion() {
        let now = Utc::now();
        let mut account = account();
        account.banned_on = Some(now);
        account.detainment_days = Some(3);
        account.detained_till = Some(now + Duration::days(3));
        account.deleted = Some(now);

        account.clear_penalties();

        assert!(!account.is_banned());
        assert_eq!(account.detainment_days, None);
        assert_eq!(account.detained_till, None);
        assert!(account.is_deleted());
    }

    #[test]
    fn account_id_serializes_as_plain_uuid() {
        let id = AccountId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{id}\""));
    }
}
