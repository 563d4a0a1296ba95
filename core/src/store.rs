//! Account storage contract.
//!
//! Persistence itself is an external collaborator; this module only fixes the
//! boundary. Implementations must enforce optimistic concurrency on
//! [`AccountStore::save`]: the snapshot's `version` has to match the stored one,
//! and a successful save returns the snapshot with the version bumped.

use crate::account::{Account, AccountId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by an [`AccountStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No account with this id.
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    /// An account with this id already exists.
    #[error("Account already exists: {0}")]
    AlreadyExists(AccountId),

    /// The stored version moved on since the snapshot was loaded.
    #[error("Version conflict for account {id}: expected {expected}, found {actual}")]
    Conflict {
        /// Account being saved
        id: AccountId,
        /// Version carried by the snapshot
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// The backing store failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistent home of account snapshots.
pub trait AccountStore: Send + Sync {
    /// Load an account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the account does not exist.
    fn load_by_id(&self, id: AccountId) -> StoreFuture<'_, Account>;

    /// Store a new account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    fn insert(&self, account: &Account) -> StoreFuture<'_, Account>;

    /// Overwrite an existing account, bumping its version.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the account does not exist
    /// - [`StoreError::Conflict`] if `account.version` is stale
    fn save(&self, account: &Account) -> StoreFuture<'_, Account>;

    /// Erase an account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the account does not exist.
    fn delete_by_id(&self, id: AccountId) -> StoreFuture<'_, ()>;
}
