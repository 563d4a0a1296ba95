//! In-memory account storage for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use userbridge_core::store::{AccountStore, StoreError, StoreFuture};
use userbridge_core::{Account, AccountId};

/// `HashMap`-backed [`AccountStore`].
///
/// Enforces the same optimistic concurrency contract as a real backend: `save`
/// requires the stored version and bumps it. A failure can be injected for the
/// next write with [`InMemoryAccountStore::fail_next_write`].
///
/// # Example
///
/// ```
/// use userbridge_testing::InMemoryAccountStore;
/// use userbridge_testing::helpers::account;
/// use userbridge_core::store::AccountStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryAccountStore::new();
/// let stored = store.insert(&account("Ada")).await?;
///
/// let saved = store.save(&stored).await?;
/// assert_eq!(saved.version, stored.version + 1);
///
/// // The old snapshot is now stale
/// assert!(store.save(&stored).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
    injected: Arc<Mutex<Option<StoreError>>>,
}

impl InMemoryAccountStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an account in place as-is, bypassing version checks
    pub fn seed(&self, account: Account) {
        self.accounts.write().unwrap().insert(account.id, account);
    }

    /// Current stored copy of an account
    #[must_use]
    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().unwrap().get(&id).cloned()
    }

    /// Whether an account is stored
    #[must_use]
    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.read().unwrap().contains_key(&id)
    }

    /// Number of stored accounts
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().unwrap().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().unwrap().is_empty()
    }

    /// Make the next `insert`, `save` or `delete_by_id` fail with `error`
    pub fn fail_next_write(&self, error: StoreError) {
        *self.injected.lock().unwrap() = Some(error);
    }

    fn injected(&self) -> Option<StoreError> {
        self.injected.lock().unwrap().take()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn load_by_id(&self, id: AccountId) -> StoreFuture<'_, Account> {
        Box::pin(async move { self.get(id).ok_or(StoreError::NotFound(id)) })
    }

    fn insert(&self, account: &Account) -> StoreFuture<'_, Account> {
        let account = account.clone();
        Box::pin(async move {
            if let Some(error) = self.injected() {
                return Err(error);
            }
            let mut accounts = self.accounts.write().unwrap();
            if accounts.contains_key(&account.id) {
                return Err(StoreError::AlreadyExists(account.id));
            }
            accounts.insert(account.id, account.clone());
            Ok(account)
        })
    }

    fn save(&self, account: &Account) -> StoreFuture<'_, Account> {
        let mut account = account.clone();
        Box::pin(async move {
            if let Some(error) = self.injected() {
                return Err(error);
            }
            let mut accounts = self.accounts.write().unwrap();
            let stored = accounts
                .get(&account.id)
                .ok_or(StoreError::NotFound(account.id))?;
            if stored.version != account.version {
                return Err(StoreError::Conflict {
                    id: account.id,
                    expected: account.version,
                    actual: stored.version,
                });
            }
            account.version += 1;
            accounts.insert(account.id, account.clone());
            Ok(account)
        })
    }

    fn delete_by_id(&self, id: AccountId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if let Some(error) = self.injected() {
                return Err(error);
            }
            self.accounts
                .write()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or(StoreError::NotFound(id))
        })
    }
}
