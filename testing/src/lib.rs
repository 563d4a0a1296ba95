//! # Userbridge Testing
//!
//! Test doubles for the Userbridge core.
//!
//! This crate provides:
//! - Mock implementations of environment traits (a controllable clock)
//! - [`InMemoryAccountStore`]: `HashMap`-backed account storage with
//!   optimistic concurrency and failure injection
//! - [`InMemoryBroker`]: a broker shared by several instances in one process
//! - [`RecordingListener`]: a bus listener that remembers what it saw
//! - Builders and proptest strategies for accounts
//!
//! ## Example
//!
//! ```ignore
//! use userbridge_testing::{InMemoryAccountStore, test_clock, helpers::account};
//!
//! #[tokio::test]
//! async fn test_ban() {
//!     let store = Arc::new(InMemoryAccountStore::new());
//!     let service = AccountService::new(store, bus, Arc::new(test_clock()), "accounts-eu");
//!     let created = service.create(account("Ada")).await?;
//!     service.ban(created.id).await?;
//! }
//! ```

mod broker_mocks;
mod store_mocks;

pub use broker_mocks::InMemoryBroker;
pub use store_mocks::InMemoryAccountStore;

use chrono::{DateTime, Utc};
use userbridge_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::RwLock;

    /// Clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::advance`] or
    /// [`FixedClock::set`].
    ///
    /// # Example
    ///
    /// ```
    /// use userbridge_testing::mocks::FixedClock;
    /// use userbridge_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// assert_eq!(before, clock.now());
    ///
    /// clock.advance(Duration::days(1));
    /// assert_eq!(clock.now() - before, Duration::days(1));
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = match self.time.write() {
                Ok(time) => time,
                Err(poisoned) => poisoned.into_inner(),
            };
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            match self.time.write() {
                Ok(mut current) => *current = time,
                Err(poisoned) => *poisoned.into_inner() = time,
            }
        }
    }

    impl Clone for FixedClock {
        fn clone(&self) -> Self {
            Self::new(self.now())
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            match self.time.read() {
                Ok(time) => *time,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }

    /// The time [`test_clock`] starts at
    #[must_use]
    pub fn test_clock_time() -> DateTime<Utc> {
        test_clock().now()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Listeners and builders for test scenarios.
pub mod helpers {
    use std::sync::Mutex;
    use userbridge_core::bus::{Interest, Listener, ListenerError};
    use userbridge_core::{Account, AccountEvent, AccountId, EventKind};

    /// Issuer used by [`account`].
    pub const TEST_ISSUER: &str = "https://id.example.test";

    /// Fresh account in the `default` namespace, created at the test clock's
    /// time.
    #[must_use]
    pub fn account(name: &str) -> Account {
        Account::new(
            AccountId::new(),
            "default",
            name,
            TEST_ISSUER,
            format!("sub-{}", name.to_lowercase()),
            super::mocks::test_clock_time(),
        )
    }

    /// Route `tracing` output to the test harness.
    ///
    /// Honors `RUST_LOG`; safe to call from every test, only the first call
    /// installs the subscriber.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Bus listener that keeps every event it receives.
    #[derive(Debug)]
    pub struct RecordingListener {
        name: String,
        interest: Interest,
        failing: bool,
        events: Mutex<Vec<AccountEvent>>,
    }

    impl RecordingListener {
        /// Record every event
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                interest: Interest::All,
                failing: false,
                events: Mutex::new(Vec::new()),
            }
        }

        /// Only receive events matching `interest`
        #[must_use]
        pub fn with_interest(mut self, interest: Interest) -> Self {
            self.interest = interest;
            self
        }

        /// Record, then report failure for every event
        #[must_use]
        pub fn failing(mut self) -> Self {
            self.failing = true;
            self
        }

        /// Events received so far
        #[must_use]
        pub fn events(&self) -> Vec<AccountEvent> {
            match self.events.lock() {
                Ok(events) => events.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        /// Kinds of the events received so far
        #[must_use]
        pub fn kinds(&self) -> Vec<EventKind> {
            self.events().iter().map(AccountEvent::kind).collect()
        }

        /// Number of events received
        #[must_use]
        pub fn len(&self) -> usize {
            self.events().len()
        }

        /// Whether nothing was received
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl Listener for RecordingListener {
        fn name(&self) -> &str {
            &self.name
        }

        fn interest(&self) -> Interest {
            self.interest.clone()
        }

        fn on_event(&self, event: &AccountEvent) -> Result<(), ListenerError> {
            match self.events.lock() {
                Ok(mut events) => events.push(event.clone()),
                Err(poisoned) => poisoned.into_inner().push(event.clone()),
            }
            if self.failing {
                return Err(ListenerError::new(&self.name, "configured to fail"));
            }
            Ok(())
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use super::helpers::TEST_ISSUER;
    use chrono::Duration;
    use proptest::prelude::*;
    use userbridge_core::{Account, AccountId};

    /// Strategy producing accounts with arbitrary penalty and deletion fields.
    ///
    /// Timestamps fall within a year either side of the test clock, so
    /// detainments are as likely to have expired as to be running.
    pub fn any_account() -> impl Strategy<Value = Account> {
        let offset = || (-365i64..365).prop_map(Duration::days);
        (
            "[a-z]{1,12}",
            proptest::option::of(offset()),
            proptest::option::of((1u32..400, offset())),
            proptest::option::of(offset()),
        )
            .prop_map(|(name, banned, detained, deleted)| {
                let base = super::mocks::test_clock_time();
                let mut account = Account::new(
                    AccountId::new(),
                    "default",
                    name.clone(),
                    TEST_ISSUER,
                    format!("sub-{name}"),
                    base - Duration::days(730),
                );
                account.banned_on = banned.map(|d| base + d);
                if let Some((days, till)) = detained {
                    account.detainment_days = Some(days);
                    account.detained_till = Some(base + till);
                }
                account.deleted = deleted.map(|d| base + d);
                account
            })
    }
}

// Re-export commonly used items
pub use helpers::RecordingListener;
pub use mocks::{FixedClock, test_clock};
