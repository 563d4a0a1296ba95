//! # Userbridge Core
//!
//! Account lifecycle and cross-instance event replication.
//!
//! Several service instances ("applications") share one population of user
//! accounts. Each instance has its own in-process [`bus::EventBus`]; an external
//! [`broker::Broker`] bridges the instances. This crate provides:
//!
//! - **Account**: the snapshot whose timestamp fields drive lifecycle state
//! - **Events**: a closed taxonomy of account events grouped into topic categories
//! - **Lifecycle**: a state machine whose current variant is derived from the
//!   snapshot rather than stored
//! - **Replication**: outbound and inbound handlers that mirror locally
//!   originated events to the broker and re-post foreign ones locally, filtering
//!   on the originating application so nothing echoes back
//! - **Service**: the command boundary tying storage, lifecycle and bus together
//!
//! ## Data Flow
//!
//! ```text
//! command ──▶ AccountService ──▶ Lifecycle ──▶ EventBus (local)
//!                                                │
//!                          ┌─────────────────────┼───────────────┐
//!                          ▼                     ▼               ▼
//!                   OutboundReplicator     ReplicaApplier   AuditListener
//!                          │
//!                          ▼
//!                       Broker  ──▶ peer InboundHandler ──▶ peer EventBus
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use userbridge_core::bus::{EventBus, LocalEventBus};
//! use userbridge_core::lifecycle::{AccountState, Lifecycle};
//!
//! let bus = Arc::new(LocalEventBus::new());
//! let mut lifecycle = Lifecycle::new(account, bus, clock, "accounts-eu");
//! assert_eq!(lifecycle.ban(), AccountState::Banned);
//! ```

pub mod account;
pub mod broker;
pub mod bus;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod metrics;
pub mod replication;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use account::{Account, AccountId, RoleRef};
pub use chrono::{DateTime, Utc};
pub use event::{AccountEvent, Category, EventKind, EventPayload};
pub use lifecycle::{AccountState, Lifecycle};

/// Environment traits injected into the lifecycle and service.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Injected so lifecycle decisions that compare against "now" (detainment
    /// expiry, ban timestamps) are deterministic under test.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
