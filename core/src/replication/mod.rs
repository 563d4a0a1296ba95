//! Cross-instance event replication.
//!
//! Replication keeps every instance's view of an account consistent without
//! events bouncing between instances forever. The rule is origin filtering:
//! every event records the application it originated at, and
//!
//! - the [`outbound`] side only forwards events whose origin is this instance
//! - the [`inbound`] side only re-posts events whose origin is another instance
//!
//! ```text
//!  instance A                      broker                    instance B
//!  ──────────                      ──────                    ──────────
//!  ban() ─▶ bus ─▶ Outbound ──▶ accounts.arbitration ──▶ Inbound ─▶ bus ─▶ listeners
//!                  (origin A: send)                    (origin A ≠ B: re-post)
//!                                                              │
//!                                                      Outbound (origin A ≠ B: skip)
//! ```
//!
//! Both sides pick a kind's topic with [`select_category`], so a kind is always
//! published and subscribed on the same topic.

pub mod inbound;
pub mod outbound;

pub use inbound::{InboundHandler, InboundOutcome, InboundReplicator, InboundReport};
pub use outbound::{ForwarderReport, OutboundForwarder, OutboundMessage, OutboundReplicator};

use crate::event::Category;

/// Pick the topic category for an event with `categories`.
///
/// Walks [`Category::SPECIFICITY`] (arbitration, modification, state, activity)
/// and returns the first category present. If none is present the event still
/// goes to the activity topic, with a warning.
#[must_use]
pub fn select_category(categories: &[Category]) -> Category {
    Category::SPECIFICITY
        .into_iter()
        .find(|category| categories.contains(category))
        .unwrap_or_else(|| {
            tracing::warn!(
                categories = ?categories,
                "Unrecognized event category, defaulting to activity topic"
            );
            Category::Activity
        })
}
