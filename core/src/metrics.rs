//! Metric recorders.
//!
//! Counters are emitted through the `metrics` facade; nothing is recorded
//! unless the host installs a recorder (the node installs a Prometheus
//! exporter).
//!
//! | Metric | Labels |
//! |---|---|
//! | `lifecycle_events_total` | `kind` |
//! | `replication_forwarded_total` | `topic` |
//! | `replication_publish_failures_total` | `topic` |
//! | `replication_reposted_total` | `kind` |
//! | `replication_discarded_total` | `direction` |
//! | `replication_protocol_errors_total` | `kind` |

use crate::event::EventKind;
use metrics::{counter, describe_counter};

/// Register descriptions for every metric this crate emits.
pub fn describe() {
    describe_counter!(
        "lifecycle_events_total",
        "Total number of events posted by lifecycle operations"
    );
    describe_counter!(
        "replication_forwarded_total",
        "Total number of local events accepted by the broker"
    );
    describe_counter!(
        "replication_publish_failures_total",
        "Total number of broker publishes that failed"
    );
    describe_counter!(
        "replication_reposted_total",
        "Total number of foreign events re-posted on the local bus"
    );
    describe_counter!(
        "replication_discarded_total",
        "Total number of events skipped by origin filtering"
    );
    describe_counter!(
        "replication_protocol_errors_total",
        "Total number of inbound messages dropped as malformed"
    );
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record an event posted by a lifecycle operation.
    pub fn record_event(kind: EventKind) {
        counter!("lifecycle_events_total", "kind" => kind.to_string()).increment(1);
    }
}

/// Replication metrics recorder.
pub struct ReplicationMetrics;

impl ReplicationMetrics {
    /// Record an event queued for the broker.
    pub fn record_forwarded(topic: &str) {
        counter!("replication_forwarded_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a failed broker publish.
    pub fn record_publish_failure(topic: &str) {
        counter!("replication_publish_failures_total", "topic" => topic.to_string())
            .increment(1);
    }

    /// Record a foreign event re-posted locally.
    pub fn record_reposted(kind: EventKind) {
        counter!("replication_reposted_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record an event skipped by origin filtering.
    pub fn record_discarded(direction: &'static str) {
        counter!("replication_discarded_total", "direction" => direction).increment(1);
    }

    /// Record an inbound message dropped as malformed.
    pub fn record_protocol_error(kind: EventKind) {
        counter!("replication_protocol_errors_total", "kind" => kind.to_string()).increment(1);
    }
}
