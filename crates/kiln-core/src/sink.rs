//! Pod lifecycle events and the sink they are relayed to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cluster event concerning a build pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodEvent {
    /// Pod the event is about.
    pub pod_name: String,
    /// Namespace of the pod.
    pub namespace: String,
    /// `Normal` or `Warning`.
    pub event_type: String,
    /// Machine-readable reason, e.g. `Pulling` or `FailedScheduling`.
    pub reason: Option<String>,
    /// Human-readable message.
    pub message: Option<String>,
    /// When the event was last observed.
    pub timestamp: Option<DateTime<Utc>>,
}

impl PodEvent {
    /// Returns true for `Warning` events.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.event_type == "Warning"
    }

    /// Single-line rendering used by text sinks.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} {}/{} {}: {}",
            self.event_type,
            self.namespace,
            self.pod_name,
            self.reason.as_deref().unwrap_or("Unknown"),
            self.message.as_deref().unwrap_or("")
        )
    }
}

/// Destination for pod events.
///
/// `push` is fire-and-forget: it must return promptly and must not fail
/// even when the underlying transport is unavailable.
pub trait LogSink: Send + Sync {
    /// Relay one event.
    fn push(&self, event: PodEvent);
}
