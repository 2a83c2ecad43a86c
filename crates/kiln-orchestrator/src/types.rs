//! Types for the orchestrator crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-neutral snapshot of a pod's status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Current phase of the pod lifecycle.
    pub phase: PodPhase,
    /// Whether every container reports ready.
    pub ready: bool,
    /// Restarts of the first container.
    pub restart_count: u32,
    /// When the pod was started.
    pub started_at: Option<DateTime<Utc>>,
    /// Pod-level status message.
    pub message: Option<String>,
    /// Last-seen container state, e.g. `ContainerCreating` or `ImagePullBackOff: ...`.
    pub container_state: Option<String>,
    /// Set when a container reports a persistent failure.
    pub container_error: Option<String>,
}

impl PodStatus {
    /// A status in the given phase with nothing else set.
    #[must_use]
    pub fn in_phase(phase: PodPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Best diagnostic message available.
    #[must_use]
    pub fn diagnostic(&self) -> Option<String> {
        self.container_error
            .clone()
            .or_else(|| self.container_state.clone())
            .or_else(|| self.message.clone())
    }
}

/// Phase of the pod lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Pod has been accepted but containers are not yet running.
    Pending,
    /// Pod is running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Pod status cannot be determined.
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse a pod phase from a Kubernetes phase string.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Check if the pod is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Tri-state outcome of readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessState {
    /// The pod reached phase Running.
    Running,
    /// The pod failed or the wait ran out of time.
    Error,
    /// Not yet observed as either; poll again.
    Pending,
}

/// Result of waiting for a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodReadiness {
    /// Outcome.
    pub state: ReadinessState,
    /// Last-seen container state message.
    pub message: Option<String>,
    /// True when `Error` was caused by the wait budget running out.
    pub timed_out: bool,
}

impl PodReadiness {
    /// Classify one status observation.
    #[must_use]
    pub fn observe(status: &PodStatus) -> Self {
        let state = if status.phase == PodPhase::Running {
            ReadinessState::Running
        } else if status.phase.is_terminal() || status.container_error.is_some() {
            ReadinessState::Error
        } else {
            ReadinessState::Pending
        };
        Self {
            state,
            message: status.diagnostic(),
            timed_out: false,
        }
    }

    /// The wait budget ran out while the pod was still pending.
    #[must_use]
    pub const fn timed_out(message: Option<String>) -> Self {
        Self {
            state: ReadinessState::Error,
            message,
            timed_out: true,
        }
    }

    /// Returns true if the pod is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ReadinessState::Running
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteResult {
    /// The object existed and deletion was accepted.
    Deleted,
    /// The object did not exist.
    NotFound,
}

/// Shortest allowed readiness poll interval in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between readiness polls in seconds.
    pub poll_interval_secs: u64,
    /// Readiness timeout used when a request specifies zero.
    pub default_readiness_timeout_secs: u64,
    /// Exec timeout used when a request specifies zero.
    pub default_exec_timeout_secs: u64,
    /// How long `stop` waits for the watch task before aborting it.
    pub watch_stop_timeout_secs: u64,
    /// Whether client resolution checks the API server is reachable.
    pub verify_connectivity: bool,
    /// Directory inside containers where exec output is captured by default.
    pub output_dir: String,
    /// Field manager used for server-side apply.
    pub field_manager: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            default_readiness_timeout_secs: 600,
            default_exec_timeout_secs: 3600,
            watch_stop_timeout_secs: 5,
            verify_connectivity: true,
            output_dir: "/tmp/kiln".to_string(),
            field_manager: "kiln".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `KILN_POLL_INTERVAL_SECS`: Interval between readiness polls
    /// - `KILN_DEFAULT_READINESS_TIMEOUT_SECS`: Fallback readiness timeout
    /// - `KILN_DEFAULT_EXEC_TIMEOUT_SECS`: Fallback exec timeout
    /// - `KILN_WATCH_STOP_TIMEOUT_SECS`: Grace period when stopping the event watch
    /// - `KILN_VERIFY_CONNECTIVITY`: `true`/`false`
    /// - `KILN_OUTPUT_DIR`: Default exec output directory inside containers
    /// - `KILN_FIELD_MANAGER`: Server-side apply field manager
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("KILN_POLL_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.poll_interval_secs = n.max(MIN_POLL_INTERVAL_SECS);
            }
        }
        if let Ok(val) = std::env::var("KILN_DEFAULT_READINESS_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.default_readiness_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("KILN_DEFAULT_EXEC_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.default_exec_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("KILN_WATCH_STOP_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.watch_stop_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("KILN_VERIFY_CONNECTIVITY") {
            config.verify_connectivity = !matches!(val.to_lowercase().as_str(), "false" | "0" | "no");
        }
        if let Ok(val) = std::env::var("KILN_OUTPUT_DIR") {
            config.output_dir = val;
        }
        if let Ok(val) = std::env::var("KILN_FIELD_MANAGER") {
            config.field_manager = val;
        }

        config
    }

    /// Readiness poll interval, never below one second.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            Duration::from_secs(MIN_POLL_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.poll_interval_secs)
        }
    }

    /// Watch stop grace period.
    #[must_use]
    pub const fn watch_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_stop_timeout_secs)
    }

    /// The requested readiness timeout, or the default for zero.
    #[must_use]
    pub const fn readiness_timeout(&self, requested_secs: u64) -> Duration {
        if requested_secs == 0 {
            Duration::from_secs(self.default_readiness_timeout_secs)
        } else {
            Duration::from_secs(requested_secs)
        }
    }

    /// The requested exec timeout, or the default for zero.
    #[must_use]
    pub const fn exec_timeout(&self, requested_secs: u64) -> Duration {
        if requested_secs == 0 {
            Duration::from_secs(self.default_exec_timeout_secs)
        } else {
            Duration::from_secs(requested_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_phase_from_k8s() {
        assert_eq!(PodPhase::from_k8s_phase("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::from_k8s_phase("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from_k8s_phase("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::from_k8s_phase("Failed"), PodPhase::Failed);
        assert_eq!(PodPhase::from_k8s_phase("Invalid"), PodPhase::Unknown);
    }

    #[test]
    fn readiness_classification() {
        let running = PodReadiness::observe(&PodStatus::in_phase(PodPhase::Running));
        assert!(running.is_running());

        let pending = PodReadiness::observe(&PodStatus {
            phase: PodPhase::Pending,
            container_state: Some("ContainerCreating".into()),
            ..Default::default()
        });
        assert_eq!(pending.state, ReadinessState::Pending);
        assert_eq!(pending.message.as_deref(), Some("ContainerCreating"));

        let pull_failure = PodReadiness::observe(&PodStatus {
            phase: PodPhase::Pending,
            container_state: Some("ImagePullBackOff".into()),
            container_error: Some("ImagePullBackOff: manifest unknown".into()),
            ..Default::default()
        });
        assert_eq!(pull_failure.state, ReadinessState::Error);
        assert_eq!(
            pull_failure.message.as_deref(),
            Some("ImagePullBackOff: manifest unknown")
        );

        let failed = PodReadiness::observe(&PodStatus::in_phase(PodPhase::Failed));
        assert_eq!(failed.state, ReadinessState::Error);
        assert!(!failed.timed_out);
    }

    #[test]
    fn config_defaults_and_fallbacks() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.readiness_timeout(0), Duration::from_secs(600));
        assert_eq!(config.readiness_timeout(100), Duration::from_secs(100));
        assert_eq!(config.exec_timeout(0), Duration::from_secs(3600));
        assert_eq!(config.output_dir, "/tmp/kiln");
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = OrchestratorConfig {
            poll_interval_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
