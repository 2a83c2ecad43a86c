//! Caller-facing request and result shapes.

use serde::{Deserialize, Serialize};

use crate::connector::ClusterConnector;
use crate::descriptor::{PodDescriptor, ServicePodDescriptor};
use crate::secret::AuthContext;

/// Terminal status of an orchestration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The task reached its goal.
    Success,
    /// The task failed; see the message.
    Failure,
}

/// Result of a build or cleanup task. Never retried by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Terminal status.
    pub status: TaskStatus,
    /// Human-readable detail; always present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskResult {
    /// A successful result without a message.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            message: None,
        }
    }

    /// A failed result carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            message: Some(message.into()),
        }
    }

    /// Returns true if the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Outcome of one command batch run inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// The command batch exited successfully.
    Success,
    /// The command batch failed or the stream broke.
    Failure,
    /// The command batch did not finish within the timeout.
    Timeout,
}

/// Result of an exec request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Outcome.
    pub status: ExecStatus,
    /// Detail for failures and timeouts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecResult {
    /// A successful exec.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            status: ExecStatus::Success,
            message: None,
        }
    }

    /// A failed exec.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Failure,
            message: Some(message.into()),
        }
    }

    /// A timed-out exec.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Timeout,
            message: Some(message.into()),
        }
    }
}

/// Request to stand up a build environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEnvironmentRequest {
    /// Target cluster.
    pub connector: ClusterConnector,
    /// Identity used for decryption.
    #[serde(default)]
    pub auth: AuthContext,
    /// The primary build pod.
    pub pod: PodDescriptor,
    /// Sidecar service pods.
    #[serde(default)]
    pub service_pods: Vec<ServicePodDescriptor>,
    /// How long to wait for the primary pod to reach Running.
    pub readiness_timeout_secs: u64,
    /// Log stream key the pod events are relayed under.
    #[serde(default)]
    pub log_key: Option<String>,
}

/// Request to tear a build environment down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRequest {
    /// Target cluster.
    pub connector: ClusterConnector,
    /// Identity used for decryption.
    #[serde(default)]
    pub auth: AuthContext,
    /// Namespace holding the build objects.
    pub namespace: String,
    /// Pods to delete.
    #[serde(default)]
    pub pod_names: Vec<String>,
    /// Services to delete.
    #[serde(default)]
    pub service_names: Vec<String>,
    /// Additional secrets to delete.
    #[serde(default)]
    pub secret_names: Vec<String>,
}

/// Request to run a script inside a running container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Target cluster.
    pub connector: ClusterConnector,
    /// Identity used for decryption.
    #[serde(default)]
    pub auth: AuthContext,
    /// Pod name.
    pub pod_name: String,
    /// Container name.
    pub container_name: String,
    /// Namespace.
    pub namespace: String,
    /// Script lines.
    pub script: Vec<String>,
    /// Hard timeout.
    pub timeout_secs: u64,
    /// Where stdout is captured inside the container.
    #[serde(default)]
    pub stdout_path: Option<String>,
    /// Where stderr is captured inside the container.
    #[serde(default)]
    pub stderr_path: Option<String>,
}
