//! Error types for the orchestrator crate.

use std::fmt;

use thiserror::Error;

use crate::lifecycle::BuildState;

/// Errors that can occur while orchestrating build environments.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The cluster connector could not be turned into a working client.
    #[error("Cluster client resolution failed: {0}")]
    Resolution(String),

    /// A secret reference could not be decrypted.
    #[error("Secret decryption failed: {0}")]
    Decrypt(#[from] kiln_core::DecryptError),

    /// The request is malformed or inconsistent with its connectors.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A provider rejected a request that was well-formed on our side.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Pod not found in the cluster.
    #[error("Pod not found: {0}")]
    PodNotFound(String),

    /// Pod creation failed.
    #[error("Pod creation failed: {0}")]
    PodCreationFailed(String),

    /// The pod reached a failed state before running.
    #[error("Pod failed to start: {0}")]
    PodFailed(String),

    /// Timeout waiting on the cluster.
    #[error("Timeout waiting for pod: {0}")]
    Timeout(String),

    /// The operation was cancelled before it completed.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The pod event watch failed.
    #[error("Event watch failed: {0}")]
    Watch(String),

    /// The exec stream failed.
    #[error("Exec stream failed: {0}")]
    Exec(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid build state transition.
    #[error("Invalid build state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: BuildState,
        /// Attempted target state.
        to: BuildState,
    },
}

impl OrchestratorError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::KubeApi(_)
            | Self::InvalidRequest(_)
            | Self::Timeout(_)
            | Self::Watch(_)
            | Self::Exec(_) => true,
            Self::Decrypt(e) => e.is_retriable(),
            Self::Resolution(_)
            | Self::InvalidArgument(_)
            | Self::PodNotFound(_)
            | Self::PodCreationFailed(_)
            | Self::PodFailed(_)
            | Self::Interrupted(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. } => false,
        }
    }

    /// Stable category name, reported in failure messages.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::KubeApi(_) => "KubeApiError",
            Self::Resolution(_) => "ResolutionError",
            Self::Decrypt(_) => "DecryptError",
            Self::InvalidArgument(_) => "InvalidArgumentError",
            Self::InvalidRequest(_) => "InvalidRequestError",
            Self::PodNotFound(_) => "PodNotFoundError",
            Self::PodCreationFailed(_) => "PodCreationError",
            Self::PodFailed(_) => "PodFailedError",
            Self::Timeout(_) => "TimeoutError",
            Self::Interrupted(_) => "InterruptedError",
            Self::Watch(_) => "WatchError",
            Self::Exec(_) => "ExecError",
            Self::Config(_) => "ConfigError",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::PodNotFound(_) => 404,
            Self::InvalidArgument(_) | Self::Config(_) | Self::Resolution(_) => 400,
            Self::Decrypt(e) if !e.is_retriable() => 400,
            Self::PodCreationFailed(_)
            | Self::PodFailed(_)
            | Self::Exec(_)
            | Self::InvalidTransition { .. } => 500,
            Self::Timeout(_) => 504,
            Self::Interrupted(_) => 499,
            Self::KubeApi(_)
            | Self::Decrypt(_)
            | Self::InvalidRequest(_)
            | Self::Watch(_) => 503,
        }
    }
}

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Turning the connector into a cluster client.
    ClientResolution,
    /// Git, custom-variable and connector secrets.
    SecretBuild,
    /// Image pull secrets.
    Registry,
    /// PVCs, service pods, services and the primary pod.
    PodCreate,
    /// Waiting for the primary pod.
    Readiness,
    /// Command execution.
    Exec,
    /// Teardown.
    Cleanup,
}

impl Stage {
    /// Stable stage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientResolution => "client-resolution",
            Self::SecretBuild => "secret-build",
            Self::Registry => "registry",
            Self::PodCreate => "pod-create",
            Self::Readiness => "readiness",
            Self::Exec => "exec",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error tagged with the stage it occurred in.
#[derive(Error, Debug)]
#[error("[{stage}] {}: {source}", .source.category())]
pub struct StageError {
    /// Where it happened.
    pub stage: Stage,
    /// What happened.
    #[source]
    pub source: OrchestratorError,
}

impl StageError {
    /// Tag `source` with `stage`.
    #[must_use]
    pub const fn new(stage: Stage, source: OrchestratorError) -> Self {
        Self { stage, source }
    }
}

/// Extension for tagging results with a stage.
pub(crate) trait StageExt<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> StageExt<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}

/// A specialized Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_stage_and_category() {
        let err = StageError::new(
            Stage::Registry,
            OrchestratorError::InvalidArgument("image is not an ECR image".into()),
        );
        assert_eq!(
            err.to_string(),
            "[registry] InvalidArgumentError: Invalid argument: image is not an ECR image"
        );
    }

    #[test]
    fn configuration_errors_are_not_retriable() {
        assert!(!OrchestratorError::InvalidArgument("x".into()).is_retriable());
        assert!(!OrchestratorError::PodNotFound("x".into()).is_retriable());
        assert!(OrchestratorError::InvalidRequest("x".into()).is_retriable());
        assert!(OrchestratorError::Decrypt(kiln_core::DecryptError::Unavailable("x".into()))
            .is_retriable());
        assert!(!OrchestratorError::Decrypt(kiln_core::DecryptError::NotFound("x".into()))
            .is_retriable());
    }

    #[test]
    fn http_status_codes() {
        assert_eq!(OrchestratorError::PodNotFound("p".into()).http_status_code(), 404);
        assert_eq!(OrchestratorError::Timeout("p".into()).http_status_code(), 504);
        assert_eq!(
            OrchestratorError::Decrypt(kiln_core::DecryptError::NotFound("r".into()))
                .http_status_code(),
            400
        );
        assert_eq!(
            OrchestratorError::Decrypt(kiln_core::DecryptError::Unavailable("r".into()))
                .http_status_code(),
            503
        );
    }
}
