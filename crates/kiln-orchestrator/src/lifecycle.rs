//! Build environment state machine.
//!
//! ```text
//!   Init ──▶ ClientResolved ──▶ SecretsCreated ──▶ PodCreated ──▶ WatchStarted
//!    │             │                  │                 │               │
//!    │             │                  │                 │        ┌──────┴──────┐
//!    │             │                  │                 │        ▼             ▼
//!    └─────────────┴──────────────────┴─────────────────┴─────▶ Failed       Ready
//!                                                                  │             │
//!                                                                  └──▶ Done ◀───┘
//! ```
//!
//! A failed watch start still moves `PodCreated` to `WatchStarted`; the watch
//! is best-effort.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Where a build environment request is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Nothing done yet.
    Init,
    /// A cluster client is available.
    ClientResolved,
    /// Every secret of every pod exists.
    SecretsCreated,
    /// PVCs, service pods, services and the primary pod exist.
    PodCreated,
    /// The event watch was started, or starting it was attempted.
    WatchStarted,
    /// The primary pod is running.
    Ready,
    /// Some stage failed.
    Failed,
    /// The watch is stopped and the result is final.
    Done,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ClientResolved => "client_resolved",
            Self::SecretsCreated => "secrets_created",
            Self::PodCreated => "pod_created",
            Self::WatchStarted => "watch_started",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Check if a transition is allowed.
#[must_use]
pub const fn is_valid_transition(from: BuildState, to: BuildState) -> bool {
    use BuildState::{
        ClientResolved, Done, Failed, Init, PodCreated, Ready, SecretsCreated, WatchStarted,
    };

    matches!(
        (from, to),
        (Init, ClientResolved)
            | (ClientResolved, SecretsCreated)
            | (SecretsCreated, PodCreated)
            | (PodCreated, WatchStarted)
            | (WatchStarted, Ready)
            | (Init | ClientResolved | SecretsCreated | PodCreated | WatchStarted, Failed)
            | (Ready | Failed, Done)
    )
}

/// Validate a transition and return the target state.
///
/// # Errors
///
/// Returns `InvalidTransition` if the transition is not allowed.
pub fn validate_transition(from: BuildState, to: BuildState) -> Result<BuildState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(OrchestratorError::InvalidTransition { from, to })
    }
}

/// Returns true once no further work happens.
#[must_use]
pub const fn is_terminal(state: BuildState) -> bool {
    matches!(state, BuildState::Done)
}

/// Tracks the state of one build request.
#[derive(Debug)]
pub struct BuildProgress {
    pod_name: String,
    state: BuildState,
}

impl BuildProgress {
    /// Start tracking a build of `pod_name`.
    #[must_use]
    pub fn new(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            state: BuildState::Init,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BuildState {
        self.state
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the move is not allowed from the current state.
    pub fn advance(&mut self, to: BuildState) -> Result<()> {
        self.state = validate_transition(self.state, to)?;
        debug!(pod_name = %self.pod_name, state = %self.state, "Build state changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BuildState::*;

    #[test]
    fn happy_path() {
        let mut progress = BuildProgress::new("build-1");
        for state in [ClientResolved, SecretsCreated, PodCreated, WatchStarted, Ready, Done] {
            progress.advance(state).unwrap();
        }
        assert!(is_terminal(progress.state()));
    }

    #[test]
    fn every_working_state_can_fail() {
        for from in [Init, ClientResolved, SecretsCreated, PodCreated, WatchStarted] {
            assert!(is_valid_transition(from, Failed), "{from} -> failed");
        }
        assert!(is_valid_transition(Failed, Done));
    }

    #[test]
    fn invalid_transitions() {
        // Pods are never created before their secrets.
        assert!(!is_valid_transition(ClientResolved, PodCreated));
        assert!(!is_valid_transition(Init, Ready));
        assert!(!is_valid_transition(Ready, Failed));
        assert!(!is_valid_transition(Done, Init));
        assert!(!is_valid_transition(Failed, Ready));
    }

    #[test]
    fn validate_transition_err() {
        match validate_transition(SecretsCreated, Ready) {
            Err(OrchestratorError::InvalidTransition { from, to }) => {
                assert_eq!(from, SecretsCreated);
                assert_eq!(to, Ready);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
}
