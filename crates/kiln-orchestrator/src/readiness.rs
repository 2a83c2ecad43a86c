//! Waiting for a pod to reach Running.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::gateway::ClusterGateway;
use crate::types::{PodReadiness, ReadinessState, MIN_POLL_INTERVAL_SECS};
use crate::{OrchestratorError, Result};

/// Poll `pod_name` every `interval` until it runs, fails, or `timeout` elapses.
/// Intervals shorter than a second are raised to one second.
///
/// A pod that is absent on any read is reported as [`OrchestratorError::PodNotFound`]
/// without retrying.
///
/// # Errors
///
/// Returns `PodNotFound` for an absent pod, `Interrupted` if `cancel` fires,
/// and any gateway error from reading the status.
pub async fn wait_until_pod_is_ready(
    gateway: &dyn ClusterGateway,
    clock: &dyn Clock,
    pod_name: &str,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<PodReadiness> {
    let interval = interval.max(Duration::from_secs(MIN_POLL_INTERVAL_SECS));
    let started = clock.now();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Interrupted(format!(
                "readiness wait for {pod_name} cancelled"
            )));
        }

        attempts += 1;
        let status = gateway
            .read_pod_status(pod_name, namespace)
            .await?
            .ok_or_else(|| OrchestratorError::PodNotFound(format!("{namespace}/{pod_name}")))?;

        let readiness = PodReadiness::observe(&status);
        match readiness.state {
            ReadinessState::Running => {
                info!(pod_name, namespace, attempts, "Pod is running");
                return Ok(readiness);
            }
            ReadinessState::Error => {
                warn!(
                    pod_name,
                    namespace,
                    phase = ?status.phase,
                    message = ?readiness.message,
                    "Pod failed before becoming ready"
                );
                return Ok(readiness);
            }
            ReadinessState::Pending => {}
        }

        let elapsed = clock.now().saturating_sub(started);
        if elapsed >= timeout {
            warn!(pod_name, namespace, attempts, ?elapsed, "Timed out waiting for pod");
            return Ok(PodReadiness::timed_out(readiness.message));
        }

        debug!(
            pod_name,
            state = ?readiness.message,
            attempts,
            "Pod not ready yet"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(OrchestratorError::Interrupted(format!(
                    "readiness wait for {pod_name} cancelled"
                )));
            }
            () = clock.sleep(interval.min(timeout - elapsed)) => {}
        }
    }
}
