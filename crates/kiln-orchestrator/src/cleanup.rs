//! Tearing a build environment down.

use std::collections::HashSet;
use std::sync::Arc;

use kiln_core::{CleanupRequest, TaskResult};
use tracing::{info, warn};

use crate::client::ClusterClientFactory;
use crate::error::{Stage, StageError};
use crate::gateway::ClusterGateway;
use crate::pod::{env_secret_name, POD_LABEL};
use crate::types::DeleteResult;
use crate::Result;

/// Tally of a cleanup run.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Objects deleted.
    pub deleted: usize,
    /// Objects that were already gone.
    pub not_found: usize,
    /// One line per failed deletion or listing.
    pub failures: Vec<String>,
}

impl CleanupReport {
    fn record(&mut self, kind: &str, name: &str, result: Result<DeleteResult>) {
        match result {
            Ok(DeleteResult::Deleted) => self.deleted += 1,
            Ok(DeleteResult::NotFound) => self.not_found += 1,
            Err(e) => {
                warn!(kind, name, error = %e, "Deletion failed");
                self.failures
                    .push(format!("{kind} {name}: {}: {e}", e.category()));
            }
        }
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold into a task result.
    #[must_use]
    pub fn into_result(self) -> TaskResult {
        if self.is_clean() {
            return TaskResult::success();
        }
        let attempted = self.deleted + self.not_found + self.failures.len();
        TaskResult::failure(format!(
            "[{}] {} of {attempted} deletions failed: {}",
            Stage::Cleanup,
            self.failures.len(),
            self.failures.join("; ")
        ))
    }
}

/// Deletes the objects of a build environment.
pub struct CleanupOrchestrator {
    factory: Arc<dyn ClusterClientFactory>,
}

impl CleanupOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(factory: Arc<dyn ClusterClientFactory>) -> Self {
        Self { factory }
    }

    /// Delete everything `request` names. Never fails past its own result;
    /// already-deleted objects count as success.
    pub async fn cleanup(&self, request: &CleanupRequest) -> TaskResult {
        let gateway = match self
            .factory
            .resolve(&request.connector, &request.auth)
            .await
        {
            Ok(gateway) => gateway,
            Err(e) => {
                return TaskResult::failure(
                    StageError::new(Stage::ClientResolution, e).to_string(),
                )
            }
        };

        let report = delete_all(gateway.as_ref(), request).await;
        info!(
            namespace = %request.namespace,
            deleted = report.deleted,
            not_found = report.not_found,
            failures = report.failures.len(),
            "Cleanup finished"
        );
        report.into_result()
    }
}

/// Attempt every deletion named by `request`: pods, services, then secrets.
pub async fn delete_all(gateway: &dyn ClusterGateway, request: &CleanupRequest) -> CleanupReport {
    let namespace = request.namespace.as_str();
    let mut report = CleanupReport::default();

    for pod in &request.pod_names {
        report.record("pod", pod, gateway.delete_pod(pod, namespace).await);
    }

    for service in &request.service_names {
        report.record(
            "service",
            service,
            gateway.delete_service(service, namespace).await,
        );
    }

    let mut secrets: Vec<String> = Vec::new();
    for pod in &request.pod_names {
        secrets.push(env_secret_name(pod));
        let selector = format!("{POD_LABEL}={pod}");
        match gateway.list_secret_names(namespace, &selector).await {
            Ok(names) => secrets.extend(names),
            Err(e) => {
                warn!(pod_name = %pod, error = %e, "Listing pod secrets failed");
                report
                    .failures
                    .push(format!("list secrets of {pod}: {}: {e}", e.category()));
            }
        }
    }
    secrets.extend(request.secret_names.iter().cloned());

    let mut seen = HashSet::new();
    for secret in secrets {
        if !seen.insert(secret.clone()) {
            continue;
        }
        report.record(
            "secret",
            &secret,
            gateway.delete_secret(&secret, namespace).await,
        );
    }

    report
}
