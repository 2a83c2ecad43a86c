//! The cluster gateway contract.
//!
//! [`ClusterGateway`] is the only way orchestration code touches a cluster.
//! It has two implementations: [`KubeGateway`](crate::KubeGateway) over
//! kube-rs, and an in-memory `MockGateway` (behind `test-utils`). The
//! polling and exec disciplines built on top of it live in
//! [`readiness`](crate::readiness) and [`exec`](crate::exec) so they are
//! shared by every backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kiln_core::PodEvent;

use crate::types::{DeleteResult, PodStatus};
use crate::Result;

/// Stream of pod events; ends when the underlying watch ends.
pub type PodEventStream = BoxStream<'static, Result<PodEvent>>;

/// A bidirectional exec session inside a container.
#[async_trait]
pub trait ExecStream: Send {
    /// Write the script to the shell's stdin and close stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream rejects the write.
    async fn submit(&mut self, script: &str) -> Result<()>;

    /// Resolve once the remote process exits: `true` on success.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream breaks before a status is reported.
    async fn wait_for_completion(&mut self) -> Result<bool>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&mut self);
}

/// Raw cluster operations needed to run build environments.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create a secret, replacing the content of an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn create_or_replace_secret(&self, secret: Secret, namespace: &str) -> Result<Secret>;

    /// Create a pod, replacing an existing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn create_or_replace_pod(&self, pod: Pod, namespace: &str) -> Result<Pod>;

    /// Create a persistent volume claim. An existing claim is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn create_pvc(
        &self,
        namespace: &str,
        claim_name: &str,
        storage_class: Option<&str>,
        size_mib: u32,
    ) -> Result<()>;

    /// Create or update a ClusterIP service.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn create_service(
        &self,
        namespace: &str,
        service_name: &str,
        selector: &BTreeMap<String, String>,
        ports: &[u16],
    ) -> Result<()>;

    /// Delete a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for any reason other than 404.
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<DeleteResult>;

    /// Delete a service.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for any reason other than 404.
    async fn delete_service(&self, name: &str, namespace: &str) -> Result<DeleteResult>;

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for any reason other than 404.
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<DeleteResult>;

    /// Names of secrets matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list_secret_names(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>>;

    /// Read a pod's status; `None` if the pod does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn read_pod_status(&self, name: &str, namespace: &str) -> Result<Option<PodStatus>>;

    /// Open a shell exec session in a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be established.
    async fn open_exec(
        &self,
        pod_name: &str,
        container_name: &str,
        namespace: &str,
    ) -> Result<Box<dyn ExecStream>>;

    /// Watch cluster events about one pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be opened.
    async fn watch_pod_events(&self, pod_name: &str, namespace: &str) -> Result<PodEventStream>;
}
