//! [`ClusterGateway`] over kube-rs.
//!
//! Secrets, pods and services are written with server-side apply so a repeated
//! build against the same names replaces content instead of failing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Event, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, AttachedProcess, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::Client;
use kiln_core::PodEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::gateway::{ClusterGateway, ExecStream, PodEventStream};
use crate::pod::{build_pvc, build_service};
use crate::types::{DeleteResult, PodPhase, PodStatus};
use crate::{OrchestratorError, Result};

/// Waiting reasons that indicate a persistent error rather than start-up.
const CONTAINER_ERROR_REASONS: [&str; 7] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "CreateContainerError",
    "CreateContainerConfigError",
    "InvalidImageName",
    "RunContainerError",
];

/// Cluster gateway backed by a kube client.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    field_manager: String,
}

impl KubeGateway {
    /// Wrap a client. `field_manager` names the server-side apply owner.
    #[must_use]
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    async fn delete<K>(&self, api: Api<K>, kind: &str, name: &str) -> Result<DeleteResult>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind, name, "Deleted object");
                Ok(DeleteResult::Deleted)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind, name, "Object not found, already deleted");
                Ok(DeleteResult::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Persistent failure reported by a container or by scheduling, if any.
fn extract_container_error(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;

    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.type_ == "PodScheduled"
                && condition.status == "False"
                && condition.reason.as_deref() != Some("Unschedulable")
            {
                if let Some(msg) = &condition.message {
                    return Some(msg.clone());
                }
            }
        }
    }

    let container_statuses = status
        .init_container_statuses
        .as_ref()
        .into_iter()
        .flatten()
        .chain(status.container_statuses.as_ref().into_iter().flatten());

    for cs in container_statuses {
        let Some(state) = &cs.state else {
            continue;
        };

        if let Some(waiting) = &state.waiting {
            if let Some(reason) = &waiting.reason {
                if CONTAINER_ERROR_REASONS.contains(&reason.as_str()) {
                    let detail = waiting.message.as_deref().unwrap_or_default();
                    return Some(format!("{}: {reason} {detail}", cs.name).trim_end().to_string());
                }
            }
        }

        if let Some(terminated) = &state.terminated {
            if terminated.exit_code != 0 {
                let msg = terminated
                    .message
                    .clone()
                    .or_else(|| terminated.reason.clone())
                    .unwrap_or_else(|| format!("Exit code: {}", terminated.exit_code));
                return Some(format!("{}: {msg}", cs.name));
            }
        }
    }

    None
}

/// Last-seen state of the first non-running container, e.g. `ContainerCreating`.
fn extract_container_state(pod: &Pod) -> Option<String> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    statuses.iter().find_map(|cs| {
        let waiting = cs.state.as_ref()?.waiting.as_ref()?;
        let reason = waiting.reason.as_deref().unwrap_or("Waiting");
        Some(match &waiting.message {
            Some(msg) => format!("{}: {reason}: {msg}", cs.name),
            None => format!("{}: {reason}", cs.name),
        })
    })
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn extract_pod_status(pod: &Pod) -> PodStatus {
    let status = pod.status.as_ref();

    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from_k8s_phase)
        .unwrap_or_default();

    let restart_count = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first())
        .map_or(0, |c| c.restart_count.unsigned_abs());

    PodStatus {
        phase,
        ready: is_pod_ready(pod),
        restart_count,
        started_at: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        message: status.and_then(|s| s.message.clone()),
        container_state: extract_container_state(pod),
        container_error: extract_container_error(pod),
    }
}

fn to_pod_event(event: &Event, pod_name: &str, namespace: &str) -> PodEvent {
    PodEvent {
        pod_name: event
            .involved_object
            .name
            .clone()
            .unwrap_or_else(|| pod_name.to_string()),
        namespace: namespace.to_string(),
        event_type: event.type_.clone().unwrap_or_else(|| "Normal".to_string()),
        reason: event.reason.clone(),
        message: event.message.clone(),
        timestamp: event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0)),
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    fn backend(&self) -> &'static str {
        "kube"
    }

    async fn create_or_replace_secret(&self, secret: Secret, namespace: &str) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidArgument("secret has no name".into()))?;
        let api: Api<Secret> = self.api(namespace);
        let applied = api
            .patch(&name, &self.apply_params(), &Patch::Apply(&secret))
            .await?;
        debug!(name, namespace, "Applied secret");
        Ok(applied)
    }

    async fn create_or_replace_pod(&self, pod: Pod, namespace: &str) -> Result<Pod> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidArgument("pod has no name".into()))?;
        let api: Api<Pod> = self.api(namespace);
        let applied = api
            .patch(&name, &self.apply_params(), &Patch::Apply(&pod))
            .await
            .map_err(|e| OrchestratorError::PodCreationFailed(format!("{name}: {e}")))?;
        info!(pod_name = %name, namespace, "Applied pod");
        Ok(applied)
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        claim_name: &str,
        storage_class: Option<&str>,
        size_mib: u32,
    ) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = self.api(namespace);
        let pvc = build_pvc(namespace, claim_name, storage_class, size_mib);
        match api.create(&PostParams::default(), &pvc).await {
            Ok(_) => {
                info!(claim_name, namespace, size_mib, "Created persistent volume claim");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(claim_name, namespace, "Claim already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_service(
        &self,
        namespace: &str,
        service_name: &str,
        selector: &BTreeMap<String, String>,
        ports: &[u16],
    ) -> Result<()> {
        let api: Api<Service> = self.api(namespace);
        let service = build_service(namespace, service_name, selector, ports);
        api.patch(service_name, &self.apply_params(), &Patch::Apply(&service))
            .await?;
        info!(service_name, namespace, ?ports, "Applied service");
        Ok(())
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        self.delete(self.api::<Pod>(namespace), "pod", name).await
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        self.delete(self.api::<Service>(namespace), "service", name)
            .await
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        self.delete(self.api::<Secret>(namespace), "secret", name)
            .await
    }

    async fn list_secret_names(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>> {
        let api: Api<Secret> = self.api(namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|secret| secret.metadata.name)
            .collect())
    }

    async fn read_pod_status(&self, name: &str, namespace: &str) -> Result<Option<PodStatus>> {
        let api: Api<Pod> = self.api(namespace);
        Ok(api.get_opt(name).await?.as_ref().map(extract_pod_status))
    }

    async fn open_exec(
        &self,
        pod_name: &str,
        container_name: &str,
        namespace: &str,
    ) -> Result<Box<dyn ExecStream>> {
        let api: Api<Pod> = self.api(namespace);
        let params = AttachParams::default()
            .container(container_name)
            .stdin(true)
            .stdout(false)
            .stderr(false);

        let mut attached = api
            .exec(pod_name, vec!["sh"], &params)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref err) if err.code == 404 => {
                    OrchestratorError::PodNotFound(pod_name.to_string())
                }
                _ => OrchestratorError::Exec(format!("attach to {pod_name}/{container_name}: {e}")),
            })?;

        let stdin = attached
            .stdin()
            .map(|w| Box::new(w) as Box<dyn AsyncWrite + Send + Unpin>);
        let status = attached.take_status().map(FutureExt::boxed);

        debug!(pod_name, container_name, namespace, "Opened exec stream");
        Ok(Box::new(KubeExecStream {
            attached,
            stdin,
            status,
            closed: false,
        }))
    }

    async fn watch_pod_events(&self, pod_name: &str, namespace: &str) -> Result<PodEventStream> {
        let api: Api<Event> = self.api(namespace);
        let config = WatcherConfig::default().fields(&format!("involvedObject.name={pod_name}"));

        let pod_name = pod_name.to_string();
        let namespace = namespace.to_string();
        let stream = watcher(api, config)
            .default_backoff()
            .filter_map(move |event| {
                let mapped = match event {
                    Ok(watcher::Event::Apply(e) | watcher::Event::InitApply(e)) => {
                        Some(Ok(to_pod_event(&e, &pod_name, &namespace)))
                    }
                    Ok(watcher::Event::Init | watcher::Event::InitDone | watcher::Event::Delete(_)) => {
                        None
                    }
                    Err(e) => Some(Err(OrchestratorError::Watch(e.to_string()))),
                };
                futures::future::ready(mapped)
            })
            .boxed();

        Ok(stream)
    }
}

/// Exec session over the kube websocket attach.
struct KubeExecStream {
    attached: AttachedProcess,
    stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    status: Option<BoxFuture<'static, Option<Status>>>,
    closed: bool,
}

#[async_trait]
impl ExecStream for KubeExecStream {
    async fn submit(&mut self, script: &str) -> Result<()> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| OrchestratorError::Exec("stdin not available".into()))?;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| OrchestratorError::Exec(format!("write script: {e}")))?;
        if let Err(e) = stdin.shutdown().await {
            // The remote shell still sees EOF once the writer is dropped.
            debug!(error = %e, "Failed to shut down exec stdin");
        }
        Ok(())
    }

    async fn wait_for_completion(&mut self) -> Result<bool> {
        let status = self
            .status
            .take()
            .ok_or_else(|| OrchestratorError::Exec("status channel not available".into()))?;
        match status.await {
            Some(status) => {
                let success = status.status.as_deref() == Some("Success");
                if !success {
                    debug!(message = ?status.message, reason = ?status.reason, "Exec finished unsuccessfully");
                }
                Ok(success)
            }
            None => Err(OrchestratorError::Exec(
                "exec stream closed without reporting a status".into(),
            )),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stdin = None;
        self.status = None;
        self.attached.abort();
    }
}

impl Drop for KubeExecStream {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Exec stream dropped without close, aborting");
            self.attached.abort();
        }
    }
}
