//! In-memory collaborators for tests without a cluster.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kiln_core::{
    AuthContext, ClusterConnector, DecryptError, EncryptedRef, LogSink, Plaintext, PodEvent,
    SecretDecryptor,
};
use parking_lot::Mutex;

use crate::client::ClusterClientFactory;
use crate::gateway::{ClusterGateway, ExecStream, PodEventStream};
use crate::secrets::{AwsCredentials, EcrAuthorization, RegistryTokenExchange};
use crate::types::{DeleteResult, PodStatus};
use crate::{OrchestratorError, Result};

/// A gateway operation, recorded in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `create_or_replace_secret`
    CreateSecret(String),
    /// `create_or_replace_pod`
    CreatePod(String),
    /// `create_pvc`
    CreatePvc(String),
    /// `create_service`
    CreateService(String),
    /// `delete_pod`
    DeletePod(String),
    /// `delete_service`
    DeleteService(String),
    /// `delete_secret`
    DeleteSecret(String),
    /// `list_secret_names`, with the selector
    ListSecrets(String),
    /// `read_pod_status`
    ReadPodStatus(String),
    /// `open_exec`, with `pod/container`
    OpenExec(String),
    /// `watch_pod_events`
    WatchEvents(String),
}

/// How mock exec sessions behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecBehavior {
    /// Completes with success.
    #[default]
    Success,
    /// Completes with failure.
    Failure,
    /// Never completes.
    Hang,
    /// The stream breaks while waiting.
    StreamError,
    /// The session cannot be opened.
    OpenError,
}

#[derive(Debug, Clone)]
enum MockEvent {
    Event(PodEvent),
    Error(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<GatewayCall>,
    secrets: BTreeMap<(String, String), Secret>,
    pods: BTreeMap<(String, String), Pod>,
    services: BTreeMap<(String, String), Vec<u16>>,
    pvcs: BTreeSet<(String, String)>,
    statuses: HashMap<String, VecDeque<PodStatus>>,
    status_reads: HashMap<String, u32>,
    failing_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
    fail_list: bool,
    fail_watch: bool,
    exec_behavior: ExecBehavior,
    events: Vec<MockEvent>,
    events_end: bool,
}

/// A gateway that keeps objects in memory.
///
/// Pod statuses are only reported for pods given one via
/// [`push_pod_status`](Self::push_pod_status); every other pod reads as absent.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    exec_closes: Arc<AtomicUsize>,
    watch_drops: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<String>>>,
}

/// Counts event streams dropped by their consumer.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn api_error(code: u16, reason: &str, message: String) -> OrchestratorError {
    OrchestratorError::KubeApi(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn key(name: &str, namespace: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

impl MockGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status for `pod_name`. The last queued status repeats.
    pub fn push_pod_status(&self, pod_name: &str, status: PodStatus) {
        self.state
            .lock()
            .statuses
            .entry(pod_name.to_string())
            .or_default()
            .push_back(status);
    }

    /// Make creation of the named object fail with a 403.
    pub fn fail_create(&self, name: &str) {
        self.state.lock().failing_creates.insert(name.to_string());
    }

    /// Make deletion of the named object fail with a 500.
    pub fn fail_delete(&self, name: &str) {
        self.state.lock().failing_deletes.insert(name.to_string());
    }

    /// Make secret listing fail.
    pub fn fail_list(&self) {
        self.state.lock().fail_list = true;
    }

    /// Make opening the event watch fail.
    pub fn fail_watch(&self) {
        self.state.lock().fail_watch = true;
    }

    /// Set how exec sessions behave.
    pub fn set_exec_behavior(&self, behavior: ExecBehavior) {
        self.state.lock().exec_behavior = behavior;
    }

    /// Queue an event for watches opened later.
    pub fn push_event(&self, event: PodEvent) {
        self.state.lock().events.push(MockEvent::Event(event));
    }

    /// Queue a watch error for watches opened later.
    pub fn push_event_error(&self, message: &str) {
        self.state
            .lock()
            .events
            .push(MockEvent::Error(message.to_string()));
    }

    /// End event streams after the queued events instead of staying open.
    pub fn set_events_end(&self, end: bool) {
        self.state.lock().events_end = end;
    }

    /// Insert a secret directly, bypassing the call log.
    pub fn insert_secret(&self, secret: Secret, namespace: &str) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.state.lock().secrets.insert(key(&name, namespace), secret);
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    /// Stored secret.
    #[must_use]
    pub fn secret(&self, name: &str, namespace: &str) -> Option<Secret> {
        self.state.lock().secrets.get(&key(name, namespace)).cloned()
    }

    /// Names of stored secrets in a namespace.
    #[must_use]
    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Stored pod.
    #[must_use]
    pub fn pod(&self, name: &str, namespace: &str) -> Option<Pod> {
        self.state.lock().pods.get(&key(name, namespace)).cloned()
    }

    /// Ports of a stored service.
    #[must_use]
    pub fn service_ports(&self, name: &str, namespace: &str) -> Option<Vec<u16>> {
        self.state.lock().services.get(&key(name, namespace)).cloned()
    }

    /// Returns true if the claim exists.
    #[must_use]
    pub fn has_pvc(&self, name: &str, namespace: &str) -> bool {
        self.state.lock().pvcs.contains(&key(name, namespace))
    }

    /// Number of status reads for a pod.
    #[must_use]
    pub fn status_reads(&self, pod_name: &str) -> u32 {
        self.state
            .lock()
            .status_reads
            .get(pod_name)
            .copied()
            .unwrap_or_default()
    }

    /// Number of exec sessions closed.
    #[must_use]
    pub fn exec_closes(&self) -> usize {
        self.exec_closes.load(Ordering::SeqCst)
    }

    /// Number of event streams dropped.
    #[must_use]
    pub fn watch_drops(&self) -> usize {
        self.watch_drops.load(Ordering::SeqCst)
    }

    /// Scripts submitted to exec sessions.
    #[must_use]
    pub fn submitted_scripts(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    fn check_create(state: &MockState, name: &str) -> Result<()> {
        if state.failing_creates.contains(name) {
            return Err(api_error(403, "Forbidden", format!("creating {name} is forbidden")));
        }
        Ok(())
    }

    fn delete_in<V>(
        map: &mut BTreeMap<(String, String), V>,
        failing: &HashSet<String>,
        name: &str,
        namespace: &str,
    ) -> Result<DeleteResult> {
        if failing.contains(name) {
            return Err(api_error(500, "InternalError", format!("deleting {name} failed")));
        }
        Ok(match map.remove(&key(name, namespace)) {
            Some(_) => DeleteResult::Deleted,
            None => DeleteResult::NotFound,
        })
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    fn backend(&self) -> &'static str {
        "mock"
    }

    async fn create_or_replace_secret(&self, secret: Secret, namespace: &str) -> Result<Secret> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::CreateSecret(name.clone()));
        Self::check_create(&state, &name)?;
        state.secrets.insert(key(&name, namespace), secret.clone());
        Ok(secret)
    }

    async fn create_or_replace_pod(&self, pod: Pod, namespace: &str) -> Result<Pod> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::CreatePod(name.clone()));
        if state.failing_creates.contains(&name) {
            return Err(OrchestratorError::PodCreationFailed(format!(
                "{name}: admission webhook denied the request"
            )));
        }
        state.pods.insert(key(&name, namespace), pod.clone());
        Ok(pod)
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        claim_name: &str,
        _storage_class: Option<&str>,
        _size_mib: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::CreatePvc(claim_name.to_string()));
        Self::check_create(&state, claim_name)?;
        state.pvcs.insert(key(claim_name, namespace));
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service_name: &str,
        _selector: &BTreeMap<String, String>,
        ports: &[u16],
    ) -> Result<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(GatewayCall::CreateService(service_name.to_string()));
        Self::check_create(&state, service_name)?;
        state
            .services
            .insert(key(service_name, namespace), ports.to_vec());
        Ok(())
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::DeletePod(name.to_string()));
        let MockState {
            pods,
            failing_deletes,
            ..
        } = &mut *state;
        Self::delete_in(pods, failing_deletes, name, namespace)
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::DeleteService(name.to_string()));
        let MockState {
            services,
            failing_deletes,
            ..
        } = &mut *state;
        Self::delete_in(services, failing_deletes, name, namespace)
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<DeleteResult> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::DeleteSecret(name.to_string()));
        let MockState {
            secrets,
            failing_deletes,
            ..
        } = &mut *state;
        Self::delete_in(secrets, failing_deletes, name, namespace)
    }

    async fn list_secret_names(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        state
            .calls
            .push(GatewayCall::ListSecrets(label_selector.to_string()));
        if state.fail_list {
            return Err(api_error(500, "InternalError", "listing secrets failed".into()));
        }
        Ok(state
            .secrets
            .iter()
            .filter(|((ns, _), secret)| {
                ns == namespace && selector_matches(label_selector, secret.metadata.labels.as_ref())
            })
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn read_pod_status(&self, name: &str, _namespace: &str) -> Result<Option<PodStatus>> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::ReadPodStatus(name.to_string()));
        *state.status_reads.entry(name.to_string()).or_default() += 1;

        let Some(queue) = state.statuses.get_mut(name) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front())
        } else {
            Ok(queue.front().cloned())
        }
    }

    async fn open_exec(
        &self,
        pod_name: &str,
        container_name: &str,
        _namespace: &str,
    ) -> Result<Box<dyn ExecStream>> {
        let behavior = {
            let mut state = self.state.lock();
            state
                .calls
                .push(GatewayCall::OpenExec(format!("{pod_name}/{container_name}")));
            state.exec_behavior
        };
        if behavior == ExecBehavior::OpenError {
            return Err(OrchestratorError::Exec(format!(
                "container {container_name} not found in {pod_name}"
            )));
        }
        Ok(Box::new(MockExecStream {
            behavior,
            closes: Arc::clone(&self.exec_closes),
            submitted: Arc::clone(&self.submitted),
            closed: false,
        }))
    }

    async fn watch_pod_events(&self, pod_name: &str, _namespace: &str) -> Result<PodEventStream> {
        let mut state = self.state.lock();
        state
            .calls
            .push(GatewayCall::WatchEvents(pod_name.to_string()));
        if state.fail_watch {
            return Err(OrchestratorError::Watch("events API unavailable".into()));
        }

        let items: Vec<Result<PodEvent>> = state
            .events
            .iter()
            .cloned()
            .map(|event| match event {
                MockEvent::Event(e) => Ok(e),
                MockEvent::Error(msg) => Err(OrchestratorError::Watch(msg)),
            })
            .collect();

        let events = stream::iter(items);
        let events = if state.events_end {
            events.boxed()
        } else {
            events.chain(stream::pending()).boxed()
        };
        let guard = DropCounter(Arc::clone(&self.watch_drops));
        Ok(events
            .map(move |item| {
                let _counted = &guard;
                item
            })
            .boxed())
    }
}

struct MockExecStream {
    behavior: ExecBehavior,
    closes: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl ExecStream for MockExecStream {
    async fn submit(&mut self, script: &str) -> Result<()> {
        self.submitted.lock().push(script.to_string());
        Ok(())
    }

    async fn wait_for_completion(&mut self) -> Result<bool> {
        match self.behavior {
            ExecBehavior::Success => Ok(true),
            ExecBehavior::Failure => Ok(false),
            ExecBehavior::Hang => futures::future::pending().await,
            ExecBehavior::StreamError | ExecBehavior::OpenError => {
                Err(OrchestratorError::Exec("websocket closed unexpectedly".into()))
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A decryptor backed by a map from reference to plaintext.
#[derive(Default)]
pub struct MockDecryptor {
    secrets: HashMap<String, String>,
    unavailable: bool,
    calls: Mutex<Vec<String>>,
}

impl MockDecryptor {
    /// Create an empty decryptor; every reference is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plaintext for a reference.
    #[must_use]
    pub fn with_secret(mut self, reference: &str, plaintext: &str) -> Self {
        self.secrets
            .insert(reference.to_string(), plaintext.to_string());
        self
    }

    /// Fail every call as if the backend were down.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// References decrypted so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SecretDecryptor for MockDecryptor {
    async fn decrypt(&self, value: &EncryptedRef, _ctx: &AuthContext) -> kiln_core::Result<Plaintext> {
        self.calls.lock().push(value.to_string());
        if self.unavailable {
            return Err(DecryptError::Unavailable("mock backend down".into()));
        }
        self.secrets
            .get(value.as_str())
            .map(|s| Plaintext::new(s.as_str()))
            .ok_or_else(|| DecryptError::NotFound(value.to_string()))
    }
}

/// A token exchange returning a fixed token, or rejecting every request.
#[derive(Default)]
pub struct MockTokenExchange {
    token: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockTokenExchange {
    /// Create an exchange that rejects every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `token`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `(account, region)` of every request.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RegistryTokenExchange for MockTokenExchange {
    async fn ecr_authorization(
        &self,
        _credentials: &AwsCredentials,
        account: &str,
        region: &str,
    ) -> Result<EcrAuthorization> {
        self.calls
            .lock()
            .push((account.to_string(), region.to_string()));
        self.token
            .clone()
            .map(|token| EcrAuthorization {
                token,
                proxy_endpoint: None,
            })
            .ok_or_else(|| {
                OrchestratorError::InvalidRequest("UnrecognizedClientException".into())
            })
    }
}

/// A sink that records every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PodEvent>>,
    notify: tokio::sync::Notify,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events pushed so far.
    #[must_use]
    pub fn events(&self) -> Vec<PodEvent> {
        self.events.lock().clone()
    }

    /// Wait until at least `count` events were pushed.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds.
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        assert!(
            tokio::time::timeout(Duration::from_secs(5), wait).await.is_ok(),
            "expected {count} events"
        );
    }
}

impl LogSink for RecordingSink {
    fn push(&self, event: PodEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

/// A factory handing out one shared mock gateway.
pub struct MockFactory {
    gateway: Arc<MockGateway>,
    failure: Option<String>,
    resolves: AtomicUsize,
}

impl MockFactory {
    /// Resolve every connector to `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<MockGateway>) -> Self {
        Self {
            gateway,
            failure: None,
            resolves: AtomicUsize::new(0),
        }
    }

    /// Fail every resolution with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            gateway: Arc::new(MockGateway::new()),
            failure: Some(message.to_string()),
            resolves: AtomicUsize::new(0),
        }
    }

    /// Number of resolutions attempted.
    #[must_use]
    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClientFactory for MockFactory {
    async fn resolve(
        &self,
        _connector: &ClusterConnector,
        _ctx: &AuthContext,
    ) -> Result<Arc<dyn ClusterGateway>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(OrchestratorError::Resolution(message.clone()));
        }
        Ok(self.gateway.clone())
    }
}
