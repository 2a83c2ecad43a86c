//! Standing up a build environment.
//!
//! One request runs sequentially: resolve the cluster, stage every secret,
//! create claims, service pods and the primary pod, watch its events while
//! waiting for it to run. Nothing is rolled back on failure; teardown is the
//! job of [`CleanupOrchestrator`](crate::CleanupOrchestrator).

use std::sync::Arc;

use kiln_core::{
    BuildEnvironmentRequest, ImageDetailsWithConnector, LogSink, PodDescriptor, RegistryConnector,
    SecretDecryptor, TaskResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClusterClientFactory;
use crate::clock::{Clock, TokioClock};
use crate::error::{Stage, StageError, StageExt};
use crate::gateway::ClusterGateway;
use crate::lifecycle::{BuildProgress, BuildState};
use crate::pod::{
    build_pod, env_secret_name, own_secret, registry_secret_name, PodSecretRefs, SecretEnvRef,
};
use crate::readiness::wait_until_pod_is_ready;
use crate::secrets::{build_env_secret, CredentialSecretBuilder, RegistryTokenExchange};
use crate::types::{OrchestratorConfig, PodReadiness};
use crate::watcher::PodEventWatcher;
use crate::OrchestratorError;

type StageResult<T> = std::result::Result<T, StageError>;

/// Identity of a pull secret: one per connector and registry.
type RegistryKey = (Option<RegistryConnector>, String, Option<String>);

fn registry_key(image: &ImageDetailsWithConnector) -> RegistryKey {
    (
        image.connector.clone(),
        image.image.registry_host(),
        image.image.username.clone(),
    )
}

/// Runs build environment requests.
pub struct BuildEnvironmentOrchestrator {
    factory: Arc<dyn ClusterClientFactory>,
    decryptor: Arc<dyn SecretDecryptor>,
    token_exchange: Arc<dyn RegistryTokenExchange>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    watcher: PodEventWatcher,
    cancel: CancellationToken,
}

impl BuildEnvironmentOrchestrator {
    /// Create an orchestrator using the tokio clock.
    #[must_use]
    pub fn new(
        factory: Arc<dyn ClusterClientFactory>,
        decryptor: Arc<dyn SecretDecryptor>,
        token_exchange: Arc<dyn RegistryTokenExchange>,
        config: OrchestratorConfig,
    ) -> Self {
        let watcher = PodEventWatcher::new(config.watch_stop_timeout());
        Self {
            factory,
            decryptor,
            token_exchange,
            clock: Arc::new(TokioClock::new()),
            config,
            watcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `clock` for readiness polling.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Abort in-flight waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stand up the environment described by `request`, relaying the primary
    /// pod's events to `sink` while it starts.
    pub async fn initialize(
        &self,
        request: &BuildEnvironmentRequest,
        sink: Arc<dyn LogSink>,
    ) -> TaskResult {
        let pod = &request.pod;
        let mut progress = BuildProgress::new(pod.name.clone());

        info!(
            pod_name = %pod.name,
            namespace = %pod.namespace,
            service_pods = request.service_pods.len(),
            "Initializing build environment"
        );

        let result = self.run(request, sink, &mut progress).await;

        let outcome = match result {
            Ok(()) => {
                info!(pod_name = %pod.name, namespace = %pod.namespace, "Build environment ready");
                TaskResult::success()
            }
            Err(e) => {
                error!(
                    pod_name = %pod.name,
                    namespace = %pod.namespace,
                    stage = %e.stage,
                    error = %e.source,
                    "Build environment failed"
                );
                if progress.state() != BuildState::Failed {
                    if let Err(err) = progress.advance(BuildState::Failed) {
                        warn!(error = %err, "Could not record failure");
                    }
                }
                TaskResult::failure(e.to_string())
            }
        };

        if let Err(e) = progress.advance(BuildState::Done) {
            warn!(pod_name = %pod.name, error = %e, "Could not finish build state");
        }
        outcome
    }

    async fn run(
        &self,
        request: &BuildEnvironmentRequest,
        sink: Arc<dyn LogSink>,
        progress: &mut BuildProgress,
    ) -> StageResult<()> {
        let pod = &request.pod;

        let gateway = self
            .factory
            .resolve(&request.connector, &request.auth)
            .await
            .at(Stage::ClientResolution)?;
        progress
            .advance(BuildState::ClientResolved)
            .at(Stage::ClientResolution)?;
        debug!(pod_name = %pod.name, backend = gateway.backend(), "Cluster client resolved");

        let builder = CredentialSecretBuilder::new(
            self.decryptor.as_ref(),
            self.token_exchange.as_ref(),
            &request.auth,
        );
        let primary_refs = self.stage_secrets(gateway.as_ref(), &builder, pod).await?;
        let mut service_refs = Vec::with_capacity(request.service_pods.len());
        for service in &request.service_pods {
            service_refs.push(
                self.stage_secrets(gateway.as_ref(), &builder, &service.pod)
                    .await?,
            );
        }
        progress
            .advance(BuildState::SecretsCreated)
            .at(Stage::SecretBuild)?;

        self.create_objects(gateway.as_ref(), request, &primary_refs, &service_refs)
            .await
            .at(Stage::PodCreate)?;
        progress
            .advance(BuildState::PodCreated)
            .at(Stage::PodCreate)?;

        let watch = match self
            .watcher
            .start(gateway.as_ref(), &pod.namespace, &pod.name, sink)
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(pod_name = %pod.name, error = %e, "Could not start event watch, continuing");
                None
            }
        };

        let readiness = match progress.advance(BuildState::WatchStarted) {
            Ok(()) => self.await_ready(gateway.as_ref(), request).await,
            Err(e) => Err(e),
        };

        if let Some(handle) = watch {
            self.watcher.stop(handle).await;
        }

        readiness.at(Stage::Readiness)?;
        progress.advance(BuildState::Ready).at(Stage::Readiness)
    }

    async fn await_ready(
        &self,
        gateway: &dyn ClusterGateway,
        request: &BuildEnvironmentRequest,
    ) -> crate::Result<()> {
        let pod = &request.pod;
        let timeout = self.config.readiness_timeout(request.readiness_timeout_secs);

        let readiness: PodReadiness = wait_until_pod_is_ready(
            gateway,
            self.clock.as_ref(),
            &pod.name,
            &pod.namespace,
            timeout,
            self.config.poll_interval(),
            &self.cancel,
        )
        .await?;

        if readiness.is_running() {
            return Ok(());
        }

        let detail = readiness
            .message
            .map_or_else(String::new, |m| format!(" (last state: {m})"));
        if readiness.timed_out {
            Err(OrchestratorError::Timeout(format!(
                "{}/{} not running after {}s{detail}",
                pod.namespace,
                pod.name,
                timeout.as_secs()
            )))
        } else {
            Err(OrchestratorError::PodFailed(format!(
                "{}/{}{detail}",
                pod.namespace, pod.name
            )))
        }
    }

    /// Create git, registry and env secrets for one pod.
    async fn stage_secrets(
        &self,
        gateway: &dyn ClusterGateway,
        builder: &CredentialSecretBuilder<'_>,
        pod: &PodDescriptor,
    ) -> StageResult<PodSecretRefs> {
        let mut refs = PodSecretRefs::default();

        if let Some(git) = &pod.git_connector {
            let secret = builder
                .build_git_secret(git, &pod.namespace)
                .await
                .at(Stage::SecretBuild)?;
            let applied = gateway
                .create_or_replace_secret(secret, &pod.namespace)
                .await
                .at(Stage::SecretBuild)?;
            refs.git_secret = applied.metadata.name;
        }

        let mut seen: Vec<RegistryKey> = Vec::new();
        for container in &pod.containers {
            let key = registry_key(&container.image);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);

            let name = registry_secret_name(&pod.name, refs.image_pull_secrets.len());
            let Some(mut secret) = builder
                .build_registry_secret(&name, &container.image, &pod.namespace)
                .await
                .at(Stage::Registry)?
            else {
                continue;
            };
            own_secret(&mut secret, &pod.name);
            gateway
                .create_or_replace_secret(secret, &pod.namespace)
                .await
                .at(Stage::Registry)?;
            refs.image_pull_secrets.push(name);
        }

        let mut entries = std::collections::BTreeMap::new();
        for container in &pod.containers {
            let staged = builder
                .stage_container_secrets(container)
                .await
                .at(Stage::SecretBuild)?;
            for (env_name, key, material) in staged {
                // Containers may reuse a variable name with different values.
                let key = format!("{}.{key}", container.name);
                refs.env_refs
                    .entry(container.name.clone())
                    .or_default()
                    .push(SecretEnvRef {
                        env_name,
                        key: key.clone(),
                    });
                entries.insert(key, material);
            }
        }

        if !entries.is_empty() {
            let name = env_secret_name(&pod.name);
            let secret = build_env_secret(&name, &pod.namespace, &pod.name, &entries);
            gateway
                .create_or_replace_secret(secret, &pod.namespace)
                .await
                .at(Stage::SecretBuild)?;
            refs.env_secret = Some(name);
        }

        debug!(
            pod_name = %pod.name,
            pull_secrets = refs.image_pull_secrets.len(),
            git = refs.git_secret.is_some(),
            env_entries = entries.len(),
            "Staged pod secrets"
        );
        Ok(refs)
    }

    async fn create_objects(
        &self,
        gateway: &dyn ClusterGateway,
        request: &BuildEnvironmentRequest,
        primary_refs: &PodSecretRefs,
        service_refs: &[PodSecretRefs],
    ) -> crate::Result<()> {
        let pods = std::iter::once(&request.pod).chain(request.service_pods.iter().map(|s| &s.pod));
        for pod in pods {
            for claim in &pod.volume_claims {
                gateway
                    .create_pvc(
                        &pod.namespace,
                        &claim.claim_name,
                        claim.storage_class.as_deref(),
                        claim.size_mib,
                    )
                    .await?;
            }
        }

        for (service, refs) in request.service_pods.iter().zip(service_refs) {
            gateway
                .create_or_replace_pod(build_pod(&service.pod, refs), &service.pod.namespace)
                .await?;
            gateway
                .create_service(
                    &service.pod.namespace,
                    &service.service_name,
                    &service.selector,
                    &service.ports,
                )
                .await?;
        }

        gateway
            .create_or_replace_pod(build_pod(&request.pod, primary_refs), &request.pod.namespace)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::mock::{GatewayCall, MockDecryptor, MockFactory, MockGateway, MockTokenExchange, RecordingSink};
    use crate::pod::POD_LABEL;
    use crate::secrets::git_secret_name;
    use crate::types::{PodPhase, PodStatus};
    use kiln_core::{
        ClusterConnector, ContainerDescriptor, EncryptedRef, GitAuth, GitConnector, ImageDetails,
        SecretKind, SecretVariable, ServicePodDescriptor, TaskStatus,
    };

    struct Harness {
        gateway: Arc<MockGateway>,
        factory: Arc<MockFactory>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        orchestrator: BuildEnvironmentOrchestrator,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MockGateway::new());
        let clock = Arc::new(ManualClock::new());
        let decryptor = MockDecryptor::new()
            .with_secret("acct/docker-pass", "s3cret")
            .with_secret("acct/git-pass", "ghp_token")
            .with_secret("acct/npm", "npm-token")
            .with_secret("acct/a", "value-for-a")
            .with_secret("acct/b", "value-for-b");
        let factory = Arc::new(MockFactory::new(gateway.clone()));
        let orchestrator = BuildEnvironmentOrchestrator::new(
            factory.clone(),
            Arc::new(decryptor),
            Arc::new(MockTokenExchange::new()),
            OrchestratorConfig::default(),
        )
        .with_clock(clock.clone());

        Harness {
            gateway,
            factory,
            clock,
            sink: Arc::new(RecordingSink::new()),
            orchestrator,
        }
    }

    fn request(pod: PodDescriptor) -> BuildEnvironmentRequest {
        BuildEnvironmentRequest {
            connector: ClusterConnector::in_cluster(),
            auth: kiln_core::AuthContext::new("acct"),
            pod,
            service_pods: Vec::new(),
            readiness_timeout_secs: 100,
            log_key: None,
        }
    }

    fn simple_pod() -> PodDescriptor {
        PodDescriptor::new("build-1", "ci")
            .with_container(ContainerDescriptor::step("step-1", ImageDetails::parse("alpine:3.19")))
    }

    fn docker_step(name: &str) -> ContainerDescriptor {
        ContainerDescriptor::step(name, ImageDetails::parse("registry.example.com/app:1")).with_registry(
            RegistryConnector::Docker {
                url: "https://registry.example.com".into(),
                username: "ci".into(),
                password: EncryptedRef::new("acct/docker-pass"),
            },
        )
    }

    fn git() -> GitConnector {
        GitConnector {
            url: "https://github.com/acme/widgets.git".into(),
            auth: GitAuth::Http {
                username: "bot".into(),
                password: EncryptedRef::new("acct/git-pass"),
            },
        }
    }

    fn position(calls: &[GatewayCall], wanted: &GatewayCall) -> usize {
        calls
            .iter()
            .position(|c| c == wanted)
            .unwrap_or_else(|| panic!("{wanted:?} not called in {calls:?}"))
    }

    #[tokio::test]
    async fn running_on_first_read_succeeds() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));

        let result = h.orchestrator.initialize(&request(simple_pod()), h.sink.clone()).await;

        assert_eq!(result, TaskResult::success());
        assert_eq!(h.factory.resolves(), 1);
        assert!(h.clock.sleeps().is_empty());
        assert!(h.gateway.pod("build-1", "ci").is_some());
        assert_eq!(h.gateway.watch_drops(), 1);
        // No registry or git connector, so no secrets.
        assert!(h.gateway.secret_names("ci").is_empty());
    }

    #[tokio::test]
    async fn pod_that_never_appears_fails_with_not_found() {
        let h = harness();

        let result = h.orchestrator.initialize(&request(simple_pod()), h.sink.clone()).await;

        assert_eq!(result.status, TaskStatus::Failure);
        let message = result.message.unwrap();
        assert!(message.starts_with("[readiness] PodNotFoundError"), "{message}");
        assert_eq!(h.gateway.status_reads("build-1"), 1);
        assert_eq!(h.gateway.watch_drops(), 1);
    }

    #[tokio::test]
    async fn secrets_are_created_before_the_pod() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));
        let pod = PodDescriptor::new("build-1", "ci")
            .with_container(docker_step("step-1"))
            .with_git(git());

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;
        assert!(result.is_success(), "{result:?}");

        let calls = h.gateway.calls();
        let git_secret = position(&calls, &GatewayCall::CreateSecret(git_secret_name(&git().url)));
        let registry = position(&calls, &GatewayCall::CreateSecret("build-1-registry-0".into()));
        let pod_create = position(&calls, &GatewayCall::CreatePod("build-1".into()));
        assert!(git_secret < pod_create);
        assert!(registry < pod_create);

        let pod = h.gateway.pod("build-1", "ci").unwrap();
        let spec = pod.spec.unwrap();
        assert_eq!(spec.image_pull_secrets.unwrap()[0].name, "build-1-registry-0");

        let registry_secret = h.gateway.secret("build-1-registry-0", "ci").unwrap();
        assert_eq!(
            registry_secret.metadata.labels.unwrap().get(POD_LABEL),
            Some(&"build-1".to_string())
        );
    }

    #[tokio::test]
    async fn one_registry_secret_per_distinct_connector() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));
        let pod = PodDescriptor::new("build-1", "ci")
            .with_container(docker_step("step-1"))
            .with_container(docker_step("step-2"))
            .with_container(ContainerDescriptor::step("lint", ImageDetails::parse("alpine")));

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;
        assert!(result.is_success());

        let creates = h
            .gateway
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::CreateSecret(_)))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn registry_secret_failure_skips_pod_creation() {
        let h = harness();
        h.gateway.fail_create("build-1-registry-0");
        let pod = PodDescriptor::new("build-1", "ci").with_container(docker_step("step-1"));

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;

        assert_eq!(result.status, TaskStatus::Failure);
        assert!(result.message.unwrap().starts_with("[registry] KubeApiError"));
        assert!(!h
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::CreatePod(_))));
    }

    #[tokio::test]
    async fn resolution_failure_is_reported() {
        let orchestrator = BuildEnvironmentOrchestrator::new(
            Arc::new(MockFactory::failing("certificate verify failed")),
            Arc::new(MockDecryptor::new()),
            Arc::new(MockTokenExchange::new()),
            OrchestratorConfig::default(),
        );

        let result = orchestrator
            .initialize(&request(simple_pod()), Arc::new(RecordingSink::new()))
            .await;
        assert_eq!(
            result.message.as_deref(),
            Some("[client-resolution] ResolutionError: Cluster client resolution failed: certificate verify failed")
        );
    }

    #[tokio::test]
    async fn undecryptable_variable_fails_secret_build() {
        let h = harness();
        let step = ContainerDescriptor::step("step-1", ImageDetails::parse("node:20")).with_secret_variable(
            SecretVariable {
                name: "MISSING".into(),
                kind: SecretKind::Text,
                value: EncryptedRef::new("acct/missing"),
            },
        );
        let pod = PodDescriptor::new("build-1", "ci").with_container(step);

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;
        assert!(result.message.unwrap().starts_with("[secret-build] DecryptError"));
    }

    #[tokio::test]
    async fn unavailable_decryptor_fails_secret_build() {
        let gateway = Arc::new(MockGateway::new());
        let orchestrator = BuildEnvironmentOrchestrator::new(
            Arc::new(MockFactory::new(gateway.clone())),
            Arc::new(MockDecryptor::new().unavailable()),
            Arc::new(MockTokenExchange::new()),
            OrchestratorConfig::default(),
        );
        let pod = PodDescriptor::new("build-1", "ci").with_container(docker_step("step-1"));

        let result = orchestrator
            .initialize(&request(pod), Arc::new(RecordingSink::new()))
            .await;

        let message = result.message.unwrap();
        assert!(message.starts_with("[registry] DecryptError"), "{message}");
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::CreatePod(_))));
    }

    #[tokio::test]
    async fn containers_sharing_a_variable_name_keep_their_own_values() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));
        let token = |reference: &str| SecretVariable {
            name: "TOKEN".into(),
            kind: SecretKind::Text,
            value: EncryptedRef::new(reference),
        };
        let pod = PodDescriptor::new("build-1", "ci")
            .with_container(
                ContainerDescriptor::step("a", ImageDetails::parse("alpine")).with_secret_variable(token("acct/a")),
            )
            .with_container(
                ContainerDescriptor::step("b", ImageDetails::parse("alpine")).with_secret_variable(token("acct/b")),
            );

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;
        assert!(result.is_success(), "{result:?}");

        let data = h.gateway.secret("build-1-secret-env", "ci").unwrap().data.unwrap();
        let containers = h.gateway.pod("build-1", "ci").unwrap().spec.unwrap().containers;
        for (container, expected) in containers.iter().zip(["value-for-a", "value-for-b"]) {
            let env = container.env.clone().unwrap();
            let var = env.iter().find(|e| e.name == "TOKEN").unwrap();
            let key = &var.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap().key;
            assert_eq!(data[key].0, expected.as_bytes().to_vec(), "{}", container.name);
        }
    }

    #[tokio::test]
    async fn env_secret_is_referenced_from_containers() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));
        let step = ContainerDescriptor::step("step-1", ImageDetails::parse("node:20")).with_secret_variable(
            SecretVariable {
                name: "NPM_TOKEN".into(),
                kind: SecretKind::Text,
                value: EncryptedRef::new("acct/npm"),
            },
        );
        let pod = PodDescriptor::new("build-1", "ci").with_container(step);

        let result = h.orchestrator.initialize(&request(pod), h.sink.clone()).await;
        assert!(result.is_success());

        let secret = h.gateway.secret("build-1-secret-env", "ci").unwrap();
        assert_eq!(secret.data.unwrap()["step-1.SECRET_NPM_TOKEN"].0, b"npm-token".to_vec());

        let pod = h.gateway.pod("build-1", "ci").unwrap();
        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        let var = env.iter().find(|e| e.name == "NPM_TOKEN").unwrap();
        let selector = var.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "build-1-secret-env");
        assert_eq!(selector.key, "step-1.SECRET_NPM_TOKEN");
    }

    #[tokio::test]
    async fn service_pods_come_before_primary_pod() {
        let h = harness();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "db".to_string());
        let mut primary = simple_pod();
        primary.volume_claims.push(kiln_core::VolumeClaimRequest {
            volume_name: "ws".into(),
            claim_name: "build-1-ws".into(),
            storage_class: None,
            size_mib: 1024,
        });

        let mut req = request(primary);
        req.service_pods.push(ServicePodDescriptor {
            pod: PodDescriptor::new("build-1-db", "ci")
                .with_label("app", "db")
                .with_container(ContainerDescriptor::step("db", ImageDetails::parse("postgres:16"))),
            service_name: "db".into(),
            ports: vec![5432],
            selector,
        });

        let result = h.orchestrator.initialize(&req, h.sink.clone()).await;
        assert!(result.is_success());

        let calls = h.gateway.calls();
        let pvc = position(&calls, &GatewayCall::CreatePvc("build-1-ws".into()));
        let service_pod = position(&calls, &GatewayCall::CreatePod("build-1-db".into()));
        let service = position(&calls, &GatewayCall::CreateService("db".into()));
        let primary = position(&calls, &GatewayCall::CreatePod("build-1".into()));
        assert!(h.gateway.has_pvc("build-1-ws", "ci"));
        assert!(pvc < service_pod);
        assert!(service_pod < service);
        assert!(service < primary);
        assert_eq!(h.gateway.service_ports("db", "ci"), Some(vec![5432]));
    }

    #[tokio::test]
    async fn readiness_timeout_fails_and_stops_watch() {
        let h = harness();
        h.gateway.push_pod_status(
            "build-1",
            PodStatus {
                phase: PodPhase::Pending,
                container_state: Some("step-1: ContainerCreating".into()),
                ..Default::default()
            },
        );

        let result = h.orchestrator.initialize(&request(simple_pod()), h.sink.clone()).await;

        let message = result.message.unwrap();
        assert!(message.starts_with("[readiness] TimeoutError"), "{message}");
        assert!(message.contains("ContainerCreating"));
        assert!(h.clock.now() >= Duration::from_secs(100));
        assert!(h
            .gateway
            .calls()
            .contains(&GatewayCall::WatchEvents("build-1".into())));
        assert_eq!(h.gateway.watch_drops(), 1);
    }

    #[tokio::test]
    async fn watch_failure_does_not_block_readiness() {
        let h = harness();
        h.gateway.fail_watch();
        h.gateway
            .push_pod_status("build-1", PodStatus::in_phase(PodPhase::Running));

        let result = h.orchestrator.initialize(&request(simple_pod()), h.sink.clone()).await;
        assert!(result.is_success());
    }
}
